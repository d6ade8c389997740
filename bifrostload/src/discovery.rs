// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! Boot volume and display lookup. One pass each, no retries.

use log::info;

use crate::error::{BootError, Result};
use crate::firmware::{BootServices, DisplayMode};

/// Root directory of the volume the loader itself was read from.
pub fn open_root_dir<S: BootServices>(services: &mut S) -> Result<S::Volume> {
    let device = services
        .image_device()
        .map_err(BootError::firmware("open loaded image"))?;
    services
        .open_volume(device)
        .map_err(BootError::firmware("open root directory"))
}

/// Open the first graphics output device.
pub fn open_display<S: BootServices>(services: &mut S) -> Result<DisplayMode> {
    let handles = services
        .display_handles()
        .map_err(BootError::firmware("locate GOP handles"))?;
    let first = *handles.first().ok_or(BootError::NoDisplayDevice)?;
    let mode = services
        .open_display(first)
        .map_err(BootError::firmware("open GOP"))?;

    info!(
        "Resolution: {}x{}, Pixel Format: {}, {} pixels/line",
        mode.horizontal_resolution,
        mode.vertical_resolution,
        pixel_format_name(mode.pixel_format),
        mode.pixels_per_scan_line
    );
    info!(
        "Frame Buffer: {:#x} - {:#x}, Size: {} bytes",
        mode.frame_buffer_base,
        mode.frame_buffer_base + mode.frame_buffer_size as u64,
        mode.frame_buffer_size
    );
    Ok(mode)
}

/// UEFI name of a raw `EFI_GRAPHICS_PIXEL_FORMAT`.
pub fn pixel_format_name(code: u32) -> &'static str {
    match code {
        0 => "PixelRedGreenBlueReserved8BitPerColor",
        1 => "PixelBlueGreenRedReserved8BitPerColor",
        2 => "PixelBitMask",
        3 => "PixelBltOnly",
        4 => "PixelFormatMax",
        _ => "InvalidPixelFormat",
    }
}
