// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! The firmware services the loader needs, as an explicit context value.
//!
//! Every component takes `&mut impl BootServices` instead of reaching for the
//! firmware's global tables. `bifrostboot` implements this over the `uefi`
//! crate; unit tests implement it over an in-memory fake.
//!
//! Primitives report raw firmware statuses; callers attach the operation
//! name when turning them into [`crate::BootError`].

use alloc::vec::Vec;
use uefi::Status;

/// What `GetMemoryMap` reports besides the descriptors themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapInfo {
    pub map_size: usize,
    pub map_key: usize,
    pub descriptor_size: usize,
    pub descriptor_version: u32,
}

/// Current mode of an opened graphics output device.
pub struct DisplayMode {
    pub horizontal_resolution: u32,
    pub vertical_resolution: u32,
    pub pixels_per_scan_line: u32,
    /// Raw `EFI_GRAPHICS_PIXEL_FORMAT` value.
    pub pixel_format: u32,
    pub frame_buffer_base: u64,
    pub frame_buffer_size: usize,
    /// The frame buffer itself; identity mapped on UEFI.
    pub frame_buffer: &'static mut [u8],
}

pub trait BootServices {
    type Handle: Copy;
    type Volume: Volume;

    /// One `GetMemoryMap` call into `buf`.
    ///
    /// On `Err(Status::BUFFER_TOO_SMALL)` the required size is returned in
    /// the second field.
    fn get_memory_map(&mut self, buf: &mut [u8]) -> Result<MapInfo, (Status, usize)>;

    /// Device the running image was loaded from.
    fn image_device(&mut self) -> Result<Self::Handle, Status>;

    /// Open the simple file system on `device` and its root directory.
    fn open_volume(&mut self, device: Self::Handle) -> Result<Self::Volume, Status>;

    /// Handles implementing the graphics output protocol, possibly none.
    fn display_handles(&mut self) -> Result<Vec<Self::Handle>, Status>;

    fn open_display(&mut self, handle: Self::Handle) -> Result<DisplayMode, Status>;

    /// `AllocatePages(AllocateAddress, LoaderData, pages, base)`.
    ///
    /// The returned memory is never freed; it becomes the kernel.
    fn allocate_pages_at(&mut self, base: u64, pages: usize) -> Result<&'static mut [u8], Status>;

    /// Stop mirroring log output to the firmware console.
    ///
    /// Called right before the first ExitBootServices attempt: console
    /// output is a boot service and would invalidate the map key.
    fn quiesce_console(&mut self) {}

    /// `ExitBootServices(image, map_key)`.
    fn exit_boot_services(&mut self, map_key: usize) -> Result<(), Status>;
}

/// An opened directory on a file system volume.
pub trait Volume {
    type File: File;

    /// Create `path` empty, replacing an existing file.
    fn create(&mut self, path: &str) -> Result<Self::File, Status>;

    fn open_read(&mut self, path: &str) -> Result<Self::File, Status>;
}

pub trait File {
    /// File size from the file info metadata.
    fn size(&mut self) -> Result<u64, Status>;

    /// Read into `buf`, returning bytes read (0 at end of file).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Status>;

    fn write(&mut self, bytes: &[u8]) -> Result<(), Status>;

    fn close(self) -> Result<(), Status>;
}
