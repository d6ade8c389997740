// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! The boot sequence, from memory map to a kernel ready to enter.

use alloc::vec;
use alloc::vec::Vec;

use log::{info, warn};

use crate::config::{ENTRY_POINT_OFFSET, KERNEL_PATH, MEMMAP_PATH, TEST_PATTERN};
use crate::diagnostics::save_memory_map;
use crate::discovery::{open_display, open_root_dir};
use crate::elf_loader::{self, ElfImage, Footprint};
use crate::error::{BootError, Result};
use crate::firmware::{BootServices, File, Volume};
use crate::handoff::{FrameBufferDescriptor, KernelEntry, PixelFormat};
use crate::memory_map::MemoryMap;
use crate::region::PhysRegion;
use crate::termination::{self, Terminated};

/// Everything needed to jump into the kernel, gathered while boot
/// services were still available.
#[derive(Debug)]
pub struct Handoff {
    pub entry: KernelEntry,
    pub config: FrameBufferDescriptor,
    pub footprint: Footprint,
    pub terminated: Terminated,
}

impl Handoff {
    /// Call the kernel.
    ///
    /// # Safety
    /// The kernel described by `footprint` must still be resident, which
    /// holds as long as nothing has touched its pages since
    /// [`prepare_handoff`] returned.
    #[cfg(target_arch = "x86_64")]
    pub unsafe fn enter(self) -> ! {
        let Handoff {
            entry,
            config,
            terminated,
            ..
        } = self;
        // `config` lives in this frame, which never returns.
        unsafe { entry.enter(terminated, &config) }
    }
}

/// Run every step up to and including `ExitBootServices`.
///
/// `map` is the caller's memory map storage. On success it holds the final
/// memory map and boot services are gone.
pub fn prepare_handoff<S: BootServices>(
    services: &mut S,
    map: &mut MemoryMap<'_>,
) -> Result<Handoff> {
    map.capture(services)?;

    let mut root = open_root_dir(services)?;
    if let Err(e) = save_memory_map(&mut root, MEMMAP_PATH, map) {
        warn!("memory map not saved to {}: {}", MEMMAP_PATH, e);
    }

    let mut display = open_display(services)?;
    display.frame_buffer.fill(TEST_PATTERN);

    let kernel_file = read_kernel(&mut root)?;
    // Closing the volume is a firmware call; it must happen before exit.
    drop(root);
    let (footprint, header_entry, region) = {
        let image = ElfImage::parse(&kernel_file)?;
        let kernel = elf_loader::load(services, &image)?;
        (kernel.footprint, image.entry_point(), kernel.region)
    };
    drop(kernel_file);

    let entry = resident_entry(&region, footprint, header_entry)?;

    let config = FrameBufferDescriptor {
        frame_buffer: display.frame_buffer_base,
        pixels_per_scan_line: display.pixels_per_scan_line,
        horizontal_resolution: display.horizontal_resolution,
        vertical_resolution: display.vertical_resolution,
        pixel_format: PixelFormat::try_from(display.pixel_format)?,
    };

    let terminated = termination::exit_boot_services(services, map)?;
    Ok(Handoff {
        entry,
        config,
        footprint,
        terminated,
    })
}

/// Read `\kernel.elf` completely into a pool buffer.
fn read_kernel<V: Volume>(root: &mut V) -> Result<Vec<u8>> {
    let mut file = root
        .open_read(KERNEL_PATH)
        .map_err(BootError::firmware("open kernel file"))?;
    let size = file
        .size()
        .map_err(BootError::firmware("get kernel file info"))?;
    let size = usize::try_from(size).map_err(|_| BootError::MalformedImage("kernel file too large"))?;

    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = file
            .read(&mut buf[filled..])
            .map_err(BootError::firmware("read kernel file"))?;
        if n == 0 {
            return Err(BootError::MalformedImage("kernel file shorter than its size"));
        }
        filled += n;
    }
    file.close().map_err(BootError::firmware("close kernel file"))?;

    info!("{}: {} bytes", KERNEL_PATH, size);
    Ok(buf)
}

/// The entry address as the kernel sees it: the `e_entry` field of the
/// ELF header resident at the start of the first segment.
fn resident_entry(region: &PhysRegion<'_>, footprint: Footprint, header_entry: u64) -> Result<KernelEntry> {
    let outside = BootError::MalformedImage("entry point field outside the image");
    // The region is page granular; the field must lie within the segments.
    if footprint.len() < ENTRY_POINT_OFFSET + 8 {
        return Err(outside);
    }
    let addr = region
        .read_u64(footprint.first + ENTRY_POINT_OFFSET)
        .map_err(|_| outside)?;
    if !footprint.contains(addr) {
        return Err(BootError::MalformedImage("entry point outside the kernel"));
    }
    if addr != header_entry {
        warn!(
            "resident entry {:#x} differs from e_entry {:#x}, using the resident one",
            addr, header_entry
        );
    }
    Ok(KernelEntry::new(addr))
}
