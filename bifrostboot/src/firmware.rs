// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! [`BootServices`] over the `uefi` crate.

use alloc::vec::Vec;
use core::slice;

use bifrostload::config::PAGE_SIZE;
use bifrostload::firmware::MapInfo;
use bifrostload::{BootServices, DisplayMode, File, Volume};
use uefi::boot::{self, AllocateType, OpenProtocolAttributes, OpenProtocolParams, ScopedProtocol};
use uefi::mem::memory_map::{MemoryDescriptor, MemoryType};
use uefi::proto::console::gop::GraphicsOutput;
use uefi::proto::loaded_image::LoadedImage;
use uefi::proto::media::file::{
    Directory, File as _, FileAttribute, FileInfo, FileMode, RegularFile,
};
use uefi::proto::media::fs::SimpleFileSystem;
use uefi::{CStr16, Handle, Status};

use crate::logger;

/// Longest path the loader opens, in UCS-2 units.
const PATH_UNITS: usize = 64;

pub struct UefiServices {
    image: Handle,
}

impl UefiServices {
    pub fn new(image: Handle) -> Self {
        Self { image }
    }
}

/// Raw boot services table pointer, as an expression so its type never has
/// to be named. `GetMemoryMap` into caller storage and `ExitBootServices`
/// with an explicit key are not exposed by the safe wrappers.
macro_rules! raw_boot_services {
    () => {{
        match uefi::table::system_table_raw() {
            // SAFETY: the system table stays valid for the application's
            // lifetime.
            Some(st) => match unsafe { (*st.as_ptr()).boot_services } {
                bs if bs.is_null() => Err(Status::UNSUPPORTED),
                bs => Ok(bs),
            },
            None => Err(Status::NOT_READY),
        }
    }};
}

impl BootServices for UefiServices {
    type Handle = Handle;
    type Volume = UefiVolume;

    fn get_memory_map(&mut self, buf: &mut [u8]) -> Result<MapInfo, (Status, usize)> {
        let bs = raw_boot_services!().map_err(|status| (status, 0))?;
        let mut map_size = buf.len();
        let mut map_key = 0;
        let mut descriptor_size = 0;
        let mut descriptor_version = 0;
        // SAFETY: `buf` is 8-byte aligned storage of `map_size` bytes owned
        // by the caller; the firmware writes at most that much.
        let status = unsafe {
            ((*bs).get_memory_map)(
                &mut map_size,
                buf.as_mut_ptr().cast::<MemoryDescriptor>(),
                &mut map_key,
                &mut descriptor_size,
                &mut descriptor_version,
            )
        };
        if status.is_error() {
            return Err((status, map_size));
        }
        Ok(MapInfo {
            map_size,
            map_key,
            descriptor_size,
            descriptor_version,
        })
    }

    fn image_device(&mut self) -> Result<Handle, Status> {
        let loaded = boot::open_protocol_exclusive::<LoadedImage>(self.image)
            .map_err(|e| e.status())?;
        loaded.device().ok_or(Status::UNSUPPORTED)
    }

    fn open_volume(&mut self, device: Handle) -> Result<UefiVolume, Status> {
        let mut fs = boot::open_protocol_exclusive::<SimpleFileSystem>(device)
            .map_err(|e| e.status())?;
        let root = fs.open_volume().map_err(|e| e.status())?;
        Ok(UefiVolume { _fs: fs, root })
    }

    fn display_handles(&mut self) -> Result<Vec<Handle>, Status> {
        match boot::find_handles::<GraphicsOutput>() {
            Ok(handles) => Ok(handles),
            Err(e) if e.status() == Status::NOT_FOUND => Ok(Vec::new()),
            Err(e) => Err(e.status()),
        }
    }

    fn open_display(&mut self, handle: Handle) -> Result<DisplayMode, Status> {
        // The firmware keeps drawing on this device until ExitBootServices,
        // so don't ask for exclusive access.
        // SAFETY: only mode information and the frame buffer address are
        // taken from the protocol.
        let mut gop = unsafe {
            boot::open_protocol::<GraphicsOutput>(
                OpenProtocolParams {
                    handle,
                    agent: self.image,
                    controller: None,
                },
                OpenProtocolAttributes::GetProtocol,
            )
        }
        .map_err(|e| e.status())?;

        let info = gop.current_mode_info();
        let (width, height) = info.resolution();
        let mut fb = gop.frame_buffer();
        let base = fb.as_mut_ptr();
        let size = fb.size();
        // SAFETY: the frame buffer is identity mapped device memory that
        // outlives the loader.
        let frame_buffer = unsafe { slice::from_raw_parts_mut(base, size) };

        Ok(DisplayMode {
            horizontal_resolution: width as u32,
            vertical_resolution: height as u32,
            pixels_per_scan_line: info.stride() as u32,
            pixel_format: info.pixel_format() as u32,
            frame_buffer_base: base as u64,
            frame_buffer_size: size,
            frame_buffer,
        })
    }

    fn allocate_pages_at(&mut self, base: u64, pages: usize) -> Result<&'static mut [u8], Status> {
        let ptr = boot::allocate_pages(AllocateType::Address(base), MemoryType::LOADER_DATA, pages)
            .map_err(|e| e.status())?;
        // SAFETY: the firmware just handed us these pages and they are never
        // freed.
        Ok(unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), pages * PAGE_SIZE as usize) })
    }

    fn quiesce_console(&mut self) {
        logger::detach_console();
    }

    fn exit_boot_services(&mut self, map_key: usize) -> Result<(), Status> {
        let bs = raw_boot_services!()?;
        // SAFETY: after success nothing in this crate calls a boot service
        // again; the caller only enters the kernel.
        let status = unsafe { ((*bs).exit_boot_services)(self.image.as_ptr(), map_key) };
        if status.is_error() {
            return Err(status);
        }
        Ok(())
    }
}

fn ucs2_path<'a>(path: &str, buf: &'a mut [u16; PATH_UNITS]) -> Result<&'a CStr16, Status> {
    CStr16::from_str_with_buf(path, buf).map_err(|_| Status::INVALID_PARAMETER)
}

/// Root directory of a simple file system volume.
pub struct UefiVolume {
    _fs: ScopedProtocol<SimpleFileSystem>,
    root: Directory,
}

impl Volume for UefiVolume {
    type File = UefiFile;

    fn create(&mut self, path: &str) -> Result<UefiFile, Status> {
        let mut buf = [0u16; PATH_UNITS];
        let name = ucs2_path(path, &mut buf)?;

        // Start from an empty file every boot.
        if let Ok(old) = self
            .root
            .open(name, FileMode::ReadWrite, FileAttribute::empty())
        {
            old.delete().map_err(|e| e.status())?;
        }

        let file = self
            .root
            .open(name, FileMode::CreateReadWrite, FileAttribute::empty())
            .map_err(|e| e.status())?;
        file.into_regular_file()
            .map(UefiFile)
            .ok_or(Status::UNSUPPORTED)
    }

    fn open_read(&mut self, path: &str) -> Result<UefiFile, Status> {
        let mut buf = [0u16; PATH_UNITS];
        let name = ucs2_path(path, &mut buf)?;
        let file = self
            .root
            .open(name, FileMode::Read, FileAttribute::empty())
            .map_err(|e| e.status())?;
        file.into_regular_file()
            .map(UefiFile)
            .ok_or(Status::UNSUPPORTED)
    }
}

pub struct UefiFile(RegularFile);

impl File for UefiFile {
    fn size(&mut self) -> Result<u64, Status> {
        let info = self
            .0
            .get_boxed_info::<FileInfo>()
            .map_err(|e| e.status())?;
        Ok(info.file_size())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Status> {
        self.0.read(buf).map_err(|e| e.status())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Status> {
        self.0.write(bytes).map_err(|e| e.status())
    }

    fn close(self) -> Result<(), Status> {
        self.0.close();
        Ok(())
    }
}
