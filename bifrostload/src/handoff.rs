// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! The loader/kernel ABI.
//!
//! The kernel is entered as
//!
//! ```text
//! extern "sysv64" fn kernel_main(config: *const FrameBufferDescriptor) -> !
//! ```
//!
//! and [`FrameBufferDescriptor`] is the only data crossing over. Both sides
//! must agree on its `#[repr(C)]` layout; the kernel never sees firmware
//! structures.

use core::mem::{offset_of, size_of};

use crate::error::BootError;
use crate::termination::Terminated;

/// Pixel layouts the kernel knows how to draw.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    RgbResv8BitPerColor = 0,
    BgrResv8BitPerColor = 1,
}

impl TryFrom<u32> for PixelFormat {
    type Error = BootError;

    /// Map a raw `EFI_GRAPHICS_PIXEL_FORMAT`. Bitmask and blt-only modes
    /// are refused rather than guessed at.
    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(PixelFormat::RgbResv8BitPerColor),
            1 => Ok(PixelFormat::BgrResv8BitPerColor),
            other => Err(BootError::UnsupportedConfiguration(other)),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBufferDescriptor {
    pub frame_buffer: u64,
    pub pixels_per_scan_line: u32,
    pub horizontal_resolution: u32,
    pub vertical_resolution: u32,
    pub pixel_format: PixelFormat,
}

const _: () = {
    assert!(size_of::<FrameBufferDescriptor>() == 24);
    assert!(offset_of!(FrameBufferDescriptor, frame_buffer) == 0);
    assert!(offset_of!(FrameBufferDescriptor, pixels_per_scan_line) == 8);
    assert!(offset_of!(FrameBufferDescriptor, horizontal_resolution) == 12);
    assert!(offset_of!(FrameBufferDescriptor, vertical_resolution) == 16);
    assert!(offset_of!(FrameBufferDescriptor, pixel_format) == 20);
};

/// How the kernel expects to be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAbi {
    /// System V AMD64, first argument (`rdi`) is `*const FrameBufferDescriptor`.
    SysV64FrameBuffer,
}

#[cfg(target_arch = "x86_64")]
type SysV64FrameBufferMain = extern "sysv64" fn(*const FrameBufferDescriptor) -> !;

/// Address of code this loader did not compile, plus the ABI to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelEntry {
    pub addr: u64,
    pub abi: EntryAbi,
}

impl KernelEntry {
    pub fn new(addr: u64) -> Self {
        Self {
            addr,
            abi: EntryAbi::SysV64FrameBuffer,
        }
    }

    /// Jump into the kernel. There is no way back.
    ///
    /// Requires proof that boot services are gone.
    ///
    /// # Safety
    /// `addr` must be the entry of a kernel fully resident at its link
    /// address, and `config` must stay valid for as long as the kernel
    /// reads it (the loader's stack is never reclaimed).
    #[cfg(target_arch = "x86_64")]
    pub unsafe fn enter(self, _proof: Terminated, config: &FrameBufferDescriptor) -> ! {
        match self.abi {
            EntryAbi::SysV64FrameBuffer => {
                let main: SysV64FrameBufferMain =
                    unsafe { core::mem::transmute(self.addr as usize) };
                main(config as *const FrameBufferDescriptor)
            }
        }
    }
}
