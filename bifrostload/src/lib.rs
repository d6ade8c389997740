// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! Bifrost kernel loader core.
//!
//! Everything between "firmware handed us control" and "jump into the
//! kernel" lives here, written against the [`BootServices`] trait so the
//! same pipeline runs on real UEFI firmware (`bifrostboot`) and on the fake
//! firmware in [`testing`]:
//!
//! 1. snapshot the memory map ([`memory_map`])
//! 2. find the boot volume and the display ([`discovery`])
//! 3. dump the memory map to `\memmap` on a best-effort basis ([`diagnostics`])
//! 4. read `\kernel.elf`, allocate its footprint at its link address and
//!    copy the `PT_LOAD` segments ([`elf_loader`])
//! 5. exit boot services with the map-key retry ([`termination`])
//! 6. call the kernel with a [`FrameBufferDescriptor`] ([`handoff`])

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod driver;
pub mod elf_loader;
pub mod error;
pub mod firmware;
pub mod handoff;
pub mod memory_map;
pub mod region;
pub mod termination;

#[cfg(test)]
pub mod testing;

pub use driver::{Handoff, prepare_handoff};
pub use error::BootError;
pub use firmware::{BootServices, DisplayMode, File, Volume};
pub use handoff::{FrameBufferDescriptor, KernelEntry, PixelFormat};
pub use memory_map::MemoryMap;
pub use termination::Terminated;
