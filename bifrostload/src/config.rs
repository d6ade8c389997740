// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! Build-time loader configuration.

use log::LevelFilter;

/// Kernel image on the boot volume.
pub const KERNEL_PATH: &str = r"\kernel.elf";

/// Memory map dump written on every boot.
pub const MEMMAP_PATH: &str = r"\memmap";

/// Storage reserved for the firmware memory map (4 pages).
pub const MEMMAP_BUFFER_SIZE: usize = 4096 * 4;

/// UEFI page granularity.
pub const PAGE_SIZE: u64 = 0x1000;

/// Byte offset of `e_entry` in an ELF64 header.
pub const ENTRY_POINT_OFFSET: u64 = 24;

/// Attribute bits kept when dumping memory descriptors.
pub const ATTRIBUTE_MASK: u64 = 0xF_FFFF;

/// Byte written over the whole frame buffer before loading the kernel.
pub const TEST_PATTERN: u8 = 0xFF;

pub const LOG_LEVEL: LevelFilter = LevelFilter::Info;
