// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! Memory map dump (`\memmap`) for offline inspection.
//!
//! CSV, one line per descriptor:
//!
//! ```text
//! Index, Type, Type(name), PhysicalStart, NumberOfPages, Attribute
//! 0, 3, EfiBootServicesCode, 00000000, 1, f
//! ```

use core::fmt::{self, Write};

use heapless::String;
use log::info;
use uefi::Status;
use uefi::mem::memory_map::MemoryType;

use crate::config::ATTRIBUTE_MASK;
use crate::error::{BootError, Result};
use crate::firmware::{File, Volume};
use crate::memory_map::{MemoryDescriptor, MemoryMap};

pub const CSV_HEADER: &str = "Index, Type, Type(name), PhysicalStart, NumberOfPages, Attribute\n";

/// Longest CSV line the dump can hold.
const LINE_CAPACITY: usize = 256;

/// UEFI name of a memory type.
pub fn memory_type_name(ty: MemoryType) -> &'static str {
    match ty {
        MemoryType::RESERVED => "EfiReservedMemoryType",
        MemoryType::LOADER_CODE => "EfiLoaderCode",
        MemoryType::LOADER_DATA => "EfiLoaderData",
        MemoryType::BOOT_SERVICES_CODE => "EfiBootServicesCode",
        MemoryType::BOOT_SERVICES_DATA => "EfiBootServicesData",
        MemoryType::RUNTIME_SERVICES_CODE => "EfiRuntimeServicesCode",
        MemoryType::RUNTIME_SERVICES_DATA => "EfiRuntimeServicesData",
        MemoryType::CONVENTIONAL => "EfiConventionalMemory",
        MemoryType::UNUSABLE => "EfiUnusableMemory",
        MemoryType::ACPI_RECLAIM => "EfiACPIReclaimMemory",
        MemoryType::ACPI_NON_VOLATILE => "EfiACPIMemoryNVS",
        MemoryType::MMIO => "EfiMemoryMappedIO",
        MemoryType::MMIO_PORT_SPACE => "EfiMemoryMappedIOPortSpace",
        MemoryType::PAL_CODE => "EfiPalCode",
        MemoryType::PERSISTENT_MEMORY => "EfiPersistentMemory",
        // UEFI 2.9 unaccepted memory, then the enum bound.
        MemoryType(15) => "EfiUnacceptedMemoryType",
        MemoryType(16) => "EfiMaxMemoryType",
        _ => "InvalidMemoryType",
    }
}

/// One CSV line, newline included.
pub struct Record {
    pub index: usize,
    pub desc: MemoryDescriptor,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.desc;
        writeln!(
            f,
            "{}, {:x}, {}, {:08x}, {:x}, {:x}",
            self.index,
            d.ty.0,
            memory_type_name(d.ty),
            d.phys_start,
            d.page_count,
            d.attribute & ATTRIBUTE_MASK
        )
    }
}

pub fn records<'a>(map: &'a MemoryMap<'_>) -> impl Iterator<Item = Record> + 'a {
    map.entries()
        .enumerate()
        .map(|(index, desc)| Record { index, desc })
}

/// Serialize the whole map into any text sink.
pub fn write_csv<W: Write>(map: &MemoryMap<'_>, out: &mut W) -> fmt::Result {
    out.write_str(CSV_HEADER)?;
    for record in records(map) {
        write!(out, "{record}")?;
    }
    Ok(())
}

/// Format `record` into `line`, replacing what was there.
fn render<const N: usize>(record: &Record, line: &mut String<N>) -> Result<()> {
    line.clear();
    write!(line, "{record}").map_err(|_| BootError::ResourceUnavailable {
        op: "format memory map record",
        status: Status::BUFFER_TOO_SMALL,
    })
}

fn write_map<F: File>(file: &mut F, map: &MemoryMap<'_>) -> Result<()> {
    file.write(CSV_HEADER.as_bytes())
        .map_err(BootError::firmware("write memory map header"))?;

    let mut line: String<LINE_CAPACITY> = String::new();
    for record in records(map) {
        render(&record, &mut line)?;
        file.write(line.as_bytes())
            .map_err(BootError::firmware("write memory map"))?;
    }
    Ok(())
}

/// Create `path` on `root` and dump `map` into it.
pub fn save_memory_map<V: Volume>(root: &mut V, path: &str, map: &MemoryMap<'_>) -> Result<()> {
    let mut file = root
        .create(path)
        .map_err(BootError::firmware("open memory map file"))?;

    info!(
        "memory map buffer {:#x}, {} bytes used",
        map.buffer_addr(),
        map.map_size()
    );
    let written = write_map(&mut file, map);
    let closed = file
        .close()
        .map_err(BootError::firmware("close memory map file"));
    written.and(closed)
}
