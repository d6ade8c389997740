// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! ELF64 kernel placement.
//!
//! The kernel is linked at fixed physical addresses. The loader asks the
//! firmware for exactly the pages `[first PT_LOAD, end of last PT_LOAD)` and
//! copies every segment to its `p_vaddr`; nothing is relocated.

use core::mem::align_of;

use log::{debug, info};
use xmas_elf::ElfFile;
use xmas_elf::header::Class;
use xmas_elf::program::{ProgramHeader, Type as PhType};

use crate::config::PAGE_SIZE;
use crate::error::{BootError, Result};
use crate::firmware::BootServices;
use crate::region::PhysRegion;

const EHDR_LEN: usize = 64;
const PHDR_LEN: usize = 56;

/// A `PT_LOAD` program header, reduced to what placement needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSegment {
    pub vaddr: u64,
    pub offset: u64,
    pub file_size: u64,
    pub mem_size: u64,
}

impl LoadSegment {
    fn from_header(ph: &ProgramHeader<'_>) -> Self {
        Self {
            vaddr: ph.virtual_addr(),
            offset: ph.offset(),
            file_size: ph.file_size(),
            mem_size: ph.mem_size(),
        }
    }

    pub fn end(&self) -> u64 {
        self.vaddr + self.mem_size
    }
}

/// Address span `[first, last)` covered by all loadable segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footprint {
    pub first: u64,
    pub last: u64,
}

impl Footprint {
    /// Identity of the min/max fold; what an image without `PT_LOAD` yields.
    pub const EMPTY: Footprint = Footprint {
        first: u64::MAX,
        last: 0,
    };

    pub fn include(self, seg: &LoadSegment) -> Self {
        Self {
            first: self.first.min(seg.vaddr),
            last: self.last.max(seg.end()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first >= self.last
    }

    pub fn len(&self) -> u64 {
        self.last.saturating_sub(self.first)
    }

    /// Whole pages needed to back the span.
    pub fn pages(&self) -> usize {
        self.len().div_ceil(PAGE_SIZE) as usize
    }

    pub fn contains(&self, addr: u64) -> bool {
        (self.first..self.last).contains(&addr)
    }
}

/// A kernel file read fully into memory.
pub struct ElfImage<'a> {
    bytes: &'a [u8],
    elf: ElfFile<'a>,
}

impl<'a> ElfImage<'a> {
    /// Check the parts of the file placement depends on.
    ///
    /// Every `PT_LOAD` must have its file bytes inside `bytes`, a
    /// `p_memsz` no smaller than `p_filesz`, and an end address that does
    /// not wrap.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < EHDR_LEN {
            return Err(BootError::MalformedImage("shorter than an ELF header"));
        }
        if bytes.as_ptr() as usize % align_of::<u64>() != 0 {
            return Err(BootError::MalformedImage("image buffer is misaligned"));
        }
        let elf = ElfFile::new(bytes).map_err(BootError::MalformedImage)?;
        if elf.header.pt1.class() != Class::SixtyFour {
            return Err(BootError::MalformedImage("not an ELF64 file"));
        }

        let pt2 = &elf.header.pt2;
        let ph_count = pt2.ph_count() as usize;
        if ph_count > 0 {
            if pt2.ph_entry_size() as usize != PHDR_LEN {
                return Err(BootError::MalformedImage("unexpected program header size"));
            }
            let table_start = pt2.ph_offset() as usize;
            let table_end = ph_count
                .checked_mul(PHDR_LEN)
                .and_then(|len| len.checked_add(table_start))
                .ok_or(BootError::MalformedImage("program header table overflows"))?;
            if table_start == 0 || table_end > bytes.len() {
                return Err(BootError::MalformedImage("program header table outside the file"));
            }
            if table_start % align_of::<u64>() != 0 {
                return Err(BootError::MalformedImage("program header table is misaligned"));
            }
        }

        let image = Self { bytes, elf };
        for seg in image.load_segments() {
            if seg.mem_size < seg.file_size {
                return Err(BootError::MalformedImage("segment memsz smaller than filesz"));
            }
            let in_file = seg
                .offset
                .checked_add(seg.file_size)
                .is_some_and(|end| end <= bytes.len() as u64);
            if !in_file {
                return Err(BootError::MalformedImage("segment data outside the file"));
            }
            if seg.vaddr.checked_add(seg.mem_size).is_none() {
                return Err(BootError::MalformedImage("segment wraps the address space"));
            }
        }
        Ok(image)
    }

    /// `e_entry` as recorded in the header.
    pub fn entry_point(&self) -> u64 {
        self.elf.header.pt2.entry_point()
    }

    pub fn load_segments(&self) -> impl Iterator<Item = LoadSegment> + '_ {
        self.elf
            .program_iter()
            .filter(|ph| ph.get_type().ok() == Some(PhType::Load))
            .map(|ph| LoadSegment::from_header(&ph))
    }

    /// Fold `min(p_vaddr)` / `max(p_vaddr + p_memsz)` over `PT_LOAD` entries.
    pub fn footprint(&self) -> Footprint {
        self.load_segments()
            .fold(Footprint::EMPTY, |fp, seg| fp.include(&seg))
    }

    /// Copy `p_filesz` bytes of each segment to `p_vaddr` and zero the
    /// remaining `p_memsz - p_filesz`.
    ///
    /// Overlapping segments are not detected; the later one wins.
    pub fn copy_segments(&self, dest: &mut PhysRegion<'_>) -> Result<()> {
        for seg in self.load_segments() {
            // Both ranges were checked in `parse`.
            let start = seg.offset as usize;
            let src = &self.bytes[start..start + seg.file_size as usize];
            dest.write(seg.vaddr, src)
                .map_err(|_| BootError::MalformedImage("segment outside the allocated footprint"))?;
            dest.zero(seg.vaddr + seg.file_size, (seg.mem_size - seg.file_size) as usize)
                .map_err(|_| BootError::MalformedImage("segment outside the allocated footprint"))?;
            debug!(
                "PT_LOAD {:#x}: {:#x} file bytes, {:#x} in memory",
                seg.vaddr, seg.file_size, seg.mem_size
            );
        }
        Ok(())
    }
}

/// A kernel resident at its link address.
pub struct LoadedKernel {
    pub footprint: Footprint,
    pub region: PhysRegion<'static>,
}

/// Allocate the image's footprint at its fixed address and copy it in.
pub fn load<S: BootServices>(services: &mut S, image: &ElfImage<'_>) -> Result<LoadedKernel> {
    let footprint = image.footprint();
    if footprint.is_empty() {
        return Err(BootError::MalformedImage("no loadable segments"));
    }

    let pages = footprint.pages();
    let memory = services
        .allocate_pages_at(footprint.first, pages)
        .map_err(|status| BootError::AllocationFailure {
            base: footprint.first,
            pages,
            status,
        })?;
    let mut region = PhysRegion::new(footprint.first, memory);

    image.copy_segments(&mut region)?;
    info!("Kernel: {:#x} - {:#x}", footprint.first, footprint.last);

    Ok(LoadedKernel { footprint, region })
}
