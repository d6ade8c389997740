// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! Checked access to raw memory.
//!
//! Firmware hands out memory as bare addresses. Instead of casting those to
//! structure pointers, the loader wraps them in a region that knows its own
//! physical base and length and refuses any access outside of it.

use core::ops::Range;

/// An access fell outside the region it was made through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfRange {
    pub addr: u64,
    pub len: usize,
}

/// Little-endian field reader over a byte slice.
#[derive(Clone, Copy)]
pub struct ByteView<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn array<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let end = offset.checked_add(N)?;
        self.bytes.get(offset..end)?.try_into().ok()
    }

    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        self.array(offset).map(u32::from_le_bytes)
    }

    pub fn u64_at(&self, offset: usize) -> Option<u64> {
        self.array(offset).map(u64::from_le_bytes)
    }
}

/// Physical memory `[base, base + len)` owned by the loader.
///
/// On UEFI the region is identity mapped, so `bytes` is the memory itself.
pub struct PhysRegion<'a> {
    base: u64,
    bytes: &'a mut [u8],
}

impl<'a> PhysRegion<'a> {
    pub fn new(base: u64, bytes: &'a mut [u8]) -> Self {
        Self { base, bytes }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn end(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }

    fn span(&self, addr: u64, len: usize) -> Result<Range<usize>, OutOfRange> {
        let oob = OutOfRange { addr, len };
        let start = addr.checked_sub(self.base).ok_or(oob)?;
        let start = usize::try_from(start).map_err(|_| oob)?;
        let end = start.checked_add(len).ok_or(oob)?;
        if end > self.bytes.len() {
            return Err(oob);
        }
        Ok(start..end)
    }

    pub fn write(&mut self, addr: u64, src: &[u8]) -> Result<(), OutOfRange> {
        let span = self.span(addr, src.len())?;
        self.bytes[span].copy_from_slice(src);
        Ok(())
    }

    pub fn zero(&mut self, addr: u64, len: usize) -> Result<(), OutOfRange> {
        let span = self.span(addr, len)?;
        self.bytes[span].fill(0);
        Ok(())
    }

    pub fn read(&self, addr: u64, len: usize) -> Result<&[u8], OutOfRange> {
        let span = self.span(addr, len)?;
        Ok(&self.bytes[span])
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64, OutOfRange> {
        let bytes = self.read(addr, 8)?;
        Ok(ByteView::new(bytes).u64_at(0).unwrap_or_default())
    }

    pub fn fill(&mut self, byte: u8) {
        self.bytes.fill(byte);
    }
}
