// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! Memory map snapshot into caller-owned storage.

use log::debug;
use uefi::Status;
use uefi::mem::memory_map::MemoryType;

use crate::error::{BootError, Result};
use crate::firmware::{BootServices, MapInfo};
use crate::region::ByteView;

/// Bytes of `EFI_MEMORY_DESCRIPTOR` the loader reads. Firmware may use a
/// larger stride.
pub const DESCRIPTOR_LEN: usize = 40;

/// Key the firmware issued with a snapshot; ExitBootServices wants it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapKey(pub usize);

/// One decoded memory descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDescriptor {
    pub ty: MemoryType,
    pub phys_start: u64,
    pub page_count: u64,
    pub attribute: u64,
}

impl MemoryDescriptor {
    fn decode(raw: &[u8]) -> Option<Self> {
        let v = ByteView::new(raw);
        Some(Self {
            ty: MemoryType(v.u32_at(0)?),
            phys_start: v.u64_at(8)?,
            page_count: v.u64_at(24)?,
            attribute: v.u64_at(32)?,
        })
    }
}

/// The firmware memory map, stored in a buffer the caller owns.
///
/// Only meaningful after [`MemoryMap::capture`] succeeded. Capturing again
/// overwrites everything.
pub struct MemoryMap<'buf> {
    buf: &'buf mut [u8],
    map_size: usize,
    map_key: MapKey,
    descriptor_size: usize,
    descriptor_version: u32,
}

impl<'buf> MemoryMap<'buf> {
    pub fn new(buf: &'buf mut [u8]) -> Self {
        Self {
            buf,
            map_size: 0,
            map_key: MapKey(0),
            descriptor_size: 0,
            descriptor_version: 0,
        }
    }

    /// Query the firmware once and replace the snapshot.
    pub fn capture<S: BootServices>(&mut self, services: &mut S) -> Result<()> {
        if self.buf.is_empty() {
            return Err(BootError::BufferTooSmall {
                required: 0,
                capacity: 0,
            });
        }

        let info = match services.get_memory_map(self.buf) {
            Ok(info) => info,
            Err((Status::BUFFER_TOO_SMALL, required)) => {
                return Err(BootError::BufferTooSmall {
                    required,
                    capacity: self.buf.len(),
                });
            }
            Err((status, _)) => {
                return Err(BootError::ResourceUnavailable {
                    op: "get memory map",
                    status,
                });
            }
        };
        // Never trust a size larger than what we handed over.
        if info.map_size > self.buf.len() {
            return Err(BootError::BufferTooSmall {
                required: info.map_size,
                capacity: self.buf.len(),
            });
        }
        // The storage now holds descriptors the loader cannot read.
        if info.descriptor_size < DESCRIPTOR_LEN {
            self.map_size = 0;
            return Err(BootError::ResourceUnavailable {
                op: "decode memory map",
                status: Status::INCOMPATIBLE_VERSION,
            });
        }

        let MapInfo {
            map_size,
            map_key,
            descriptor_size,
            descriptor_version,
        } = info;
        self.map_size = map_size;
        self.map_key = MapKey(map_key);
        self.descriptor_size = descriptor_size;
        self.descriptor_version = descriptor_version;
        debug!(
            "memory map: {} bytes, stride {}, key {:#x}",
            map_size, descriptor_size, map_key
        );
        Ok(())
    }

    pub fn buffer_addr(&self) -> usize {
        self.buf.as_ptr() as usize
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn map_size(&self) -> usize {
        self.map_size
    }

    pub fn map_key(&self) -> MapKey {
        self.map_key
    }

    pub fn descriptor_size(&self) -> usize {
        self.descriptor_size
    }

    pub fn descriptor_version(&self) -> u32 {
        self.descriptor_version
    }

    /// Number of descriptors in the snapshot.
    pub fn len(&self) -> usize {
        // Nothing captured yet.
        if self.descriptor_size < DESCRIPTOR_LEN {
            return 0;
        }
        self.map_size / self.descriptor_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> impl Iterator<Item = MemoryDescriptor> + '_ {
        let stride = self.descriptor_size.max(DESCRIPTOR_LEN);
        self.buf[..self.map_size]
            .chunks_exact(stride)
            .take(self.len())
            .filter_map(MemoryDescriptor::decode)
    }
}
