// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! In-memory firmware and ELF images for unit tests.
//!
//! Like real firmware, every boot service call except `GetMemoryMap`
//! changes the map key. Closing an opened volume or file is a call too,
//! whether explicit or by drop. Calls after a successful
//! `ExitBootServices` are counted, see [`FakeFirmware::calls_after_exit`].

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use uefi::Status;
use uefi::mem::memory_map::MemoryType;

use crate::elf_loader::LoadSegment;
use crate::firmware::{BootServices, DisplayMode, File, MapInfo, Volume};
use crate::memory_map::MemoryDescriptor;

/// Map key and exit state shared by the firmware and its file handles.
#[derive(Default)]
pub struct FirmwareState {
    key: Cell<usize>,
    exited: Cell<bool>,
    /// Calls, including handle releases, made after a successful exit.
    after_exit: Cell<usize>,
}

impl FirmwareState {
    fn tick(&self) {
        if self.exited.get() {
            self.after_exit.set(self.after_exit.get() + 1);
        }
        self.key.set(self.key.get() + 1);
    }
}

pub struct FakeFirmware {
    state: Rc<FirmwareState>,
    descriptors: Vec<MemoryDescriptor>,
    descriptor_size: usize,
    display_handles: usize,
    pixel_format: u32,
    frame_buffer: Option<(*const u8, usize)>,

    pub volume: FakeVolume,
    pub memory_map_calls: usize,
    pub memory_map_status: Option<Status>,
    pub image_device_status: Option<Status>,
    pub volume_status: Option<Status>,
    pub allocate_status: Option<Status>,
    pub allocations: Vec<(u64, usize)>,
    pub opened_displays: usize,
    pub last_display_handle: Option<usize>,
    /// Reject the first ExitBootServices no matter the key.
    pub reject_first_exit: bool,
    pub reject_every_exit: bool,
    pub exit_attempts: Vec<usize>,
    /// Map key at the time the console was detached.
    pub console_quiesced_at: Option<usize>,
}

impl FakeFirmware {
    pub fn new() -> Self {
        let state = Rc::new(FirmwareState::default());
        let volume = FakeVolume::with_state(state.clone());
        Self {
            state,
            descriptors: vec![
                MemoryDescriptor {
                    ty: MemoryType::BOOT_SERVICES_CODE,
                    phys_start: 0,
                    page_count: 1,
                    attribute: 0xF,
                },
                MemoryDescriptor {
                    ty: MemoryType::CONVENTIONAL,
                    phys_start: 0x1000,
                    page_count: 0x9F,
                    attribute: 0xF,
                },
            ],
            descriptor_size: 48,
            display_handles: 1,
            pixel_format: 1,
            frame_buffer: None,
            volume,
            memory_map_calls: 0,
            memory_map_status: None,
            image_device_status: None,
            volume_status: None,
            allocate_status: None,
            allocations: Vec::new(),
            opened_displays: 0,
            last_display_handle: None,
            reject_first_exit: false,
            reject_every_exit: false,
            exit_attempts: Vec::new(),
            console_quiesced_at: None,
        }
    }

    pub fn with_descriptors(mut self, descriptors: Vec<MemoryDescriptor>) -> Self {
        self.descriptors = descriptors;
        self
    }

    pub fn with_descriptor_size(mut self, size: usize) -> Self {
        self.descriptor_size = size;
        self
    }

    pub fn with_display_handles(mut self, count: usize) -> Self {
        self.display_handles = count;
        self
    }

    pub fn without_display(self) -> Self {
        self.with_display_handles(0)
    }

    pub fn with_pixel_format(mut self, code: u32) -> Self {
        self.pixel_format = code;
        self
    }

    pub fn with_file(self, path: &str, bytes: &[u8]) -> Self {
        self.volume.insert(path, bytes);
        self
    }

    /// Replace the memory layout, as an allocation would.
    pub fn set_descriptors(&mut self, descriptors: Vec<MemoryDescriptor>) {
        self.descriptors = descriptors;
        self.state.tick();
    }

    pub fn current_key(&self) -> usize {
        self.state.key.get()
    }

    pub fn exited(&self) -> bool {
        self.state.exited.get()
    }

    pub fn calls_after_exit(&self) -> usize {
        self.state.after_exit.get()
    }

    /// Contents of the last frame buffer handed out.
    pub fn frame_buffer(&self) -> &[u8] {
        match self.frame_buffer {
            // SAFETY: leaked in `open_display`, never freed.
            Some((ptr, len)) => unsafe { core::slice::from_raw_parts(ptr, len) },
            None => &[],
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        for (i, d) in self.descriptors.iter().enumerate() {
            let mut full = [0u8; 40];
            full[0..4].copy_from_slice(&d.ty.0.to_le_bytes());
            full[8..16].copy_from_slice(&d.phys_start.to_le_bytes());
            full[16..24].copy_from_slice(&d.phys_start.to_le_bytes());
            full[24..32].copy_from_slice(&d.page_count.to_le_bytes());
            full[32..40].copy_from_slice(&d.attribute.to_le_bytes());

            // A stride shorter than the descriptor truncates it.
            let raw = &mut buf[i * self.descriptor_size..(i + 1) * self.descriptor_size];
            raw.fill(0);
            let n = raw.len().min(full.len());
            raw[..n].copy_from_slice(&full[..n]);
        }
    }
}

impl Default for FakeFirmware {
    fn default() -> Self {
        Self::new()
    }
}

impl BootServices for FakeFirmware {
    type Handle = usize;
    type Volume = FakeVolume;

    fn get_memory_map(&mut self, buf: &mut [u8]) -> Result<MapInfo, (Status, usize)> {
        assert!(!self.exited(), "GetMemoryMap after ExitBootServices");
        self.memory_map_calls += 1;
        if let Some(status) = self.memory_map_status {
            return Err((status, 0));
        }
        let needed = self.descriptors.len() * self.descriptor_size;
        if buf.len() < needed {
            return Err((Status::BUFFER_TOO_SMALL, needed));
        }
        self.encode(buf);
        Ok(MapInfo {
            map_size: needed,
            map_key: self.current_key(),
            descriptor_size: self.descriptor_size,
            descriptor_version: 1,
        })
    }

    fn image_device(&mut self) -> Result<usize, Status> {
        self.state.tick();
        self.image_device_status.map_or(Ok(7), Err)
    }

    fn open_volume(&mut self, _device: usize) -> Result<FakeVolume, Status> {
        self.state.tick();
        match self.volume_status {
            Some(status) => Err(status),
            None => {
                let mut volume = self.volume.clone();
                volume.opened = true;
                Ok(volume)
            }
        }
    }

    fn display_handles(&mut self) -> Result<Vec<usize>, Status> {
        self.state.tick();
        Ok((0..self.display_handles).collect())
    }

    fn open_display(&mut self, handle: usize) -> Result<DisplayMode, Status> {
        self.state.tick();
        self.opened_displays += 1;
        self.last_display_handle = Some(handle);

        let (width, height) = (8u32, 4u32);
        let size = (width * height * 4) as usize;
        let frame_buffer: &'static mut [u8] = Box::leak(vec![0u8; size].into_boxed_slice());
        self.frame_buffer = Some((frame_buffer.as_ptr(), size));
        Ok(DisplayMode {
            horizontal_resolution: width,
            vertical_resolution: height,
            pixels_per_scan_line: width,
            pixel_format: self.pixel_format,
            frame_buffer_base: 0x8000_0000,
            frame_buffer_size: size,
            frame_buffer,
        })
    }

    fn allocate_pages_at(&mut self, base: u64, pages: usize) -> Result<&'static mut [u8], Status> {
        self.state.tick();
        if let Some(status) = self.allocate_status {
            return Err(status);
        }
        self.allocations.push((base, pages));
        Ok(Box::leak(vec![0xCC; pages * 4096].into_boxed_slice()))
    }

    fn quiesce_console(&mut self) {
        self.console_quiesced_at = Some(self.current_key());
    }

    fn exit_boot_services(&mut self, map_key: usize) -> Result<(), Status> {
        assert!(!self.exited(), "ExitBootServices called twice");
        self.exit_attempts.push(map_key);
        let first = self.exit_attempts.len() == 1;
        if self.reject_every_exit
            || (self.reject_first_exit && first)
            || map_key != self.current_key()
        {
            return Err(Status::INVALID_PARAMETER);
        }
        self.state.exited.set(true);
        Ok(())
    }
}

/// A directory whose files live in memory. Clones share contents.
#[derive(Clone)]
pub struct FakeVolume {
    state: Rc<FirmwareState>,
    files: Rc<RefCell<BTreeMap<String, Rc<RefCell<Vec<u8>>>>>>,
    pub closed: Rc<Cell<usize>>,
    pub create_status: Option<Status>,
    pub write_status: Option<Status>,
    /// Largest read the fake serves at once.
    pub read_chunk: usize,
    /// Handed out by `open_volume`; dropping it closes the protocol.
    opened: bool,
}

impl Drop for FakeVolume {
    fn drop(&mut self) {
        if self.opened {
            self.state.tick();
        }
    }
}

impl Default for FakeVolume {
    fn default() -> Self {
        Self::with_state(Rc::new(FirmwareState::default()))
    }
}

impl FakeVolume {
    fn with_state(state: Rc<FirmwareState>) -> Self {
        Self {
            state,
            files: Rc::default(),
            closed: Rc::default(),
            create_status: None,
            write_status: None,
            read_chunk: 4096,
            opened: false,
        }
    }

    pub fn insert(&self, path: &str, bytes: &[u8]) {
        self.files
            .borrow_mut()
            .insert(path.to_string(), Rc::new(RefCell::new(bytes.to_vec())));
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(path).map(|f| f.borrow().clone())
    }

    fn handle(&self, data: Rc<RefCell<Vec<u8>>>) -> FakeFile {
        FakeFile {
            state: self.state.clone(),
            data,
            pos: 0,
            closed: self.closed.clone(),
            write_status: self.write_status,
            read_chunk: self.read_chunk,
            released: false,
        }
    }
}

impl Volume for FakeVolume {
    type File = FakeFile;

    fn create(&mut self, path: &str) -> Result<FakeFile, Status> {
        self.state.tick();
        if let Some(status) = self.create_status {
            return Err(status);
        }
        let data = Rc::new(RefCell::new(Vec::new()));
        self.files.borrow_mut().insert(path.to_string(), data.clone());
        Ok(self.handle(data))
    }

    fn open_read(&mut self, path: &str) -> Result<FakeFile, Status> {
        self.state.tick();
        let data = self.files.borrow().get(path).cloned();
        data.map(|d| self.handle(d)).ok_or(Status::NOT_FOUND)
    }
}

pub struct FakeFile {
    state: Rc<FirmwareState>,
    data: Rc<RefCell<Vec<u8>>>,
    pos: usize,
    closed: Rc<Cell<usize>>,
    write_status: Option<Status>,
    read_chunk: usize,
    released: bool,
}

impl Drop for FakeFile {
    fn drop(&mut self) {
        if !self.released {
            self.state.tick();
        }
    }
}

impl File for FakeFile {
    fn size(&mut self) -> Result<u64, Status> {
        self.state.tick();
        Ok(self.data.borrow().len() as u64)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Status> {
        self.state.tick();
        let data = self.data.borrow();
        let n = buf.len().min(data.len() - self.pos).min(self.read_chunk);
        buf[..n].copy_from_slice(&data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Status> {
        self.state.tick();
        if let Some(status) = self.write_status {
            return Err(status);
        }
        self.data.borrow_mut().extend_from_slice(bytes);
        Ok(())
    }

    fn close(mut self) -> Result<(), Status> {
        self.released = true;
        self.state.tick();
        self.closed.set(self.closed.get() + 1);
        Ok(())
    }
}

enum Content {
    /// `len` bytes at `start` of the builder's data blob.
    Data { start: usize, len: usize },
    /// Explicit file range, possibly bogus.
    Raw { offset: u64, file_size: u64 },
    /// The ELF and program headers themselves.
    Headers,
}

struct PendingHeader {
    p_type: u32,
    vaddr: u64,
    mem_size: u64,
    content: Content,
}

/// Assembles minimal little-endian ELF64 executables.
pub struct ElfBuilder {
    entry: u64,
    headers: Vec<PendingHeader>,
    data: Vec<u8>,
}

impl ElfBuilder {
    pub const PT_LOAD: u32 = 1;
    pub const PT_NOTE: u32 = 4;

    pub fn new(entry: u64) -> Self {
        Self {
            entry,
            headers: Vec::new(),
            data: Vec::new(),
        }
    }

    /// `PT_LOAD` with `data` from the file, zero-filled up to `mem_size`.
    pub fn segment(mut self, vaddr: u64, data: &[u8], mem_size: u64) -> Self {
        let start = self.data.len();
        self.data.extend_from_slice(data);
        self.headers.push(PendingHeader {
            p_type: Self::PT_LOAD,
            vaddr,
            mem_size,
            content: Content::Data {
                start,
                len: data.len(),
            },
        });
        self
    }

    /// `PT_LOAD` starting at file offset 0, so the ELF header is resident
    /// at `vaddr`.
    pub fn headers_segment(mut self, vaddr: u64, mem_size: u64) -> Self {
        self.headers.push(PendingHeader {
            p_type: Self::PT_LOAD,
            vaddr,
            mem_size,
            content: Content::Headers,
        });
        self
    }

    pub fn raw_segment(mut self, seg: LoadSegment) -> Self {
        self.headers.push(PendingHeader {
            p_type: Self::PT_LOAD,
            vaddr: seg.vaddr,
            mem_size: seg.mem_size,
            content: Content::Raw {
                offset: seg.offset,
                file_size: seg.file_size,
            },
        });
        self
    }

    pub fn note(mut self, vaddr: u64, size: u64) -> Self {
        self.headers.push(PendingHeader {
            p_type: Self::PT_NOTE,
            vaddr,
            mem_size: size,
            content: Content::Raw {
                offset: 0,
                file_size: size,
            },
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        let phnum = self.headers.len();
        let data_start = 64 + phnum * 56;
        let mut out = Vec::with_capacity(data_start + self.data.len());

        out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        out.extend_from_slice(&0x3Eu16.to_le_bytes()); // x86-64
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&self.entry.to_le_bytes());
        out.extend_from_slice(&(if phnum > 0 { 64u64 } else { 0 }).to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&56u16.to_le_bytes());
        out.extend_from_slice(&(phnum as u16).to_le_bytes());
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        debug_assert_eq!(out.len(), 64);

        for h in &self.headers {
            let (offset, file_size) = match h.content {
                Content::Data { start, len } => ((data_start + start) as u64, len as u64),
                Content::Raw { offset, file_size } => (offset, file_size),
                Content::Headers => (0, data_start as u64),
            };
            out.extend_from_slice(&h.p_type.to_le_bytes());
            out.extend_from_slice(&7u32.to_le_bytes()); // RWX
            out.extend_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&h.vaddr.to_le_bytes());
            out.extend_from_slice(&h.vaddr.to_le_bytes());
            out.extend_from_slice(&file_size.to_le_bytes());
            out.extend_from_slice(&h.mem_size.to_le_bytes());
            out.extend_from_slice(&0x1000u64.to_le_bytes());
        }
        out.extend_from_slice(&self.data);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf_loader::ElfImage;

    #[test]
    fn built_images_parse_back() {
        let bytes = ElfBuilder::new(0x10_1000)
            .headers_segment(0x10_0000, 0x1000)
            .segment(0x10_1000, &[0x90; 16], 32)
            .build();
        let image = ElfImage::parse(&bytes).unwrap();
        assert_eq!(image.entry_point(), 0x10_1000);
        let segs: Vec<_> = image.load_segments().collect();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].offset, 0);
        assert_eq!(segs[0].file_size, 64 + 2 * 56);
        assert_eq!(segs[1].offset, 64 + 2 * 56);
    }

    #[test]
    fn service_calls_move_the_map_key() {
        let mut fw = FakeFirmware::new();
        let before = fw.current_key();
        let mut buf = [0u8; 256];
        fw.get_memory_map(&mut buf).unwrap();
        assert_eq!(fw.current_key(), before);
        fw.image_device().unwrap();
        assert_eq!(fw.current_key(), before + 1);
    }

    #[test]
    fn releasing_handles_is_a_firmware_call() {
        let mut fw = FakeFirmware::new().with_file("a", b"x");
        let mut volume = fw.open_volume(7).unwrap();
        let file = volume.open_read("a").unwrap();
        let before = fw.current_key();
        drop(file);
        assert_eq!(fw.current_key(), before + 1);

        let mut buf = [0u8; 256];
        let info = fw.get_memory_map(&mut buf).unwrap();
        fw.exit_boot_services(info.map_key).unwrap();
        drop(volume);
        assert_eq!(fw.calls_after_exit(), 1);
    }
}
