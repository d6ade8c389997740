// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

use core::fmt;
use uefi::Status;

/// Everything that can stop the loader before the kernel is entered.
///
/// None of these are recoverable: the application prints the error and
/// halts. Only the memory map dump swallows errors, see
/// [`crate::diagnostics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// A firmware service or protocol lookup failed.
    ResourceUnavailable { op: &'static str, status: Status },
    /// No handle implements the graphics output protocol.
    NoDisplayDevice,
    /// The caller supplied buffer cannot hold what the firmware reported.
    BufferTooSmall { required: usize, capacity: usize },
    /// Firmware pixel layout the kernel has no writer for (raw GOP code).
    UnsupportedConfiguration(u32),
    /// The kernel file cannot be placed as-is.
    MalformedImage(&'static str),
    /// The fixed-address allocation for the kernel footprint was refused.
    AllocationFailure { base: u64, pages: usize, status: Status },
    /// ExitBootServices rejected the refreshed map key as well.
    TerminationFailure(Status),
}

impl BootError {
    /// Shorthand for `map_err` on firmware primitives.
    pub fn firmware(op: &'static str) -> impl FnOnce(Status) -> BootError {
        move |status| BootError::ResourceUnavailable { op, status }
    }

    /// Firmware status code reported alongside the message.
    pub fn status(&self) -> Status {
        match *self {
            BootError::ResourceUnavailable { status, .. } => status,
            BootError::NoDisplayDevice => Status::NOT_FOUND,
            BootError::BufferTooSmall { .. } => Status::BUFFER_TOO_SMALL,
            BootError::UnsupportedConfiguration(_) => Status::UNSUPPORTED,
            BootError::MalformedImage(_) => Status::LOAD_ERROR,
            BootError::AllocationFailure { status, .. } => status,
            BootError::TerminationFailure(status) => status,
        }
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::ResourceUnavailable { op, status } => {
                write!(f, "failed to {op}: {status:?}")
            }
            BootError::NoDisplayDevice => f.write_str("failed to open GOP: no display device"),
            BootError::BufferTooSmall { required, capacity } => write!(
                f,
                "buffer too small: firmware needs {required} bytes, have {capacity}"
            ),
            BootError::UnsupportedConfiguration(code) => {
                write!(f, "unimplemented pixel format: {code}")
            }
            BootError::MalformedImage(reason) => write!(f, "malformed kernel image: {reason}"),
            BootError::AllocationFailure { base, pages, status } => write!(
                f,
                "failed to allocate {pages} pages at 0x{base:x}: {status:?}"
            ),
            BootError::TerminationFailure(status) => {
                write!(f, "could not exit boot services: {status:?}")
            }
        }
    }
}

pub type Result<T, E = BootError> = core::result::Result<T, E>;
