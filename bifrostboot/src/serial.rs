// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! COM1 output. Works before and after ExitBootServices.

use core::fmt::{self, Write};
use spin::Mutex;
use uart_16550::SerialPort;

pub const COM1: u16 = 0x3F8;

static PORT: Mutex<Option<SerialPort>> = Mutex::new(None);

/// # Safety
/// `COM1` must be a 16550 UART nobody else drives.
pub unsafe fn init() {
    let mut port = unsafe { SerialPort::new(COM1) };
    port.init();
    *PORT.lock() = Some(port);
}

pub fn write_fmt(args: fmt::Arguments<'_>) {
    if let Some(port) = PORT.lock().as_mut() {
        let _ = port.write_fmt(args);
    }
}

/// Like [`write_fmt`], but gives up instead of spinning on a held lock.
/// For the panic path, which may have interrupted a writer.
pub fn try_write_fmt(args: fmt::Arguments<'_>) {
    if let Some(mut guard) = PORT.try_lock() {
        if let Some(port) = guard.as_mut() {
            let _ = port.write_fmt(args);
        }
    }
}
