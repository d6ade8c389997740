// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! `log` backend: every record goes to serial, and to the firmware console
//! until boot services are about to end.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{LevelFilter, Log, Metadata, Record};

use crate::serial;

static CONSOLE: AtomicBool = AtomicBool::new(false);
static LOGGER: BootLogger = BootLogger;

struct BootLogger;

impl Log for BootLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        serial::write_fmt(format_args!("[{:<5}] {}\r\n", record.level(), record.args()));
        if CONSOLE.load(Ordering::Acquire) {
            uefi::system::with_stdout(|out| {
                let _ = writeln!(out, "{}", record.args());
            });
        }
    }

    fn flush(&self) {}
}

pub fn init(level: LevelFilter) {
    CONSOLE.store(true, Ordering::Release);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Stop using the firmware console. Serial output continues.
pub fn detach_console() {
    CONSOLE.store(false, Ordering::Release);
}
