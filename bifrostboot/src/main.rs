// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! Bifrost UEFI application.
//!
//! Loads `\kernel.elf` at its link address and calls it with the frame
//! buffer description. Build with
//! `cargo build -p bifrostboot --target x86_64-unknown-uefi`.

#![cfg_attr(target_os = "uefi", no_std)]
#![cfg_attr(target_os = "uefi", no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(target_os = "uefi")]
extern crate alloc;

#[cfg(target_os = "uefi")]
mod firmware;
#[cfg(target_os = "uefi")]
mod logger;
#[cfg(target_os = "uefi")]
mod serial;

#[cfg(target_os = "uefi")]
mod app {
    use bifrostload::config::{LOG_LEVEL, MEMMAP_BUFFER_SIZE};
    use bifrostload::{BootError, MemoryMap, prepare_handoff};
    use log::{error, info};
    use uefi::{Status, boot, entry};

    use crate::firmware::UefiServices;
    use crate::{logger, serial};

    #[global_allocator]
    static ALLOCATOR: uefi::allocator::Allocator = uefi::allocator::Allocator;

    /// Memory map storage; the firmware wants descriptor alignment.
    #[repr(C, align(8))]
    struct MapStorage([u8; MEMMAP_BUFFER_SIZE]);

    #[entry]
    fn main() -> Status {
        // SAFETY: COM1 belongs to the loader; the firmware console is GOP.
        unsafe { serial::init() };
        logger::init(LOG_LEVEL);
        info!("bifrost loader");

        let mut services = UefiServices::new(boot::image_handle());
        let mut storage = MapStorage([0; MEMMAP_BUFFER_SIZE]);
        let mut map = MemoryMap::new(&mut storage.0);

        let handoff = match prepare_handoff(&mut services, &mut map) {
            Ok(handoff) => handoff,
            Err(e) => die(e),
        };
        // SAFETY: the kernel was just placed at its link address and nothing
        // has run since boot services ended.
        unsafe { handoff.enter() }
    }

    #[cold]
    fn die(err: BootError) -> ! {
        error!("{} ({:?})", err, err.status());
        halt()
    }

    fn halt() -> ! {
        x86_64::instructions::interrupts::disable();
        loop {
            x86_64::instructions::hlt();
        }
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
        serial::try_write_fmt(format_args!("[PANIC] {}\r\n", info));
        halt()
    }
}

#[cfg(not(target_os = "uefi"))]
fn main() {
    eprintln!("bifrostboot only runs as a UEFI application (x86_64-unknown-uefi)");
}
