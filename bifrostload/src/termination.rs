// SPDX-License-Identifier: JOSSL-1.0
// Copyright (C) 2025 The Jotunheim Project

//! Leaving boot services.
//!
//! `ExitBootServices` only succeeds with the key of the latest memory map,
//! and the first attempt is allowed to fail if the map changed under us.
//! We then refresh the map into the same storage and try exactly once more.
//! Nothing may call into the firmware between that refresh and the retry,
//! so this module does not log until the outcome is known.

use log::debug;

use crate::error::{BootError, Result};
use crate::firmware::BootServices;
use crate::memory_map::MemoryMap;

/// Proof that boot services have been terminated.
///
/// Only [`exit_boot_services`] creates one, and entering the kernel
/// consumes it.
#[derive(Debug)]
pub struct Terminated {
    _private: (),
}

/// Exit boot services using the key of `map`, retrying once.
///
/// On success `map` holds the snapshot the firmware accepted, which is
/// the final memory map of this boot.
pub fn exit_boot_services<S: BootServices>(
    services: &mut S,
    map: &mut MemoryMap<'_>,
) -> Result<Terminated> {
    services.quiesce_console();

    let first = match services.exit_boot_services(map.map_key().0) {
        Ok(()) => return Ok(Terminated { _private: () }),
        Err(status) => status,
    };

    map.capture(services)?;
    match services.exit_boot_services(map.map_key().0) {
        Ok(()) => {
            debug!("ExitBootServices: first attempt {:?}, retry succeeded", first);
            Ok(Terminated { _private: () })
        }
        Err(status) => Err(BootError::TerminationFailure(status)),
    }
}
