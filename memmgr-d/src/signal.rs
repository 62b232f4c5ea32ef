// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: GPL-2.0-only

//! Unix signal handler registration.
//!
//! Use the nix crate to register the termination signals, while keeping any
//! specific notion of libc within this module only. The handler posts a
//! shutdown event on the coordinator's event channel, so signal handling
//! reduces to one more event in the loop.

use crate::bus::Event;
use lazy_static::lazy_static;
use nix::sys::signal;
use std::io::Result;
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use tracing::{error, info};

lazy_static! {
    /// Event sender installed by the main thread before signals are enabled.
    ///
    /// Signal handlers have a predefined signature; a static is the channel
    /// through which the handler reaches the coordinator.
    static ref SHUTDOWN_TX: Mutex<Option<Sender<Event>>> = Mutex::new(None);
}

/// The one and unique signal handler.
///
/// Although unlikely, there is always the risk the registration function
/// holds the lock while the main thread is interrupted by a signal. Do not
/// deadlock in interrupted context: try the lock and bail out if it cannot
/// be acquired.
extern "C" fn main_signal_handler(_signum: libc::c_int) {
    let Ok(tx) = SHUTDOWN_TX.try_lock() else {
        return;
    };
    if let Some(tx) = tx.as_ref() {
        let _ = tx.send(Event::Shutdown);
    }
}

/// Enable a UNIX signal via sigaction.
///
/// Gathers all libc crate and C types unsafe code here.
fn enable_signal(sig: signal::Signal) -> Result<()> {
    let handler = signal::SigHandler::Handler(main_signal_handler);
    let mask = signal::SigSet::empty();
    let mut flags = signal::SaFlags::empty();
    flags.insert(signal::SaFlags::SA_RESTART);
    flags.insert(signal::SaFlags::SA_NOCLDSTOP);

    let sig_action = signal::SigAction::new(handler, flags, mask);

    match unsafe { signal::sigaction(sig, &sig_action) } {
        Ok(_) => Ok(()),
        Err(_) => Err(std::io::Error::last_os_error()),
    }
}

/// Route SIGTERM and SIGINT to a shutdown event on the coordinator loop.
///
/// Should be called on the main thread, before the event loop starts.
pub fn register_shutdown_signals(tx: Sender<Event>) -> Result<()> {
    *SHUTDOWN_TX.lock().unwrap() = Some(tx);

    for sig in [signal::SIGTERM, signal::SIGINT] {
        match enable_signal(sig) {
            Ok(()) => info!("registered shutdown handler for signal {}", sig),
            Err(e) => {
                error!("failed to register handler for signal {}: {}", sig, e);
                return Err(e);
            }
        }
    }
    Ok(())
}
