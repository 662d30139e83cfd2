// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! `SIGINT`/`SIGTERM` handling, grounded on the teacher's `ctrlc::set_handler`
//! idiom in the pre-transform `netshim-bin/src/main.rs::main`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Install a `ctrlc` handler flipping a shared flag; the dispatch loop
/// polls it once per iteration rather than unwinding out of the loop.
///
/// # Panics
///
/// Panics if a signal handler is already installed.
#[must_use]
pub fn install() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .expect("failed to install SIGINT/SIGTERM handler");
    shutdown
}

/// True once the handler has fired.
#[must_use]
pub fn requested(shutdown: &AtomicBool) -> bool {
    shutdown.load(Ordering::SeqCst)
}
