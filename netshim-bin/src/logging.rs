// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Logging setup, grounded on the teacher's `tracing_subscriber::fmt()`
//! idiom (`netshim-bin/src/main.rs::init_logging` in the pre-transform
//! tree). Default level is `info`, not the teacher's `debug` default: a
//! userspace shim expected to run unattended under `pasta`-style wrappers
//! shouldn't default to debug-level noise (see DESIGN.md).
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();
}
