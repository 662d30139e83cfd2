// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Entry point: parse arguments, open the tap transport, build a [`Shim`]
//! and run it until asked to stop.

mod framing;
mod logging;
mod shim;
mod shutdown;

use std::os::unix::net::UnixListener;

use clap::Parser;
use color_eyre::eyre::{Context, Result};

use config::{CmdArgs, Config};
use shim::Shim;
use tap::{RawTap, StreamTap, Transport};

fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init_logging();

    let args = CmdArgs::parse();
    let config = Config::from_args(&args).wrap_err("invalid configuration")?;

    let transport = open_transport(&config).wrap_err("failed to open tap transport")?;
    let shutdown = shutdown::install();

    let mut shim = Shim::new(config, transport).wrap_err("failed to initialize shim")?;
    shim.run(&shutdown).wrap_err("event loop failed")?;

    tracing::info!("shutting down");
    Ok(())
}

/// Open the tap side: a framed Unix-domain stream if `--socket-path` was
/// given, otherwise a raw `/dev/net/tun` TAP device named
/// [`shim::TAP_IFNAME`].
fn open_transport(config: &Config) -> Result<Transport> {
    if let Some(path) = &config.socket_path {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path).wrap_err("failed to bind framed-stream socket")?;
        tracing::info!(path = %path.display(), "waiting for client connection");
        let (stream, _) = listener.accept().wrap_err("failed to accept client connection")?;
        Ok(Transport::Stream(StreamTap::new(stream)))
    } else {
        let tap = RawTap::open(shim::TAP_IFNAME).wrap_err("failed to open tap device")?;
        Ok(Transport::Raw(tap))
    }
}
