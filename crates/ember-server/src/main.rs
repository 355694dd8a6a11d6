use std::{io, sync::atomic::Ordering};

use clap::Parser;
use ember_server::{Opts, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts = Opts::parse();
    let mut server = Server::bind(&opts)?;
    info!(addr = %server.local_addr(), "ember-server up");

    let flag = server.shutdown_flag();
    let waker = server.waker();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = waker.wake();
    })
    .map_err(io::Error::other)?;

    server.run()
}
