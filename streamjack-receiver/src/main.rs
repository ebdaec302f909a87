//! Entry point: opens a JACK client, binds a `mio`-based TCP acceptor to
//! `streamjack_core::receiver::run`, and tears everything down on SIGINT.

use std::collections::HashMap;
use std::io;
use std::net::TcpListener;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use clap::Parser;

use streamjack_core::cli::ReceiverArgs;
use streamjack_core::config::{SharedState, NPORT};
use streamjack_jack::{JackPortFactory, ReceiverProcessHandler, SessionPorts};

fn main() -> io::Result<()> {
    let args = ReceiverArgs::parse();
    init_logging(args.verbose);

    let (jack_client, status) =
        jack::Client::new("streamjack-receiver", jack::ClientOptions::NO_START_SERVER)
            .map_err(|e| io::Error::other(e.to_string()))?;
    log::info!("JACK client started, status: {status:?}");
    let device_rate = jack_client.sample_rate();

    let shared = SharedState::new();
    let registry: streamjack_core::receiver::Registry<SessionPorts> =
        Arc::new(Mutex::new(HashMap::new()));

    let handler =
        ReceiverProcessHandler::new(registry.clone(), jack_client.buffer_size() as usize, NPORT);
    let active_client = jack_client
        .activate_async((), handler)
        .map_err(|e| io::Error::other(e.to_string()))?;

    {
        let shared = shared.clone();
        ctrlc::set_handler(move || {
            log::info!("SIGINT received, shutting down");
            shared.exit_program.store(true, Ordering::Release);
        })
        .map_err(|e| io::Error::other(e.to_string()))?;
    }

    let listener = TcpListener::bind(("0.0.0.0", args.port))?;
    log::info!(
        "listening on port {} for {NPORT}-channel streams at {device_rate} Hz",
        args.port
    );

    let port_factory = JackPortFactory::new(active_client.as_client(), args.base_name.clone());

    let result = streamjack_core::receiver::run(
        listener,
        NPORT,
        device_rate,
        shared,
        registry,
        port_factory,
    );

    drop(active_client);
    result
}

fn init_logging(verbose: u8) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbose > 0 && std::env::var("RUST_LOG").is_err() {
        let level = if verbose == 1 {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Trace
        };
        builder.filter_level(level);
    }
    builder.init();
}
