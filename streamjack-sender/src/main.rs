//! Entry point: opens a JACK client, registers and connects the sender's
//! fixed `output_TCP_<i>` ports, then runs the reconnecting net loop
//! against a real-time-safe ring fed directly from the JACK process
//! callback.

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;

use streamjack_core::cli::SenderArgs;
use streamjack_core::config::{CLIENT_RINGBUFFER_BYTES, NPORT};

fn main() -> io::Result<()> {
    let args = SenderArgs::parse();
    init_logging(args.verbose);

    let (jack_client, status) =
        jack::Client::new("streamjack-sender", jack::ClientOptions::NO_START_SERVER)
            .map_err(|e| io::Error::other(e.to_string()))?;
    log::info!("JACK client started, status: {status:?}");

    let device_rate = jack_client.sample_rate();
    let ports = streamjack_jack::open_sender_ports(&jack_client, &args.base_name, NPORT)?;

    let (producer, consumer) = netring::ring(CLIENT_RINGBUFFER_BYTES);
    let running = Arc::new(AtomicBool::new(false));

    let handler = streamjack_jack::SenderProcessHandler::new(ports, producer, running.clone());
    let active_client = jack_client
        .activate_async((), handler)
        .map_err(|e| io::Error::other(e.to_string()))?;

    let (host, port) = args.target();
    log::info!("streaming device rate {device_rate} Hz, {NPORT} channels, to {host}:{port}");

    let params = proto::StreamParameters {
        samplerate: device_rate,
        nchannel: NPORT,
        sample_type: proto::SampleType::F32,
    };

    let result = streamjack_core::sender::run((host.as_str(), port), params, consumer, running);
    drop(active_client);
    match result {
        Ok(never) => match never {},
        Err(e) => {
            log::error!("sender exited: {e}");
            Err(e)
        }
    }
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
