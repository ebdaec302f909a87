//! Integration-style coverage for the end-to-end scenarios that don't need
//! a real host audio graph: a loopback `TcpListener` stands in for the
//! network, and the sender's ring is driven directly instead of from an
//! audio callback.

use std::io::Read;
use std::net::TcpListener;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proto::{Chunk, Decoder, SampleType, StreamParameters};
use streamjack_core::config::CLIENT_RINGBUFFER_BYTES;

fn spawn_sender(addr: std::net::SocketAddr, samplerate: u32, nchannel: u32) -> Arc<AtomicBool> {
    let (_producer, consumer) = netring::ring(CLIENT_RINGBUFFER_BYTES);
    let running = Arc::new(AtomicBool::new(false));
    let params = StreamParameters {
        samplerate,
        nchannel,
        sample_type: SampleType::F32,
    };
    let running_clone = running.clone();
    thread::spawn(move || {
        let _ = streamjack_core::sender::run(addr, params, consumer, running_clone);
    });
    running
}

/// Scenario 1: first bytes on a fresh connection decode as a parameters
/// chunk with the sender's declared rate and channel count.
#[test]
fn clean_connect_first_chunk_is_parameters() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let _running = spawn_sender(addr, 44_100, 2);

    let (mut stream, _) = listener.accept().unwrap();
    let mut wire = [0u8; 20];
    stream.read_exact(&mut wire).unwrap();

    let (mut p, mut c) = netring::ring(64);
    p.write(&wire);
    let mut decoder = Decoder::new();
    match decoder.poll(&mut c).unwrap() {
        Chunk::Parameters(params) => {
            assert_eq!(params.samplerate, 44_100);
            assert_eq!(params.nchannel, 2);
            assert_eq!(params.sample_type, SampleType::F32);
        }
        other => panic!("expected parameters chunk first, got {other:?}"),
    }
}

/// Scenario 3: killing the receiver mid-stream forces the sender through
/// its backoff and reconnect; the next connection again opens with
/// parameters as the first chunk.
#[test]
fn broken_connection_reconnects_with_fresh_parameters() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let _running = spawn_sender(addr, 48_000, 2);

    let (first, _) = listener.accept().unwrap();
    drop(first); // simulate the receiver disappearing mid-stream

    // Reconnect backoff is ~1s; give it generous headroom via the read
    // timeout set below rather than polling here.
    let (mut second, _) = listener.accept().unwrap();
    second
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let mut wire = [0u8; 20];
    second.read_exact(&mut wire).unwrap();
    let (mut p, mut c) = netring::ring(64);
    p.write(&wire);
    let mut decoder = Decoder::new();
    assert!(matches!(
        decoder.poll(&mut c).unwrap(),
        Chunk::Parameters(_)
    ));
}
