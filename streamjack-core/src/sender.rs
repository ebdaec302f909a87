//! The sender half: a real-time-safe write into the outbound ring and the
//! reconnecting net loop that drains it onto a TCP socket.

use std::convert::Infallible;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use netring::{Consumer, Producer};
use proto::StreamParameters;

use crate::config::{CLIENT_PERIOD_TIME_US, RECONNECT_BACKOFF_MS};

/// Writes one audio chunk (header + `nchannel`-interleaved frames) into the
/// sender's ring, or drops the whole chunk. Called directly from the host's
/// audio callback: no allocation, no locking, no syscalls.
///
/// `samples` must yield exactly `nframes * nchannel` values, channel-first
/// within each frame (`frame[0][ch0], frame[0][ch1], ..., frame[1][ch0], ...`).
#[inline]
pub fn write_audio_block(
    producer: &mut Producer,
    running: &AtomicBool,
    nchannel: u32,
    nframes: u32,
    mut samples: impl Iterator<Item = f32>,
) -> bool {
    let payload = nframes * nchannel * 4;
    let need = 8 + payload as usize;

    if !running.load(Ordering::Acquire) || producer.available_write() < need {
        return false;
    }

    let header = proto::audio_header_bytes(payload);
    // `need` bytes were just proven available, so this header write cannot
    // fail; a failure here would mean a torn chunk on the wire.
    let wrote_header = producer.write(&header);
    debug_assert!(wrote_header);

    let mut remaining = payload as usize;
    while remaining > 0 {
        let span = producer.borrow_write(remaining);
        let n = span.len();
        if n == 0 {
            break;
        }
        for chunk in span[..n - n % 4].chunks_exact_mut(4) {
            let sample = samples.next().unwrap_or(0.0);
            chunk.copy_from_slice(&sample.to_ne_bytes());
        }
        producer.advance_write_only(n - n % 4);
        remaining -= n - n % 4;
    }
    true
}

/// Runs the sender's connection state machine and net loop forever:
/// `Disconnected -> Connecting -> Streaming -> Broken -> Disconnected`, one
/// second of backoff between attempts. Only returns on an unrecoverable I/O
/// setup error (e.g. the target address can't be resolved at all); ordinary
/// connect/send/recv failures are handled internally by reconnecting.
pub fn run(
    target: impl ToSocketAddrs,
    base_params: StreamParameters,
    mut consumer: Consumer,
    running: Arc<AtomicBool>,
) -> io::Result<Infallible> {
    let addrs: Vec<SocketAddr> = target.to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no addresses resolved for sender target",
        ));
    }

    let mut scratch = [0u8; 4096];
    loop {
        running.store(false, Ordering::Release);

        let mut stream = match connect_any(&addrs) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("connect failed: {e}, retrying in {RECONNECT_BACKOFF_MS}ms");
                thread::sleep(Duration::from_millis(RECONNECT_BACKOFF_MS));
                continue;
            }
        };

        // Drain the ring while the audio producer is still disabled, so the
        // parameters chunk is the first thing on the wire, then flip
        // `running` and enter the net loop.
        let stale = consumer.available_read();
        consumer.skip(stale);

        if let Err(e) = stream.write_all(&base_params.to_wire_bytes()) {
            log::warn!("failed to send stream parameters: {e}");
            thread::sleep(Duration::from_millis(RECONNECT_BACKOFF_MS));
            continue;
        }
        if let Err(e) = stream.set_nonblocking(true) {
            log::warn!("set_nonblocking failed: {e}");
            thread::sleep(Duration::from_millis(RECONNECT_BACKOFF_MS));
            continue;
        }

        running.store(true, Ordering::Release);
        log::info!("connected to {:?}, streaming", stream.peer_addr());

        'streaming: loop {
            loop {
                let avail = consumer.available_read();
                if avail == 0 {
                    break;
                }
                let span = consumer.borrow_read(avail);
                match stream.write(span) {
                    Ok(0) => break 'streaming,
                    Ok(n) => {
                        consumer.skip(n);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::warn!("send error: {e}");
                        break 'streaming;
                    }
                }
            }

            loop {
                match stream.read(&mut scratch) {
                    Ok(0) => break 'streaming,
                    Ok(_) => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::warn!("recv error: {e}");
                        break 'streaming;
                    }
                }
            }

            thread::sleep(Duration::from_micros(CLIENT_PERIOD_TIME_US));
        }

        running.store(false, Ordering::Release);
        log::warn!("connection broken, reconnecting in {RECONNECT_BACKOFF_MS}ms");
        thread::sleep(Duration::from_millis(RECONNECT_BACKOFF_MS));
    }
}

fn connect_any(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr) {
            Ok(s) => return Ok(s),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn dropped_while_not_running_leaves_ring_empty() {
        let (mut p, c) = netring::ring(4096);
        let running = AtomicBool::new(false);
        let samples = std::iter::repeat(1.0f32);
        assert!(!write_audio_block(&mut p, &running, 2, 4, samples));
        assert_eq!(c.available_read(), 0);
    }

    #[test]
    fn whole_chunk_written_when_running_and_room() {
        let (mut p, mut c) = netring::ring(4096);
        let running = AtomicBool::new(true);
        let samples = (1..=8u32).map(|i| i as f32);
        assert!(write_audio_block(&mut p, &running, 2, 4, samples));

        let mut header = [0u8; 8];
        assert!(c.read(&mut header));
        assert_eq!(u32::from_le_bytes(header[0..4].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 32);

        let mut body = [0u8; 32];
        assert!(c.read(&mut body));
        let first = f32::from_ne_bytes(body[0..4].try_into().unwrap());
        assert_eq!(first, 1.0);
    }

    #[test]
    fn backpressure_drops_whole_chunk_never_a_partial_header() {
        let (mut p, c) = netring::ring(40); // usable 39 bytes, < 8+32
        let running = AtomicBool::new(true);
        let samples = std::iter::repeat(9.0f32);
        assert!(!write_audio_block(&mut p, &running, 2, 4, samples));
        assert_eq!(c.available_read(), 0);
    }
}
