//! Receiver-side session state, wire parser, resampler driver/rate
//! controller, and the `mio`-based acceptor & poll loop.
//!
//! Host ports are opaque here (`P`): `streamjack-jack` supplies a
//! [`PortFactory`] that opens real `jack::Port<AudioOut>`s per session and a
//! handle stored as `Session::ports`. This crate never touches `jack`.

use std::collections::HashMap;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use proto::{Chunk, Decoder};
use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::config::{
    server_ringbuffer_bytes, SharedState, ACCEPT_POLL_TIMEOUT_MS, CLIENT_RINGBUFFER_BYTES,
    RESAMPLE_BUFFER_SAMPLES, SERVER_BUFFER_SECONDS,
};
use crate::rate::rate_multiplier;

const LISTENER_TOKEN: Token = Token(0);

/// Opens a session's host-side output ports. Implemented by `streamjack-jack`
/// for real `jack::Port`s; tests use `()` and a no-op impl.
pub trait PortFactory<P> {
    fn open_ports(&mut self, session_name: &str, nchannel: u32) -> io::Result<P>;
}

impl PortFactory<()> for () {
    fn open_ports(&mut self, _session_name: &str, _nchannel: u32) -> io::Result<()> {
        Ok(())
    }
}

struct ResamplerStage {
    inner: SincFixedIn<f32>,
    nominal_in_rate: f64,
    device_rate: f64,
    in_planar: Vec<Vec<f32>>,
    out_planar: Vec<Vec<f32>>,
    raw_scratch: Vec<u8>,
}

impl ResamplerStage {
    fn new(samplerate_in: u32, device_rate: u32, nchannel: u32) -> Self {
        let nchannel = nchannel as usize;
        let chunk_frames = (RESAMPLE_BUFFER_SAMPLES / nchannel.max(1)).max(1);
        let ratio = device_rate as f64 / samplerate_in as f64;
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: rubato::calculate_cutoff(256, WindowFunction::BlackmanHarris2),
            oversampling_factor: 256,
            interpolation: SincInterpolationType::Cubic,
            window: WindowFunction::BlackmanHarris2,
        };
        // max_resample_ratio_relative: 8x covers every rate adjustment the
        // rate controller ever applies (+-3%) with generous headroom.
        let inner = SincFixedIn::<f32>::new(ratio, 8.0, params, chunk_frames, nchannel)
            .expect("resampler construction parameters are always valid");
        let in_planar = vec![Vec::with_capacity(chunk_frames); nchannel];
        let out_planar = vec![Vec::with_capacity(chunk_frames * 2); nchannel];
        Self {
            inner,
            nominal_in_rate: samplerate_in as f64,
            device_rate: device_rate as f64,
            in_planar,
            out_planar,
            raw_scratch: Vec::new(),
        }
    }

    fn set_effective_in_rate(&mut self, effective_rate: f64) {
        let ratio = self.device_rate / effective_rate;
        // A ramped update; rejecting an out-of-range ratio here would be a
        // construction bug (headroom is 8x), not a runtime condition.
        let _ = self.inner.set_resample_ratio(ratio, true);
    }
}

/// One accepted connection: the `raw`/`audio_original`/`audio_device` rings,
/// the chunk decoder, the (lazily constructed, once parameters arrive)
/// resampler stage, and the host-opaque output ports.
pub struct Session<P> {
    pub name: String,
    stream: TcpStream,
    decoder: Decoder,
    nchannel: u32,
    device_rate: u32,
    raw_tx: netring::Producer,
    raw_rx: netring::Consumer,
    audio_original_tx: netring::Producer,
    audio_original_rx: netring::Consumer,
    audio_device_tx: netring::Producer,
    /// The sole consumer of this ring is the audio thread; exposed so the
    /// host binding can pop samples out of its process callback.
    pub audio_device_rx: netring::Consumer,
    resampler: Option<ResamplerStage>,
    /// Latched true once `buffered_seconds` first reaches the target fill
    /// level; never reset except by session teardown.
    pub started: bool,
    /// Diagnostic only; never read back by any control-flow decision.
    sample_counter: u64,
    pub ports: P,
}

impl<P> Session<P> {
    fn open(stream: TcpStream, name: String, nchannel: u32, device_rate: u32, ports: P) -> Self {
        let ring_bytes = server_ringbuffer_bytes(nchannel);
        let (raw_tx, raw_rx) = netring::ring(CLIENT_RINGBUFFER_BYTES);
        let (audio_original_tx, audio_original_rx) = netring::ring(ring_bytes);
        let (audio_device_tx, audio_device_rx) = netring::ring(ring_bytes);
        Self {
            name,
            stream,
            decoder: Decoder::new(),
            nchannel,
            device_rate,
            raw_tx,
            raw_rx,
            audio_original_tx,
            audio_original_rx,
            audio_device_tx,
            audio_device_rx,
            resampler: None,
            started: false,
            sample_counter: 0,
            ports,
        }
    }

    /// Pulls socket bytes into `raw`, then parses and ingests whatever whole
    /// chunks are now available, driving the resampler after each audio
    /// chunk. Returns `Ok(false)` on clean hangup (caller tears down),
    /// `Err` on a fatal protocol error or I/O error other than `WouldBlock`.
    fn service(&mut self) -> io::Result<bool> {
        loop {
            let max = self.raw_tx.available_write().min(4096);
            if max == 0 {
                break;
            }
            let span = self.raw_tx.borrow_write(max);
            match self.stream.read(span) {
                Ok(0) => return Ok(false),
                Ok(n) => self.raw_tx.advance_write_only(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            };
        }

        loop {
            match self.decoder.poll(&mut self.raw_rx) {
                Ok(Chunk::NeedMoreBytes) => break,
                Ok(Chunk::Parameters(params)) => {
                    log::info!(
                        "{}: stream parameters samplerate={} nchannel={}",
                        self.name,
                        params.samplerate,
                        params.nchannel
                    );
                    self.resampler = Some(ResamplerStage::new(
                        params.samplerate,
                        self.device_rate,
                        self.nchannel,
                    ));
                }
                Ok(Chunk::AudioChunk { payload }) => {
                    self.ingest_audio(payload);
                    self.drive_resampler();
                }
                Err(e) => {
                    log::error!("{}: stream desynchronized: {e}", self.name);
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
                }
            }
        }
        Ok(true)
    }

    fn ingest_audio(&mut self, payload: usize) {
        self.sample_counter += (payload / 4) as u64;
        if self.audio_original_tx.available_write() < payload {
            // Overflow policy: drop the whole payload, keep the stream in
            // frame (the header was already consumed by the decoder).
            self.raw_rx.skip(payload);
            return;
        }
        let mut remaining = payload;
        while remaining > 0 {
            let n = {
                let src = self.raw_rx.borrow_read(remaining);
                if src.is_empty() {
                    break;
                }
                let dst = self.audio_original_tx.borrow_write(src.len());
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
                n
            };
            if n == 0 {
                break;
            }
            self.raw_rx.skip(n);
            self.audio_original_tx.advance_write_only(n);
            remaining -= n;
        }
    }

    fn drive_resampler(&mut self) {
        let nchannel = self.nchannel as usize;
        loop {
            let Some(stage) = self.resampler.as_mut() else {
                return;
            };
            let need_in = stage.inner.input_frames_next();
            let next_out = stage.inner.output_frames_next();
            let in_bytes = need_in * nchannel * 4;
            let out_bytes = next_out * nchannel * 4;

            if self.audio_original_rx.available_read() < in_bytes
                || self.audio_device_tx.available_write() < out_bytes
            {
                return;
            }

            if stage.raw_scratch.len() < in_bytes {
                stage.raw_scratch.resize(in_bytes, 0);
            }
            self.audio_original_rx
                .peek(&mut stage.raw_scratch[..in_bytes]);

            for ch in stage.in_planar.iter_mut() {
                ch.clear();
            }
            for frame in stage.raw_scratch[..in_bytes].chunks_exact(nchannel * 4) {
                for (ch, bytes) in frame.chunks_exact(4).enumerate() {
                    stage.in_planar[ch].push(f32::from_ne_bytes(bytes.try_into().unwrap()));
                }
            }
            for ch in stage.out_planar.iter_mut() {
                ch.clear();
                ch.resize(next_out, 0.0);
            }

            let (consumed, produced) = stage
                .inner
                .process_into_buffer(&stage.in_planar, &mut stage.out_planar, None)
                .expect("fixed-size planar buffers always match the resampler's channel count");

            self.audio_original_rx.skip(consumed * nchannel * 4);

            let mut out_bytes_buf = vec![0u8; produced * nchannel * 4];
            for frame in 0..produced {
                for ch in 0..nchannel {
                    let at = (frame * nchannel + ch) * 4;
                    out_bytes_buf[at..at + 4]
                        .copy_from_slice(&stage.out_planar[ch][frame].to_ne_bytes());
                }
            }
            self.audio_device_tx
                .write(&out_bytes_buf[..produced * nchannel * 4]);

            let buffered_seconds = self.audio_device_rx.available_read() as f64
                / nchannel as f64
                / 4.0
                / self.device_rate as f64;
            let mult = rate_multiplier(buffered_seconds, SERVER_BUFFER_SECONDS);
            stage.set_effective_in_rate(stage.nominal_in_rate * mult);

            if !self.started && buffered_seconds >= SERVER_BUFFER_SECONDS {
                self.started = true;
            }

            if consumed == 0 && produced == 0 {
                return;
            }
        }
    }
}

/// Session registry shared between the net thread (mutates: insert on
/// accept, remove on teardown) and the audio thread (iterates read-only). A
/// mutex held for one callback iteration at a time.
pub type Registry<P> = Arc<Mutex<HashMap<Token, Session<P>>>>;

/// Runs the single-threaded acceptor & poll loop until `shared.exit_program`
/// is observed set. Tears down every session before returning.
pub fn run<P, F>(
    listener: std::net::TcpListener,
    nchannel: u32,
    device_rate: u32,
    shared: Arc<SharedState>,
    registry: Registry<P>,
    mut port_factory: F,
) -> io::Result<()>
where
    F: PortFactory<P>,
{
    listener.set_nonblocking(true)?;
    let mut listener = TcpListener::from_std(listener);

    let mut poll = Poll::new()?;
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut events = Events::with_capacity(128);
    let mut next_token = 1usize;

    loop {
        if shared.exit_program.load(Ordering::Acquire) {
            break;
        }

        poll.poll(
            &mut events,
            Some(Duration::from_millis(ACCEPT_POLL_TIMEOUT_MS)),
        )?;

        for event in events.iter() {
            if event.token() == LISTENER_TOKEN {
                loop {
                    match listener.accept() {
                        Ok((mut stream, addr)) => {
                            let token = Token(next_token);
                            next_token += 1;
                            if let Err(e) =
                                poll.registry()
                                    .register(&mut stream, token, Interest::READABLE)
                            {
                                log::warn!("failed to register session socket: {e}");
                                continue;
                            }
                            let name = session_name(addr);
                            match port_factory.open_ports(&name, nchannel) {
                                Ok(ports) => {
                                    let session = Session::open(
                                        stream,
                                        name.clone(),
                                        nchannel,
                                        device_rate,
                                        ports,
                                    );
                                    registry.lock().unwrap().insert(token, session);
                                    log::info!("{name}: session opened");
                                }
                                Err(e) => {
                                    log::error!("{name}: failed to open ports: {e}");
                                }
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            log::warn!("accept error: {e}");
                            break;
                        }
                    }
                }
                continue;
            }

            let token = event.token();
            let mut registry_guard = registry.lock().unwrap();
            let Some(session) = registry_guard.get_mut(&token) else {
                continue;
            };
            let result = session.service();
            let name = session.name.clone();
            let teardown = match result {
                Ok(true) => false,
                Ok(false) => {
                    log::info!("{name}: peer closed connection");
                    true
                }
                Err(e) => {
                    log::warn!("{name}: session torn down: {e}");
                    true
                }
            };
            if teardown {
                if let Some(mut session) = registry_guard.remove(&token) {
                    let _ = poll.registry().deregister(&mut session.stream);
                }
            }
        }
    }

    let mut registry_guard = registry.lock().unwrap();
    for (_, mut session) in registry_guard.drain() {
        let _ = poll.registry().deregister(&mut session.stream);
    }
    let _ = poll.registry().deregister(&mut listener);

    Ok(())
}

fn session_name(addr: SocketAddr) -> String {
    addr.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpListener as StdListener;
    use std::net::TcpStream as StdStream;
    use std::thread;

    fn connected_pair() -> (StdStream, StdStream) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || StdStream::connect(addr).unwrap());
        let (server, _) = listener.accept().unwrap();
        (client.join().unwrap(), server)
    }

    #[test]
    fn parameters_then_audio_feeds_audio_original_and_drives_resampler() {
        let (mut client, server) = connected_pair();
        server.set_nonblocking(true).unwrap();
        let mio_stream = TcpStream::from_std(server);

        let mut session = Session::open(mio_stream, "test".into(), 2, 48_000, ());

        let params = proto::StreamParameters {
            samplerate: 48_000,
            nchannel: 2,
            sample_type: proto::SampleType::F32,
        };
        let frames: Vec<f32> = (0..4096).map(|i| (i % 997) as f32).collect();
        let payload = (frames.len() * 4) as u32;

        let mut wire = params.to_wire_bytes().to_vec();
        wire.extend_from_slice(&proto::audio_header_bytes(payload));
        for f in &frames {
            wire.extend_from_slice(&f.to_ne_bytes());
        }
        client.write_all(&wire).unwrap();
        client.flush().unwrap();

        // Poll service() until the data has fully arrived and the driver
        // has pushed output past the sinc filter's startup latency, or give
        // up after a generous number of attempts.
        for _ in 0..200 {
            assert!(session.service().unwrap());
            if session.audio_device_rx.available_read() > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        assert!(session.resampler.is_some());
        // the sinc filter has ~128 frames of startup latency; with enough
        // input fed in one shot the driver runs several internal steps and
        // output eventually flows into audio_device.
        assert!(session.audio_device_rx.available_read() > 0);
    }

    #[test]
    fn malformed_chunk_tears_down_session() {
        let (mut client, server) = connected_pair();
        server.set_nonblocking(true).unwrap();
        let mio_stream = TcpStream::from_std(server);
        let mut session = Session::open(mio_stream, "test".into(), 2, 48_000, ());

        let params = proto::StreamParameters {
            samplerate: 48_000,
            nchannel: 2,
            sample_type: proto::SampleType::F32,
        };
        client.write_all(&params.to_wire_bytes()).unwrap();
        let mut header = [0u8; 8];
        header[0..4].copy_from_slice(&999u32.to_le_bytes());
        header[4..8].copy_from_slice(&4u32.to_le_bytes());
        client.write_all(&header).unwrap();
        client.write_all(&[0u8; 4]).unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(50));

        assert!(session.service().is_err());
    }
}
