//! Constants carried over from the reference `tcp-protocol.h`, plus the
//! small pieces of process-wide state the audio and net threads share.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Default listen/connect port for the TCP bridge.
pub const DEFAULT_PORT: u16 = 8080;

/// Fixed channel count, `NPORT` in the reference `tcp-protocol.h`. Both
/// peers register exactly this many audio ports per stream/session.
pub const NPORT: u32 = 2;

/// Target fill level of a session's `audio_device` ring, in seconds.
pub const SERVER_BUFFER_SECONDS: f64 = 1.0;

/// Capacity of the sender's ring and a session's `raw` ring.
pub const CLIENT_RINGBUFFER_BYTES: usize = 65536;

/// Net loop sleep between send/recv bursts on the sender.
pub const CLIENT_PERIOD_TIME_US: u64 = 10_000;

/// Upper bound on samplerate assumed when sizing `audio_original` /
/// `audio_device` rings, independent of the device's actual rate.
pub const ASSUMED_SAMPLERATE: u32 = 48_000;

/// Scratch working set size, in interleaved samples, for one resampler
/// driver step.
pub const RESAMPLE_BUFFER_SAMPLES: usize = 128;

/// Poll timeout bounding receiver shutdown latency.
pub const ACCEPT_POLL_TIMEOUT_MS: u64 = 250;

/// Backoff between sender reconnect attempts.
pub const RECONNECT_BACKOFF_MS: u64 = 1000;

/// Bytes per sample on the wire (native-endian f32, sampletype=0 only).
pub const SAMPLE_SIZE_BYTES: u32 = 4;

/// Size, in bytes, of a session's `audio_original`/`audio_device` ring.
pub fn server_ringbuffer_bytes(nchannel: u32) -> usize {
    (ASSUMED_SAMPLERATE as f64
        * nchannel as f64
        * SAMPLE_SIZE_BYTES as f64
        * SERVER_BUFFER_SECONDS
        * 2.0) as usize
}

/// Process-wide atomics shared between the real-time audio thread and the
/// network thread. The audio callback reaches them without allocation
/// (plain `Arc` clone, atomic loads).
#[derive(Debug, Default)]
pub struct SharedState {
    /// True only while a connection (sender) or at least one session
    /// (receiver, informational) is actively streaming.
    pub running: AtomicBool,
    /// Checked by every loop head; sets on SIGINT (receiver only).
    pub exit_program: AtomicBool,
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}
