//! Binds `streamjack_core`'s host-agnostic sender and receiver pipelines to
//! real JACK ports and `jack::ProcessHandler`s.

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use streamjack_core::receiver::{PortFactory, Registry};

/// One JACK output port per channel of a receiver session.
pub type SessionPorts = Vec<jack::Port<jack::AudioOut>>;

/// Real-time audio callback for the sender: reads from a fixed set of JACK
/// input ports, interleaves them frame-major, and hands the result to
/// [`streamjack_core::sender::write_audio_block`]. No allocation once the
/// ports are registered.
pub struct SenderProcessHandler {
    ports: Vec<jack::Port<jack::AudioIn>>,
    producer: netring::Producer,
    running: Arc<AtomicBool>,
}

impl SenderProcessHandler {
    pub fn new(
        ports: Vec<jack::Port<jack::AudioIn>>,
        producer: netring::Producer,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            ports,
            producer,
            running,
        }
    }
}

/// Iterates one process cycle's samples in frame-major, channel-minor order
/// without collecting them into a buffer first.
struct FrameMajor<'a> {
    ports: &'a [jack::Port<jack::AudioIn>],
    scope: &'a jack::ProcessScope,
    nframes: usize,
    frame: usize,
    channel: usize,
}

impl Iterator for FrameMajor<'_> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.frame >= self.nframes {
            return None;
        }
        let value = self.ports[self.channel].as_slice(self.scope)[self.frame];
        self.channel += 1;
        if self.channel == self.ports.len() {
            self.channel = 0;
            self.frame += 1;
        }
        Some(value)
    }
}

impl jack::ProcessHandler for SenderProcessHandler {
    fn process(&mut self, _client: &jack::Client, scope: &jack::ProcessScope) -> jack::Control {
        let nframes = scope.n_frames() as usize;
        let nchannel = self.ports.len() as u32;
        let samples = FrameMajor {
            ports: &self.ports,
            scope,
            nframes,
            frame: 0,
            channel: 0,
        };
        streamjack_core::sender::write_audio_block(
            &mut self.producer,
            &self.running,
            nchannel,
            nframes as u32,
            samples,
        );
        jack::Control::Continue
    }
}

/// Real-time audio callback for the receiver: pops samples out of every
/// started session's `audio_device` ring and deinterleaves them into that
/// session's JACK output ports. A session that hasn't latched `started` yet
/// contributes silence and its ring is left untouched, so the fill level
/// used to decide when to latch isn't drained out from under it; a started
/// session with nothing buffered (underrun) also gets silence for the
/// missing frames rather than stalling the whole callback.
pub struct ReceiverProcessHandler {
    registry: Registry<SessionPorts>,
    scratch: Vec<u8>,
}

impl ReceiverProcessHandler {
    /// `max_nframes` and `max_nchannel` must cover the largest process
    /// cycle and session width this handler will ever see (JACK's current
    /// buffer size and the fixed port count), so `scratch` is sized once
    /// here and `process` never allocates on the audio thread.
    pub fn new(registry: Registry<SessionPorts>, max_nframes: usize, max_nchannel: u32) -> Self {
        Self {
            registry,
            scratch: vec![0u8; max_nframes * max_nchannel as usize * 4],
        }
    }
}

impl jack::ProcessHandler for ReceiverProcessHandler {
    fn process(&mut self, _client: &jack::Client, scope: &jack::ProcessScope) -> jack::Control {
        let nframes = scope.n_frames() as usize;
        let Ok(mut sessions) = self.registry.lock() else {
            return jack::Control::Continue;
        };

        for session in sessions.values_mut() {
            let nchannel = session.ports.len();
            if nchannel == 0 {
                continue;
            }

            let to_read = if session.started {
                let need_bytes = (nframes * nchannel * 4).min(self.scratch.len());
                let available = session.audio_device_rx.available_read().min(need_bytes);
                if available > 0 {
                    session.audio_device_rx.read(&mut self.scratch[..available]);
                }
                available
            } else {
                0
            };

            for (channel, port) in session.ports.iter_mut().enumerate() {
                let out = port.as_mut_slice(scope);
                for (frame, sample) in out.iter_mut().enumerate().take(nframes) {
                    let at = (frame * nchannel + channel) * 4;
                    *sample = if at + 4 <= to_read {
                        f32::from_ne_bytes(self.scratch[at..at + 4].try_into().unwrap())
                    } else {
                        0.0
                    };
                }
            }
        }

        jack::Control::Continue
    }
}

/// A JACK port's connection target ends in "<sessionName> sanitized to a
/// valid port-name segment" (JACK port names may not contain ':').
fn sanitize_port_segment(name: &str) -> String {
    name.replace(':', "_")
}

/// Opens one JACK output port per channel for each newly accepted session,
/// named `input_<sessionName>_<i+1>`, and connects each to
/// `<base_name><i>` in the local graph.
pub struct JackPortFactory<'a> {
    client: &'a jack::Client,
    base_name: String,
}

impl<'a> JackPortFactory<'a> {
    pub fn new(client: &'a jack::Client, base_name: impl Into<String>) -> Self {
        Self {
            client,
            base_name: base_name.into(),
        }
    }
}

impl PortFactory<SessionPorts> for JackPortFactory<'_> {
    fn open_ports(&mut self, session_name: &str, nchannel: u32) -> io::Result<SessionPorts> {
        let session_name = sanitize_port_segment(session_name);
        (1..=nchannel)
            .map(|i| {
                let port_name = format!("input_{session_name}_{i}");
                let port = self
                    .client
                    .register_port(&port_name, jack::AudioOut::default())
                    .map_err(|e| io::Error::other(e.to_string()))?;
                let full_name = port.name().map_err(|e| io::Error::other(e.to_string()))?;
                let target = format!("{}{}", self.base_name, i - 1);
                if let Err(e) = self.client.connect_ports_by_name(&full_name, &target) {
                    log::warn!("could not connect {full_name} to {target}: {e}");
                }
                Ok(port)
            })
            .collect()
    }
}

/// Opens the sender's fixed set of JACK input ports, named
/// `output_TCP_<i+1>`, and connects each to `<base_name><i>` in the local
/// graph (the external capture/source ports the sender pulls audio from).
pub fn open_sender_ports(
    client: &jack::Client,
    base_name: &str,
    nchannel: u32,
) -> io::Result<Vec<jack::Port<jack::AudioIn>>> {
    (1..=nchannel)
        .map(|i| {
            let port_name = format!("output_TCP_{i}");
            let port = client
                .register_port(&port_name, jack::AudioIn::default())
                .map_err(|e| io::Error::other(e.to_string()))?;
            let full_name = port.name().map_err(|e| io::Error::other(e.to_string()))?;
            let target = format!("{base_name}{}", i - 1);
            if let Err(e) = client.connect_ports_by_name(&target, &full_name) {
                log::warn!("could not connect {target} to {full_name}: {e}");
            }
            Ok(port)
        })
        .collect()
}
