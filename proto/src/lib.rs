//! Wire protocol: 8-byte chunk headers framing either a stream-parameters
//! body or a raw interleaved-float audio payload, decoded off a
//! [`netring::Consumer`] in a manner that tolerates arbitrary byte splits.
//!
//! All integers are little-endian, packed (no padding).

use netring::Consumer;
use std::convert::TryFrom;

/// `R_MSG_AUDIO_CHUNK`: payload is `nframes * nchannel * 4` bytes of
/// interleaved `f32` samples, channel-first within each frame.
pub const AUDIO_CHUNK_TYPE: u32 = 1;
/// `R_MSG_STREAM_PARAMETERS`: must be the first chunk on a fresh connection.
pub const STREAM_PARAMETERS_CHUNK_TYPE: u32 = 2;

/// Size in bytes of a [`ChunkHeader`] on the wire.
pub const HEADER_SIZE: usize = 8;
/// Size in bytes of a [`StreamParameters`] body (excluding the header).
pub const PARAMETERS_BODY_SIZE: usize = 12;

/// The only sample format the wire protocol currently carries. The field
/// exists on the wire for forward compatibility but unknown values are
/// rejected rather than silently accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    /// Native-endian 32-bit IEEE-754 float.
    F32,
}

impl TryFrom<u32> for SampleType {
    type Error = ProtoError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(SampleType::F32),
            other => Err(ProtoError::UnsupportedSampleType(other)),
        }
    }
}

impl From<SampleType> for u32 {
    fn from(t: SampleType) -> Self {
        match t {
            SampleType::F32 => 0,
        }
    }
}

/// The 8-byte record prefixing every chunk on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_type: u32,
    pub payload: u32,
}

impl ChunkHeader {
    fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.chunk_type.to_le_bytes());
        out[4..8].copy_from_slice(&self.payload.to_le_bytes());
        out
    }

    fn from_bytes(b: &[u8; HEADER_SIZE]) -> Self {
        Self {
            chunk_type: u32::from_le_bytes(b[0..4].try_into().unwrap()),
            payload: u32::from_le_bytes(b[4..8].try_into().unwrap()),
        }
    }
}

/// Declared stream parameters: must be the first chunk on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParameters {
    pub samplerate: u32,
    pub nchannel: u32,
    pub sample_type: SampleType,
}

impl StreamParameters {
    /// Encodes this as a complete 20-byte wire chunk (header + body).
    pub fn to_wire_bytes(self) -> [u8; HEADER_SIZE + PARAMETERS_BODY_SIZE] {
        let header = ChunkHeader {
            chunk_type: STREAM_PARAMETERS_CHUNK_TYPE,
            payload: PARAMETERS_BODY_SIZE as u32,
        };
        let mut out = [0u8; HEADER_SIZE + PARAMETERS_BODY_SIZE];
        out[..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        out[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&self.samplerate.to_le_bytes());
        out[HEADER_SIZE + 4..HEADER_SIZE + 8].copy_from_slice(&self.nchannel.to_le_bytes());
        out[HEADER_SIZE + 8..].copy_from_slice(&u32::from(self.sample_type).to_le_bytes());
        out
    }

    fn from_body_bytes(b: &[u8]) -> Result<Self, ProtoError> {
        if b.len() != PARAMETERS_BODY_SIZE {
            return Err(ProtoError::MalformedParameters {
                len: b.len() as u32,
            });
        }
        let samplerate = u32::from_le_bytes(b[0..4].try_into().unwrap());
        let nchannel = u32::from_le_bytes(b[4..8].try_into().unwrap());
        let sample_type = SampleType::try_from(u32::from_le_bytes(b[8..12].try_into().unwrap()))?;
        Ok(Self {
            samplerate,
            nchannel,
            sample_type,
        })
    }
}

/// Encodes an audio chunk header for a payload of `payload_bytes` bytes.
/// The caller writes the header then streams `payload_bytes` of interleaved
/// samples immediately after, as a single whole-chunk write.
pub fn audio_header_bytes(payload_bytes: u32) -> [u8; HEADER_SIZE] {
    ChunkHeader {
        chunk_type: AUDIO_CHUNK_TYPE,
        payload: payload_bytes,
    }
    .to_bytes()
}

/// Errors that terminate the stream: fatal, the session is torn down and
/// does not attempt resynchronization.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("unknown chunk type {0}")]
    UnknownChunkType(u32),
    #[error("audio chunk received before stream parameters")]
    AudioBeforeParameters,
    #[error("stream parameters chunk had {len} payload bytes, expected {PARAMETERS_BODY_SIZE}")]
    MalformedParameters { len: u32 },
    #[error("unsupported sample type {0}")]
    UnsupportedSampleType(u32),
}

/// Result of polling the decoder once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// Not enough bytes buffered yet for a full chunk; call again once more
    /// bytes have arrived.
    NeedMoreBytes,
    /// A parameters chunk was fully decoded.
    Parameters(StreamParameters),
    /// An audio chunk's header has been consumed; `payload` bytes of
    /// interleaved samples immediately follow in the ring and are the
    /// caller's responsibility to consume (or discard) before polling
    /// again.
    AudioChunk { payload: usize },
}

/// Resumable chunk decoder driven over a [`Consumer`]. Keeps only the
/// "have we seen parameters yet" bit as state; all byte buffering lives in
/// the ring itself, which is what makes this resumable across arbitrary
/// read boundaries.
#[derive(Debug, Default)]
pub struct Decoder {
    seen_parameters: bool,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to decode the next chunk. Consumes exactly the header (and,
    /// for a parameters chunk, its body) from `consumer` on success; leaves
    /// `consumer` untouched on [`Chunk::NeedMoreBytes`] or on error.
    pub fn poll(&mut self, consumer: &mut Consumer) -> Result<Chunk, ProtoError> {
        if consumer.available_read() < HEADER_SIZE {
            return Ok(Chunk::NeedMoreBytes);
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        consumer.peek(&mut header_bytes);
        let header = ChunkHeader::from_bytes(&header_bytes);

        let total = HEADER_SIZE + header.payload as usize;
        if consumer.available_read() < total {
            return Ok(Chunk::NeedMoreBytes);
        }

        match header.chunk_type {
            STREAM_PARAMETERS_CHUNK_TYPE => {
                consumer.skip(HEADER_SIZE);
                let mut body = vec![0u8; header.payload as usize];
                consumer.read(&mut body);
                let params = StreamParameters::from_body_bytes(&body)?;
                self.seen_parameters = true;
                Ok(Chunk::Parameters(params))
            }
            AUDIO_CHUNK_TYPE => {
                if !self.seen_parameters {
                    return Err(ProtoError::AudioBeforeParameters);
                }
                consumer.skip(HEADER_SIZE);
                Ok(Chunk::AudioChunk {
                    payload: header.payload as usize,
                })
            }
            other => Err(ProtoError::UnknownChunkType(other)),
        }
    }
}
