//! Wire format for the streaming socket protocol.
//!
//! A client writes UTF-8 text. The server answers with raw native-endian
//! `f32` samples split into fixed-duration chunks, followed by the
//! [`TERMINATOR`] bytes. There are no length prefixes; the terminator is the
//! only framing.

mod chunker;

pub use chunker::{Chunker, DEFAULT_CHUNK_DURATION};

use std::str::Utf8Error;

/// Marks the end of one request's audio.
pub const TERMINATOR: &[u8] = b"END_OF_AUDIO";

/// What a single socket read turned out to contain.
#[derive(Debug, PartialEq, Eq)]
pub enum Request {
    /// Trimmed, non-empty text to synthesize.
    Text(String),
    /// Empty or whitespace only.
    Blank,
    /// Bytes that are not valid UTF-8.
    Malformed(Utf8Error),
}

/// Interpret the bytes of one read as a request.
///
/// Each read is one complete request. Text split across reads is not
/// reassembled, and a multi-byte character cut at the buffer boundary makes
/// the read malformed.
pub fn decode_request(bytes: &[u8]) -> Request {
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() { Request::Blank } else { Request::Text(text.to_string()) }
        }
        Err(e) => Request::Malformed(e),
    }
}

/// Encode `samples` into `frame` as back-to-back native-endian `f32`s.
///
/// `frame` is cleared first so one buffer can be reused for every chunk.
pub fn encode_chunk(samples: &[f32], frame: &mut Vec<u8>) {
    frame.clear();
    frame.reserve(samples.len() * size_of::<f32>());
    for sample in samples {
        frame.extend_from_slice(&sample.to_ne_bytes());
    }
}
