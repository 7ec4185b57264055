//! Per-client connection lifecycle.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::protocol::{self, Chunker, DEFAULT_CHUNK_DURATION, Request, TERMINATOR};
use crate::tts::{AudioPayload, SynthesisError, Synthesizer};

/// Read/stream parameters shared by every connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSettings {
    pub chunk_duration: f32, // Seconds of audio per chunk
    pub read_buffer: usize,  // Bytes read per request
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self { chunk_duration: DEFAULT_CHUNK_DURATION, read_buffer: 1024 }
    }
}

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("synthesis worker failed: {0}")]
    Worker(#[from] JoinError),
}

/// Where a connection currently is in its request loop.
enum State {
    AwaitingRequest,
    Synthesizing(String),
    Streaming { text: String, payload: AudioPayload },
    Closed(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    PeerClosed,
    Shutdown,
    Failed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("closed by peer"),
            CloseReason::Shutdown => f.write_str("server shutting down"),
            CloseReason::Failed => f.write_str("error"),
        }
    }
}

/// Serves one client socket until it closes.
///
/// Requests are handled strictly one after another: read text, synthesize,
/// stream the chunks, send the terminator, then wait for the next request.
pub struct ConnectionHandler {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    synthesizer: Arc<dyn Synthesizer>,
    settings: StreamSettings,
    shutdown: CancellationToken,
}

impl ConnectionHandler {
    /// Wrap an accepted socket. Nothing is read until [`run`](Self::run).
    pub fn new(id: u64, stream: TcpStream, peer: SocketAddr, synthesizer: Arc<dyn Synthesizer>, settings: StreamSettings, shutdown: CancellationToken) -> Self {
        Self { id, peer, stream, synthesizer, settings, shutdown }
    }

    /// Drive the connection to completion and release the socket.
    pub async fn run(mut self) {
        let reason = self.serve().await;

        // The peer may already have closed its half; the socket is dropped either way
        if let Err(e) = self.stream.shutdown().await {
            debug!("Connection #{} shutdown: {}", self.id, e);
        }
        info!("🔌 Connection #{} from {} closed ({})", self.id, self.peer, reason);
    }

    async fn serve(&mut self) -> CloseReason {
        let mut buf = vec![0u8; self.settings.read_buffer.max(1)];
        let mut state = State::AwaitingRequest;

        loop {
            state = match state {
                State::AwaitingRequest => match self.read_request(&mut buf).await {
                    Ok(next) => next,
                    Err(e) => {
                        warn!("Connection #{} from {}: failed to read request: {}", self.id, self.peer, e);
                        State::Closed(CloseReason::Failed)
                    }
                },
                State::Synthesizing(text) => match self.synthesize(&text).await {
                    Ok(payload) => State::Streaming { text, payload },
                    Err(e) => {
                        error!("❌ Connection #{} from {}: synthesis failed for \"{}\": {}", self.id, self.peer, text, e);
                        State::Closed(CloseReason::Failed)
                    }
                },
                State::Streaming { text, payload } => match self.stream_payload(&payload).await {
                    Ok(true) => State::AwaitingRequest,
                    Ok(false) => State::Closed(CloseReason::Shutdown),
                    Err(e) => {
                        warn!("Connection #{} from {}: streaming \"{}\" aborted: {}", self.id, self.peer, text, e);
                        State::Closed(CloseReason::Failed)
                    }
                },
                State::Closed(reason) => return reason,
            };
        }
    }

    /// Wait for the next request. One read is one request.
    async fn read_request(&mut self, buf: &mut [u8]) -> Result<State, ConnectionError> {
        let n = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(State::Closed(CloseReason::Shutdown)),
            n = self.stream.read(buf) => n?,
        };

        if n == 0 {
            return Ok(State::Closed(CloseReason::PeerClosed));
        }

        let next = match protocol::decode_request(&buf[..n]) {
            Request::Text(text) => {
                debug!("Connection #{}: request of {} chars", self.id, text.chars().count());
                State::Synthesizing(text)
            }
            Request::Blank => {
                debug!("Connection #{}: ignoring blank request", self.id);
                State::AwaitingRequest
            }
            Request::Malformed(e) => {
                warn!("Connection #{}: ignoring request that is not UTF-8: {}", self.id, e);
                State::AwaitingRequest
            }
        };
        Ok(next)
    }

    /// Run the synthesizer on a blocking worker so the runtime keeps serving
    /// other sockets. A panic inside the engine surfaces as `Worker`.
    async fn synthesize(&self, text: &str) -> Result<AudioPayload, ConnectionError> {
        let synthesizer = Arc::clone(&self.synthesizer);
        let text = text.to_owned();
        let payload = tokio::task::spawn_blocking(move || synthesizer.synthesize(&text)).await??;
        Ok(payload)
    }

    /// Write every chunk in order, then the terminator.
    ///
    /// Returns `false` if shutdown interrupted the stream, in which case no
    /// terminator is sent.
    async fn stream_payload(&mut self, payload: &AudioPayload) -> Result<bool, ConnectionError> {
        let chunker = Chunker::new(self.settings.chunk_duration);
        let mut frame = Vec::new();
        let mut chunks = 0usize;
        let mut bytes = 0usize;

        for chunk in chunker.split(payload) {
            if self.shutdown.is_cancelled() {
                return Ok(false);
            }
            protocol::encode_chunk(chunk, &mut frame);
            self.stream.write_all(&frame).await?;
            chunks += 1;
            bytes += frame.len();
        }

        self.stream.write_all(TERMINATOR).await?;
        self.stream.flush().await?;

        info!(
            "🔊 Connection #{}: streamed {} samples ({:.2}s) in {} chunks, {} bytes",
            self.id,
            payload.samples.len(),
            payload.duration_secs(),
            chunks,
            bytes + TERMINATOR.len()
        );
        Ok(true)
    }
}
