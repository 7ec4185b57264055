//! Listening socket and accept loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::admission::{AdmissionPolicy, Gate};
use super::connection::{ConnectionHandler, StreamSettings};
use crate::tts::Synthesizer;

/// Pause after a failed `accept` so descriptor exhaustion does not spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Owns the listening socket and hands each client to its own task.
pub struct Server {
    listener: TcpListener,
    synthesizer: Arc<dyn Synthesizer>,
    settings: StreamSettings,
    gate: Gate,
}

impl Server {
    /// Bind the listening socket.
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound (in use, permission
    /// denied, unresolvable host).
    pub async fn bind(addr: &str, synthesizer: Arc<dyn Synthesizer>, settings: StreamSettings, policy: AdmissionPolicy) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.with_context(|| format!("Failed to bind {}", addr))?;
        Ok(Self { listener, synthesizer, settings, gate: Gate::new(policy) })
    }

    /// Address the listener is bound to, useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Connection tasks are spawned on `tracker` so the caller can wait for
    /// them to drain. Each handler gets a child of `shutdown`.
    pub async fn run(self, shutdown: CancellationToken, tracker: TaskTracker) {
        if let Ok(addr) = self.local_addr() {
            info!("🎧 Server listening on {}", addr);
        }

        let mut next_id = 0u64;
        loop {
            let ticket = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                ticket = self.gate.admit() => ticket,
            };

            let (stream, peer) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                },
            };

            next_id += 1;
            info!("🔗 Accepted connection #{} from {}", next_id, peer);

            let handler = ConnectionHandler::new(next_id, stream, peer, Arc::clone(&self.synthesizer), self.settings, shutdown.child_token());
            tracker.spawn(async move {
                supervise(next_id, peer, handler.run()).await;
                drop(ticket);
            });
        }

        info!("Stopped accepting connections");
    }
}

/// Run a connection task in its own task so a panic is reported with the
/// connection it belongs to. Returns `false` if the task did not complete.
async fn supervise<F>(id: u64, peer: SocketAddr, connection: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::spawn(connection).await {
        Ok(()) => true,
        Err(e) => {
            error!("❌ Connection #{} from {} aborted: {}", id, peer, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;
    use crate::protocol::TERMINATOR;
    use crate::tts::testing::ScriptedSynthesizer;

    struct Running {
        addr: SocketAddr,
        shutdown: CancellationToken,
        tracker: TaskTracker,
        synth: Arc<ScriptedSynthesizer>,
    }

    async fn start(policy: AdmissionPolicy) -> Running {
        let synth = Arc::new(ScriptedSynthesizer::new(48000, 24000));
        let server = Server::bind("127.0.0.1:0", synth.clone(), StreamSettings::default(), policy).await.unwrap();
        let addr = server.local_addr().unwrap();

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        tokio::spawn(server.run(shutdown.clone(), tracker.clone()));
        Running { addr, shutdown, tracker, synth }
    }

    async fn request(client: &mut TcpStream, text: &str) -> Vec<u8> {
        client.write_all(text.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        let mut buf = [0u8; 16384];
        while !response.ends_with(TERMINATOR) {
            let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf)).await.unwrap().unwrap();
            assert!(n > 0, "connection closed before terminator");
            response.extend_from_slice(&buf[..n]);
        }
        response
    }

    #[tokio::test]
    async fn test_supervise_contains_handler_panic() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert!(supervise(1, peer, async {}).await);
        assert!(!supervise(2, peer, async { panic!("handler fault") }).await);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let synth = Arc::new(ScriptedSynthesizer::new(1, 24000));

        let err = Server::bind(&addr, synth, StreamSettings::default(), AdmissionPolicy::Unbounded).await.err().unwrap();
        assert!(err.to_string().contains(&addr));
    }

    #[tokio::test]
    async fn test_two_second_payload_is_four_chunks() {
        let running = start(AdmissionPolicy::Unbounded).await;
        let mut client = TcpStream::connect(running.addr).await.unwrap();

        let response = request(&mut client, "Two seconds of audio.").await;
        assert_eq!(response.len(), 48000 * 4 + TERMINATOR.len());
        assert_eq!(response.windows(TERMINATOR.len()).filter(|w| *w == TERMINATOR).count(), 1);
    }

    #[tokio::test]
    async fn test_failure_on_one_connection_does_not_affect_another() {
        let running = start(AdmissionPolicy::Unbounded).await;
        let mut slow = TcpStream::connect(running.addr).await.unwrap();
        let mut failing = TcpStream::connect(running.addr).await.unwrap();

        let slow_request = tokio::spawn(async move { request(&mut slow, "gated").await });
        running.synth.started().await;

        failing.write_all(b"fail").await.unwrap();
        let mut response = Vec::new();
        failing.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
        assert!(!slow_request.is_finished());

        running.synth.release();
        let response = slow_request.await.unwrap();
        assert_eq!(response.len(), 48000 * 4 + TERMINATOR.len());

        // The server keeps accepting after the failure
        let mut fresh = TcpStream::connect(running.addr).await.unwrap();
        assert!(request(&mut fresh, "again").await.ends_with(TERMINATOR));
        assert_eq!(running.synth.calls(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_clients_are_served_independently() {
        let running = start(AdmissionPolicy::Unbounded).await;

        let mut tasks = Vec::new();
        for i in 0..4 {
            let addr = running.addr;
            tasks.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                request(&mut client, &format!("client {}", i)).await.len()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), 48000 * 4 + TERMINATOR.len());
        }
    }

    #[tokio::test]
    async fn test_limited_admission_waits_for_free_slot() {
        let running = start(AdmissionPolicy::Limited(1)).await;
        let mut first = TcpStream::connect(running.addr).await.unwrap();
        request(&mut first, "first").await;

        // Connects at the TCP level but is not served while `first` is open
        let mut second = TcpStream::connect(running.addr).await.unwrap();
        second.write_all(b"second").await.unwrap();
        let mut buf = [0u8; 16];
        assert!(tokio::time::timeout(Duration::from_millis(200), second.read(&mut buf)).await.is_err());

        drop(first);
        let mut response = Vec::new();
        let mut buf = [0u8; 16384];
        while !response.ends_with(TERMINATOR) {
            let n = tokio::time::timeout(Duration::from_secs(5), second.read(&mut buf)).await.unwrap().unwrap();
            assert!(n > 0);
            response.extend_from_slice(&buf[..n]);
        }
        assert_eq!(running.synth.calls(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_connections() {
        let running = start(AdmissionPolicy::Unbounded).await;
        let mut client = TcpStream::connect(running.addr).await.unwrap();
        request(&mut client, "hello").await;

        running.shutdown.cancel();
        running.tracker.close();
        tokio::time::timeout(Duration::from_secs(5), running.tracker.wait()).await.unwrap();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
