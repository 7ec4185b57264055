//! Synthesizer doubles for exercising the server without model files.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use super::{AudioPayload, SynthesisError, Synthesizer};

/// Answers every request with a copy of the same payload, except for a few
/// trigger texts:
///
/// * `fail` returns an engine error
/// * `panic` panics inside the call
/// * `gated` signals [`ScriptedSynthesizer::started`] and blocks until
///   [`ScriptedSynthesizer::release`] is called
pub struct ScriptedSynthesizer {
    payload: AudioPayload,
    calls: AtomicUsize,
    started: Notify,
    released: Mutex<bool>,
    gate: Condvar,
}

impl ScriptedSynthesizer {
    pub fn new(sample_count: usize, sample_rate: u32) -> Self {
        Self {
            payload: AudioPayload::new(ramp(sample_count), sample_rate),
            calls: AtomicUsize::new(0),
            started: Notify::new(),
            released: Mutex::new(false),
            gate: Condvar::new(),
        }
    }

    pub fn payload(&self) -> &AudioPayload {
        &self.payload
    }

    /// Number of `synthesize` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resolves once a `gated` request is inside `synthesize`.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    /// Let every current and future `gated` request finish.
    pub fn release(&self) {
        *self.released.lock() = true;
        self.gate.notify_all();
    }
}

impl Synthesizer for ScriptedSynthesizer {
    fn synthesize(&self, text: &str) -> Result<AudioPayload, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match text {
            "fail" => Err(SynthesisError::Engine("scripted failure".to_string())),
            "panic" => panic!("scripted panic"),
            "gated" => {
                self.started.notify_one();
                let mut released = self.released.lock();
                while !*released {
                    self.gate.wait(&mut released);
                }
                Ok(self.payload.clone())
            }
            _ => Ok(self.payload.clone()),
        }
    }
}

/// Distinct, exactly representable sample values.
pub fn ramp(len: usize) -> Vec<f32> {
    (0..len).map(|i| (i % 1000) as f32 / 1000.0 - 0.5).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warm_up_runs_one_synthesis() {
        let synth = ScriptedSynthesizer::new(10, 24000);
        synth.warm_up("Warm-up text for the model.").unwrap();
        assert_eq!(synth.calls(), 1);
    }

    #[test]
    fn test_warm_up_propagates_failure() {
        let synth = ScriptedSynthesizer::new(10, 24000);
        assert!(matches!(synth.warm_up("fail"), Err(SynthesisError::Engine(_))));
    }

    #[tokio::test]
    async fn test_gated_request_waits_for_release() {
        let synth = std::sync::Arc::new(ScriptedSynthesizer::new(10, 24000));
        let worker = {
            let synth = synth.clone();
            tokio::task::spawn_blocking(move || synth.synthesize("gated"))
        };

        synth.started().await;
        assert!(!worker.is_finished());

        synth.release();
        assert_eq!(worker.await.unwrap().unwrap().samples.len(), 10);
    }

    #[test]
    fn test_payload_duration() {
        assert_eq!(AudioPayload::new(vec![0.0; 48000], 24000).duration_secs(), 2.0);
        assert_eq!(AudioPayload::new(vec![0.0; 10], 0).duration_secs(), 0.0);
    }
}
