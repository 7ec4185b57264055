//! Connection admission.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// How many clients may be connected at once.
///
/// The default admits everyone; a limit makes the accept loop wait for a
/// free slot before taking the next connection off the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    #[default]
    Unbounded,
    Limited(usize),
}

impl AdmissionPolicy {
    /// `0` means no limit.
    pub fn from_limit(limit: usize) -> Self {
        match limit {
            0 => AdmissionPolicy::Unbounded,
            n => AdmissionPolicy::Limited(n),
        }
    }
}

/// Runtime side of an [`AdmissionPolicy`].
#[derive(Debug, Clone)]
pub(crate) struct Gate {
    slots: Option<Arc<Semaphore>>,
}

/// Held by a connection task for as long as its socket is open.
#[derive(Debug)]
pub(crate) struct Ticket {
    _permit: Option<OwnedSemaphorePermit>,
}

impl Gate {
    pub fn new(policy: AdmissionPolicy) -> Self {
        let slots = match policy {
            AdmissionPolicy::Unbounded => None,
            AdmissionPolicy::Limited(n) => Some(Arc::new(Semaphore::new(n))),
        };
        Self { slots }
    }

    /// Wait until another connection may be admitted.
    pub async fn admit(&self) -> Ticket {
        let permit = match &self.slots {
            // The semaphore is never closed, so acquiring only fails if that changes
            Some(slots) => Arc::clone(slots).acquire_owned().await.ok(),
            None => None,
        };
        Ticket { _permit: permit }
    }
}
