use std::collections::VecDeque;

use tracing::debug;

use crate::error::PeerLinkError;
use crate::event::IceCandidate;
use crate::peer::PeerLink;

/// Outcome of flushing queued candidates into a link.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub applied: usize,
    pub failures: Vec<(IceCandidate, PeerLinkError)>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Remote candidates held back until the remote description is in place.
#[derive(Debug, Default)]
pub struct IceCandidateQueue {
    pending: VecDeque<IceCandidate>,
}

impl IceCandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    pub fn extend(&mut self, candidates: impl IntoIterator<Item = IceCandidate>) {
        self.pending.extend(candidates);
    }

    /// Put candidates that were received before anything already queued at
    /// the front, keeping their relative order.
    pub fn prepend_earlier(&mut self, earlier: Vec<IceCandidate>) {
        for candidate in earlier.into_iter().rev() {
            self.pending.push_front(candidate);
        }
    }

    /// Empty the queue, returning its contents in arrival order.
    pub fn take(&mut self) -> IceCandidateQueue {
        IceCandidateQueue {
            pending: std::mem::take(&mut self.pending),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IceCandidate> {
        self.pending.iter()
    }

    /// Apply every queued candidate in arrival order. A rejected candidate is
    /// recorded and the rest are still applied. The queue is empty afterwards.
    pub async fn drain_into(&mut self, link: &dyn PeerLink) -> DrainReport {
        let pending = std::mem::take(&mut self.pending);
        let mut report = DrainReport::default();
        for candidate in pending {
            match link.add_remote_candidate(candidate.clone()).await {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    debug!(target = "call.ice", error = %err, "queued candidate rejected");
                    report.failures.push((candidate, err));
                }
            }
        }
        report
    }
}
