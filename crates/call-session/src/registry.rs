use std::collections::VecDeque;

use crate::event::{Identity, IceCandidate, SessionDescription};

/// Identity of a pending offer: two offers from one sender with different
/// bodies are distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OfferKey {
    pub sender_id: Identity,
    pub sdp: String,
}

impl OfferKey {
    pub fn new(sender_id: Identity, sdp: impl Into<String>) -> Self {
        Self {
            sender_id,
            sdp: sdp.into(),
        }
    }
}

/// Inbound call the local user has not accepted or rejected yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOffer {
    pub sender_id: Identity,
    pub sender_username: String,
    pub offer: SessionDescription,
    early_candidates: Vec<IceCandidate>,
}

impl PendingOffer {
    pub fn new(sender_id: Identity, sender_username: impl Into<String>, offer: SessionDescription) -> Self {
        Self {
            sender_id,
            sender_username: sender_username.into(),
            offer,
            early_candidates: Vec::new(),
        }
    }

    pub fn key(&self) -> OfferKey {
        OfferKey::new(self.sender_id.clone(), self.offer.sdp.clone())
    }

    pub fn matches(&self, sender_id: &Identity, sdp: &str) -> bool {
        self.sender_id == *sender_id && self.offer.sdp == sdp
    }

    /// Candidates the caller trickled before this offer was accepted.
    pub fn early_candidates(&self) -> &[IceCandidate] {
        &self.early_candidates
    }

    pub(crate) fn take_early_candidates(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.early_candidates)
    }
}

/// Pending inbound offers in arrival order.
#[derive(Debug, Clone, Default)]
pub struct IncomingCallRegistry {
    entries: Vec<PendingOffer>,
}

impl IncomingCallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when an entry with the same sender and body exists.
    pub fn add(&mut self, offer: PendingOffer) -> bool {
        if self.contains(&offer.key()) {
            return false;
        }
        self.entries.push(offer);
        true
    }

    pub fn remove(&mut self, sender_id: &Identity, sdp: &str) -> Option<PendingOffer> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.matches(sender_id, sdp))?;
        Some(self.entries.remove(index))
    }

    pub fn remove_key(&mut self, key: &OfferKey) -> Option<PendingOffer> {
        self.remove(&key.sender_id, &key.sdp)
    }

    /// Drops every offer from `sender_id`, returning them in arrival order.
    pub fn remove_from(&mut self, sender_id: &Identity) -> Vec<PendingOffer> {
        let (removed, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| entry.sender_id == *sender_id);
        self.entries = kept;
        removed
    }

    pub fn contains(&self, key: &OfferKey) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.matches(&key.sender_id, &key.sdp))
    }

    pub fn get(&self, key: &OfferKey) -> Option<&PendingOffer> {
        self.entries
            .iter()
            .find(|entry| entry.matches(&key.sender_id, &key.sdp))
    }

    pub fn has_offer_from(&self, sender_id: &Identity) -> bool {
        self.entries.iter().any(|entry| entry.sender_id == *sender_id)
    }

    /// Attach a candidate to the newest offer from `sender_id`. Returns false
    /// when that sender has nothing pending.
    pub fn stash_candidate(&mut self, sender_id: &Identity, candidate: IceCandidate) -> bool {
        match self
            .entries
            .iter_mut()
            .rev()
            .find(|entry| entry.sender_id == *sender_id)
        {
            Some(entry) => {
                entry.early_candidates.push(candidate);
                true
            }
            None => false,
        }
    }

    /// Lazy view over the current entries; clone the iterator to restart it.
    pub fn list(&self) -> impl Iterator<Item = &PendingOffer> + Clone + '_ {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<PendingOffer> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Offers already accepted, rejected or cancelled. Late copies of their
/// call requests must not ring again. Oldest keys are forgotten first.
#[derive(Debug, Clone)]
pub(crate) struct SettledOffers {
    keys: VecDeque<OfferKey>,
    capacity: usize,
}

impl SettledOffers {
    pub(crate) const DEFAULT_CAPACITY: usize = 64;

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn settle(&mut self, key: OfferKey) {
        if self.contains(&key) {
            return;
        }
        if self.keys.len() == self.capacity {
            self.keys.pop_front();
        }
        self.keys.push_back(key);
    }

    pub(crate) fn contains(&self, key: &OfferKey) -> bool {
        self.keys.contains(key)
    }
}

impl Default for SettledOffers {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(sender: &str, sdp: &str) -> PendingOffer {
        PendingOffer::new(sender.into(), format!("{sender}-name"), SessionDescription::offer(sdp))
    }

    #[test]
    fn duplicate_offer_is_stored_once() {
        let mut registry = IncomingCallRegistry::new();
        assert!(registry.add(offer("x", "sdp-1")));
        assert!(!registry.add(offer("x", "sdp-1")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn same_sender_new_body_rings_again() {
        let mut registry = IncomingCallRegistry::new();
        registry.add(offer("x", "sdp-1"));
        registry.add(offer("x", "sdp-2"));
        registry.add(offer("y", "sdp-1"));
        let senders: Vec<_> = registry
            .list()
            .map(|entry| (entry.sender_id.as_str().to_string(), entry.offer.sdp.clone()))
            .collect();
        assert_eq!(
            senders,
            vec![
                ("x".to_string(), "sdp-1".to_string()),
                ("x".to_string(), "sdp-2".to_string()),
                ("y".to_string(), "sdp-1".to_string()),
            ]
        );
    }

    #[test]
    fn list_is_restartable() {
        let mut registry = IncomingCallRegistry::new();
        registry.add(offer("x", "a"));
        registry.add(offer("y", "b"));
        let listing = registry.list();
        assert_eq!(listing.clone().count(), 2);
        assert_eq!(listing.map(|entry| entry.offer.sdp.as_str()).collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn remove_matches_sender_and_body() {
        let mut registry = IncomingCallRegistry::new();
        registry.add(offer("x", "a"));
        registry.add(offer("x", "b"));
        assert!(registry.remove(&"x".into(), "c").is_none());
        let removed = registry.remove(&"x".into(), "a").expect("removed");
        assert_eq!(removed.offer.sdp, "a");
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(&OfferKey::new("x".into(), "b")));
    }

    #[test]
    fn remove_from_keeps_other_senders_in_order() {
        let mut registry = IncomingCallRegistry::new();
        registry.add(offer("x", "a"));
        registry.add(offer("y", "b"));
        registry.add(offer("x", "c"));
        registry.add(offer("z", "d"));
        let removed = registry.remove_from(&"x".into());
        assert_eq!(removed.len(), 2);
        let rest: Vec<_> = registry.list().map(|entry| entry.offer.sdp.as_str()).collect();
        assert_eq!(rest, ["b", "d"]);
    }

    #[test]
    fn early_candidates_land_on_newest_offer() {
        let mut registry = IncomingCallRegistry::new();
        registry.add(offer("x", "a"));
        registry.add(offer("x", "b"));
        assert!(registry.stash_candidate(&"x".into(), IceCandidate::new("c1", None, None)));
        assert!(!registry.stash_candidate(&"nobody".into(), IceCandidate::new("c2", None, None)));
        let mut newest = registry.remove(&"x".into(), "b").unwrap();
        assert_eq!(newest.take_early_candidates().len(), 1);
        let older = registry.remove(&"x".into(), "a").unwrap();
        assert!(older.early_candidates().is_empty());
    }

    #[test]
    fn settled_offers_forget_the_oldest() {
        let mut settled = SettledOffers::with_capacity(2);
        let first = OfferKey::new("x".into(), "sdp-1");
        settled.settle(first.clone());
        settled.settle(first.clone());
        settled.settle(OfferKey::new("x".into(), "sdp-2"));
        assert!(settled.contains(&first));

        settled.settle(OfferKey::new("y".into(), "sdp-3"));
        assert!(!settled.contains(&first));
        assert!(settled.contains(&OfferKey::new("x".into(), "sdp-2")));
    }
}
