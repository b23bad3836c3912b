//! Ring peer -- hashed file placement and lookup.

use super::*;

use crate::ring::{between, owner_of};

// RingPeer storage requests handling
impl RingPeer {
    /// Returns true if I am the rightful owner of `key`: either the key
    /// hashes exactly to me, or to a point between my predecessor-1 and me.
    ///
    /// Until a probe has taught me my predecessor-1, only exact hits count.
    pub fn owns(&self, key: FileKey) -> bool {
        let owner = owner_of(key, self.config.ring_size);
        owner == self.me()
            || self
                .state
                .predecessor(Slot::First)
                .is_some_and(|p1| between(p1, owner, self.me()))
    }

    /// Stores `key` here if I own it, otherwise routes the store request
    /// onwards to successor-1.
    pub fn store(&mut self, key: FileKey, hops: u16) {
        if self.owns(key) {
            self.files.insert(key);
            pf_info!("store {} request accepted", key);
        } else {
            pf_info!("store {} request forwarded to my successor", key);
            self.forward(PeerMsg::Store { key, hops });
        }
    }

    /// Serves the file of `key` to `requester` if I own it, otherwise routes
    /// the request onwards to successor-1.
    pub fn retrieve(&mut self, key: FileKey, requester: PeerId, hops: u16) {
        if !self.owns(key) {
            pf_info!("file request for {} has been sent to my successor", key);
            self.forward(PeerMsg::FileRequest {
                key,
                requester,
                hops,
            });
            return;
        }

        if self.files.contains(&key) {
            pf_info!("file {} is stored here", key);
            self.effects.push(Effect::Transfer { to: requester, key });
        } else {
            self.miss(key, requester);
        }
    }

    /// Reports that I own `key` but cannot serve it.
    pub(super) fn miss(&mut self, key: FileKey, requester: PeerId) {
        let owner = self.me();
        if requester == owner {
            pf_warn!("file {} not found, I own it but do not hold it", key);
        } else {
            pf_warn!("file {} not found here, telling Peer {}", key, requester);
            self.send(requester, PeerMsg::NotFound { key, owner });
        }
    }

    /// Operator-issued retrieval: nothing to fetch if the file is here.
    pub fn request(&mut self, key: FileKey) {
        if self.files.contains(&key) {
            pf_info!("file {} already at {}", key, self.me());
        } else {
            self.retrieve(key, self.me(), 0);
        }
    }

    /// Handler of not-found answer from the owner of `key`.
    pub(super) fn handle_not_found(&mut self, key: FileKey, owner: PeerId) {
        pf_warn!("file {} not found at its owner Peer {}", key, owner);
    }

    /// Called by the driver when a local file of `key` cannot be sent; the
    /// requester still deserves an answer.
    pub fn transfer_failed(&mut self, key: FileKey, requester: PeerId) {
        self.miss(key, requester);
    }
}
