//! Ring peer -- successor liveness probing.

use super::*;

// RingPeer failure detection
impl RingPeer {
    /// One probing round: every known successor that left too many probes
    /// unanswered is declared dead and recovery starts for its slot; every
    /// other known successor gets a fresh probe.
    pub fn probe_round(&mut self) {
        pf_debug!("ping requests sent to successors {}", self.state);

        for slot in Slot::BOTH {
            let Some(succ) = self.state.successor(slot) else {
                continue;
            };

            if self.state.is_overdue(slot, self.config.miss_threshold) {
                pf_warn!(
                    "successor-{} Peer {} missed {} probes, presumed dead",
                    slot,
                    succ,
                    self.state.missed(slot)
                );
                self.state.reset_missed(slot);
                self.start_recovery(slot);
            } else {
                self.probe(succ, ProbeMsg::PingRequest { slot });
                self.state.note_probe_sent(slot);
            }
        }
    }

    /// Handler of probe from a peer that holds me in its successor `slot`.
    pub(super) fn handle_ping_request(&mut self, from: PeerId, slot: Slot) {
        pf_debug!("ping request message received from Peer {}", from);
        if self.state.predecessor(slot) != Some(from) {
            pf_info!("my predecessor-{} is now Peer {}", slot, from);
        }
        self.state.set_predecessor(slot, from);
        self.probe(from, ProbeMsg::PingReply);
    }

    /// Handler of probe reply from a successor.
    pub(super) fn handle_ping_reply(&mut self, from: PeerId) {
        match self.state.note_reply_from(from) {
            Some(slot) => {
                pf_debug!(
                    "ping response received from Peer {} (successor-{})",
                    from,
                    slot
                );
            }
            None => {
                pf_trace!("stale ping response from Peer {} ignored", from);
            }
        }
    }

    /// Handler of a failed stream send to `peer`. If `peer` is one of my
    /// successors, it is treated exactly like a successor that stopped
    /// answering probes: the next probing round starts recovery for it.
    pub fn handle_unreachable(&mut self, peer: PeerId) {
        let mut hit = false;
        for slot in Slot::BOTH {
            if self.state.successor(slot) == Some(peer) {
                self.state.mark_unreachable(slot, self.config.miss_threshold);
                hit = true;
            }
        }

        if hit {
            pf_warn!("successor Peer {} unreachable, recovery scheduled", peer);
        } else {
            pf_debug!("Peer {} unreachable", peer);
        }
    }
}
