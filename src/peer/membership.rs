//! Ring peer -- joining and graceful departure.

use super::*;

use crate::ring::between;

// RingPeer membership messages handling
impl RingPeer {
    /// Asks `known`, an existing member, to find my place in the ring.
    pub fn start_join(&mut self, known: PeerId) {
        pf_info!("requesting to join the ring through Peer {}", known);
        let joiner = self.me();
        self.send(known, PeerMsg::Join { joiner, hops: 0 });
    }

    /// Handler of Join request. If `joiner` falls between me and my
    /// successor-1, it is inserted right after me; otherwise the request is
    /// routed onwards to successor-1.
    pub(super) fn handle_join(
        &mut self,
        joiner: PeerId,
        hops: u16,
    ) -> Result<(), ChordletError> {
        if joiner == self.me() {
            return logged_err!("join request carries my own ID {}", joiner);
        }
        let Some(s1) = self.state.successor(Slot::First) else {
            pf_warn!("not in the ring yet, dropping join of Peer {}", joiner);
            return Ok(());
        };

        if !between(self.me(), joiner, s1) {
            pf_info!(
                "Peer {} join request forwarded to my successor",
                joiner
            );
            self.forward(PeerMsg::Join { joiner, hops });
            return Ok(());
        }

        pf_info!("Peer {} join request received", joiner);
        let s2 = self.state.successor(Slot::Second).unwrap_or(s1);
        self.send(joiner, PeerMsg::JoinReply { s1, s2 });

        self.state.set_successors(Some(joiner), Some(s1));
        self.log_successors();

        // my predecessor-1 had my old successor-1 as its successor-2
        match self.state.predecessor(Slot::First) {
            Some(p1) => {
                self.send(p1, PeerMsg::SuccessorChange { s2: joiner });
            }
            None => {
                pf_warn!(
                    "predecessor unknown, successor change {} not propagated",
                    joiner
                );
            }
        }
        Ok(())
    }

    /// Handler of Join reply: adopt the successors my inserter handed over.
    pub(super) fn handle_join_reply(&mut self, s1: PeerId, s2: PeerId) {
        pf_info!("join request has been accepted");
        self.state.set_successors(Some(s1), Some(s2));
        self.log_successors();
    }

    /// Handler of successor-change notice: my successor-1 got a new
    /// successor, which becomes my successor-2.
    pub(super) fn handle_successor_change(&mut self, s2: PeerId) {
        self.state.set_successor(Slot::Second, s2);
        self.log_successors();
    }

    /// Handler of graceful departure notice from `leaver`.
    pub(super) fn handle_quit(
        &mut self,
        leaver: PeerId,
        s1: PeerId,
        s2: Option<PeerId>,
        slot: Slot,
    ) -> Result<(), ChordletError> {
        pf_info!("Peer {} will depart from the network", leaver);
        match slot {
            Slot::First => {
                let Some(s2) = s2 else {
                    return logged_err!(
                        "departure notice of {} lacks successor-2",
                        leaver
                    );
                };
                self.state.set_successors(Some(s1), Some(s2));
            }
            Slot::Second => {
                self.state.set_successor(Slot::Second, s1);
            }
        }
        self.log_successors();
        Ok(())
    }

    /// Queues departure notices to both predecessors: predecessor-1 takes
    /// over both my successors, predecessor-2 takes my successor-1 as its
    /// successor-2. Nothing is awaited from them.
    pub fn depart(&mut self) {
        let leaver = self.me();
        let (Some(s1), Some(s2)) = (
            self.state.successor(Slot::First),
            self.state.successor(Slot::Second),
        ) else {
            pf_warn!("successors unknown, leaving without notices");
            return;
        };

        match self.state.predecessor(Slot::First) {
            Some(p1) => self.send(
                p1,
                PeerMsg::Quit {
                    leaver,
                    s1,
                    s2: Some(s2),
                    slot: Slot::First,
                },
            ),
            None => pf_warn!("predecessor-1 unknown, not notified"),
        }
        match self.state.predecessor(Slot::Second) {
            Some(p2) => self.send(
                p2,
                PeerMsg::Quit {
                    leaver,
                    s1,
                    s2: None,
                    slot: Slot::Second,
                },
            ),
            None => pf_warn!("predecessor-2 unknown, not notified"),
        }
    }
}
