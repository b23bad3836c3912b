//! Ring peer -- recovery from abruptly vanished successors.

use super::*;

// RingPeer successor recovery
impl RingPeer {
    /// Reports the death of my successor in `dead` to my other successor,
    /// whose reply will tell me how to patch my successor pair.
    pub(super) fn start_recovery(&mut self, dead: Slot) {
        let reporter = self.me();
        match self.state.successor(dead.other()) {
            Some(other) => {
                pf_info!(
                    "asking Peer {} to help replace dead successor-{}",
                    other,
                    dead
                );
                self.send(other, PeerMsg::Vanished { reporter, slot: dead });
            }
            None => {
                pf_error!(
                    "successor-{} dead and no other successor to ask",
                    dead
                );
            }
        }
    }

    /// Handler of vanished report: answer with my successors so the
    /// reporter can patch its view.
    pub(super) fn handle_vanished(
        &mut self,
        reporter: PeerId,
        slot: Slot,
    ) -> Result<(), ChordletError> {
        let (Some(s1), Some(s2)) = (
            self.state.successor(Slot::First),
            self.state.successor(Slot::Second),
        ) else {
            return logged_err!(
                "cannot help Peer {} recover, my successors are unknown",
                reporter
            );
        };
        pf_debug!("Peer {} reports its successor-{} dead", reporter, slot);
        self.send(reporter, PeerMsg::VanishedReply { s1, s2, slot });
        Ok(())
    }

    /// Handler of vanished reply carrying the helper's successors `s1` and
    /// `s2` and the slot that died at my side.
    ///
    /// Successor-1 dead: the helper was my successor-2, which moves up, and
    /// its successor-1 becomes my new successor-2.
    ///
    /// Successor-2 dead: the helper is my successor-1. If its reported
    /// successor-1 is still my dead successor-2, the helper has not noticed
    /// the death yet and its successor-2 is the right replacement; otherwise
    /// its successor-1 is.
    pub(super) fn handle_vanished_reply(
        &mut self,
        s1: PeerId,
        s2: PeerId,
        slot: Slot,
    ) {
        let dead = self.state.successor(slot);
        match dead {
            Some(dead) => pf_info!("Peer {} is no longer alive", dead),
            None => pf_warn!("recovery reply for an empty successor-{}", slot),
        }

        match slot {
            Slot::First => {
                let new_s1 = self.state.successor(Slot::Second);
                self.state.set_successors(new_s1, Some(s1));
            }
            Slot::Second => {
                let new_s2 = if dead == Some(s1) { s2 } else { s1 };
                self.state.set_successor(Slot::Second, new_s2);
            }
        }
        self.log_successors();
    }
}
