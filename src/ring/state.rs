//! Per-peer ring topology record.

use std::fmt;

use super::{PeerId, Slot};

/// Topology view of one peer: its two successors, its two predecessors, and
/// how many probes each successor has left unanswered.
///
/// Successors are set by join/recovery/departure messages; predecessors are
/// only learned from incoming probes and are never verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingState {
    /// My peer ID.
    me: PeerId,

    /// Successor-1 and successor-2.
    successors: [Option<PeerId>; 2],

    /// Predecessor-1 and predecessor-2.
    predecessors: [Option<PeerId>; 2],

    /// Missed probe replies per successor slot.
    missed: [u8; 2],
}

impl RingState {
    /// Creates the state of a peer that does not know its neighbors yet.
    pub fn new(me: PeerId) -> Self {
        RingState {
            me,
            successors: [None, None],
            predecessors: [None, None],
            missed: [0, 0],
        }
    }

    /// Creates the state of a peer started with known successors.
    pub fn with_successors(me: PeerId, s1: PeerId, s2: PeerId) -> Self {
        let mut state = Self::new(me);
        state.successors = [Some(s1), Some(s2)];
        state
    }

    #[inline]
    pub fn me(&self) -> PeerId {
        self.me
    }

    #[inline]
    pub fn successor(&self, slot: Slot) -> Option<PeerId> {
        self.successors[slot.index()]
    }

    #[inline]
    pub fn predecessor(&self, slot: Slot) -> Option<PeerId> {
        self.predecessors[slot.index()]
    }

    #[inline]
    pub fn missed(&self, slot: Slot) -> u8 {
        self.missed[slot.index()]
    }

    /// Returns the slot `peer` currently occupies among my successors, if
    /// any (the first one if it occupies both).
    pub fn successor_slot_of(&self, peer: PeerId) -> Option<Slot> {
        Slot::BOTH
            .into_iter()
            .find(|&slot| self.successor(slot) == Some(peer))
    }

    /// Replaces both successors. Missed counters follow peer identity: a
    /// peer that moves from one slot to the other keeps its count, a peer
    /// new to the successor set starts from zero.
    pub fn set_successors(&mut self, s1: Option<PeerId>, s2: Option<PeerId>) {
        let carried = |new: Option<PeerId>| -> u8 {
            new.and_then(|id| self.successor_slot_of(id))
                .map_or(0, |slot| self.missed(slot))
        };
        let missed = [carried(s1), carried(s2)];

        self.successors = [s1, s2];
        self.missed = missed;
    }

    /// Replaces the successor in one slot, leaving the other untouched.
    pub fn set_successor(&mut self, slot: Slot, id: PeerId) {
        match slot {
            Slot::First => self.set_successors(Some(id), self.successors[1]),
            Slot::Second => self.set_successors(self.successors[0], Some(id)),
        }
    }

    pub fn set_predecessor(&mut self, slot: Slot, id: PeerId) {
        self.predecessors[slot.index()] = Some(id);
    }

    /// Records that a probe went out to the successor in `slot`.
    pub fn note_probe_sent(&mut self, slot: Slot) {
        let cnt = &mut self.missed[slot.index()];
        *cnt = cnt.saturating_add(1);
    }

    /// Records a probe reply from `peer`. Returns the slot credited, or
    /// `None` if `peer` is no longer one of my successors (stale reply).
    ///
    /// Counters never go below zero, so duplicated replies cannot bank
    /// credit that would later hide a dead successor.
    pub fn note_reply_from(&mut self, peer: PeerId) -> Option<Slot> {
        // with a two-peer ring both slots hold the same peer; credit the
        // slot that is actually waiting on a reply
        let slot = Slot::BOTH
            .into_iter()
            .filter(|&slot| self.successor(slot) == Some(peer))
            .max_by_key(|&slot| (self.missed(slot), slot == Slot::First))?;

        let cnt = &mut self.missed[slot.index()];
        *cnt = cnt.saturating_sub(1);
        Some(slot)
    }

    /// Returns true if the successor in `slot` missed more than `threshold`
    /// probe replies.
    #[inline]
    pub fn is_overdue(&self, slot: Slot, threshold: u8) -> bool {
        self.missed(slot) > threshold
    }

    /// Pushes the successor in `slot` past the missed threshold so the next
    /// probe round declares it dead.
    pub fn mark_unreachable(&mut self, slot: Slot, threshold: u8) {
        let cnt = &mut self.missed[slot.index()];
        *cnt = (*cnt).max(threshold.saturating_add(1));
    }

    pub fn reset_missed(&mut self, slot: Slot) {
        self.missed[slot.index()] = 0;
    }
}

impl fmt::Display for RingState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let show = |id: Option<PeerId>| match id {
            Some(id) => id.to_string(),
            None => "-".into(),
        };
        write!(
            f,
            "s1={} s2={} p1={} p2={}",
            show(self.successors[0]),
            show(self.successors[1]),
            show(self.predecessors[0]),
            show(self.predecessors[1])
        )
    }
}

#[cfg(test)]
mod state_tests {
    use super::*;

    #[test]
    fn fresh_state() {
        let state = RingState::new(10);
        assert_eq!(state.me(), 10);
        assert_eq!(state.successor(Slot::First), None);
        assert_eq!(state.predecessor(Slot::Second), None);
        assert_eq!(format!("{}", state), "s1=- s2=- p1=- p2=-");
    }

    #[test]
    fn reply_counter_floor() {
        let mut state = RingState::with_successors(10, 20, 30);
        state.note_probe_sent(Slot::First);
        assert_eq!(state.note_reply_from(20), Some(Slot::First));
        // duplicated replies do not push the counter below zero
        assert_eq!(state.note_reply_from(20), Some(Slot::First));
        assert_eq!(state.note_reply_from(20), Some(Slot::First));
        assert_eq!(state.missed(Slot::First), 0);
        for _ in 0..3 {
            state.note_probe_sent(Slot::First);
        }
        assert!(state.is_overdue(Slot::First, 2));
    }

    #[test]
    fn stale_reply_ignored() {
        let mut state = RingState::with_successors(10, 20, 30);
        state.note_probe_sent(Slot::First);
        state.note_probe_sent(Slot::Second);
        assert_eq!(state.note_reply_from(5), None);
        assert_eq!(state.missed(Slot::First), 1);
        assert_eq!(state.missed(Slot::Second), 1);
    }

    #[test]
    fn two_peer_ring_credits_both_slots() {
        let mut state = RingState::with_successors(10, 20, 20);
        state.note_probe_sent(Slot::First);
        state.note_probe_sent(Slot::Second);
        state.note_reply_from(20);
        state.note_reply_from(20);
        assert_eq!(state.missed(Slot::First), 0);
        assert_eq!(state.missed(Slot::Second), 0);
    }

    #[test]
    fn counters_follow_identity() {
        let mut state = RingState::with_successors(10, 20, 30);
        state.note_probe_sent(Slot::First);
        state.note_probe_sent(Slot::Second);
        state.note_probe_sent(Slot::Second);
        // 30 moves up to slot 1, 5 is new
        state.set_successors(Some(30), Some(5));
        assert_eq!(state.missed(Slot::First), 2);
        assert_eq!(state.missed(Slot::Second), 0);
        state.set_successor(Slot::Second, 40);
        assert_eq!(state.successor(Slot::First), Some(30));
        assert_eq!(state.missed(Slot::First), 2);
    }

    #[test]
    fn unreachable_marks_overdue() {
        let mut state = RingState::with_successors(10, 20, 30);
        assert!(!state.is_overdue(Slot::Second, 2));
        state.mark_unreachable(Slot::Second, 2);
        assert!(state.is_overdue(Slot::Second, 2));
        state.reset_missed(Slot::Second);
        assert_eq!(state.missed(Slot::Second), 0);
        assert_eq!(state.successor_slot_of(30), Some(Slot::Second));
    }
}
