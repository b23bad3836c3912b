//! Peer-to-peer wire messages: tagged, space-delimited text records.

use std::fmt;
use std::str::{FromStr, SplitWhitespace};

use crate::ring::{FileKey, PeerId, Slot};
use crate::utils::ChordletError;

/// Single-token acknowledgment a transfer receiver answers an offer with.
pub const TRANSFER_APPROVED: &str = "APPROVED";

/// Datagram messages used for liveness probing.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProbeMsg {
    /// Liveness probe, tagged with the successor slot the receiver occupies
    /// in the sender's view.
    PingRequest { slot: Slot },

    /// Probe acknowledgment.
    PingReply,
}

/// Stream messages carrying ring maintenance and storage traffic.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PeerMsg {
    /// Request to insert `joiner` into the ring.
    Join { joiner: PeerId, hops: u16 },

    /// Join accepted; carries the joiner's new successors.
    JoinReply { s1: PeerId, s2: PeerId },

    /// Successor-chain update: receiver's new successor-2.
    SuccessorChange { s2: PeerId },

    /// Graceful departure notice from `leaver`. `s2` is only carried in the
    /// notice for the leaver's predecessor-1.
    Quit {
        leaver: PeerId,
        s1: PeerId,
        s2: Option<PeerId>,
        slot: Slot,
    },

    /// `reporter` found its successor in `slot` dead.
    Vanished { reporter: PeerId, slot: Slot },

    /// Answer to a vanished report: the answering peer's successors and the
    /// echoed dead slot.
    VanishedReply { s1: PeerId, s2: PeerId, slot: Slot },

    /// Request to store `key` at its owner.
    Store { key: FileKey, hops: u16 },

    /// Request to send the file of `key` to `requester`.
    FileRequest {
        key: FileKey,
        requester: PeerId,
        hops: u16,
    },

    /// The owner of `key` does not hold it.
    NotFound { key: FileKey, owner: PeerId },

    /// Offer to transfer file `fname` from `sender`; raw bytes follow once
    /// the receiver answers with `APPROVED`.
    Transfer { sender: PeerId, fname: String },
}

impl PeerMsg {
    /// Returns the hop count of routed requests, `None` for others.
    pub fn hops(&self) -> Option<u16> {
        match self {
            PeerMsg::Join { hops, .. }
            | PeerMsg::Store { hops, .. }
            | PeerMsg::FileRequest { hops, .. } => Some(*hops),
            _ => None,
        }
    }

    /// Returns a copy of a routed request with its hop count bumped.
    pub fn forwarded(&self) -> Self {
        let mut msg = self.clone();
        match &mut msg {
            PeerMsg::Join { hops, .. }
            | PeerMsg::Store { hops, .. }
            | PeerMsg::FileRequest { hops, .. } => {
                *hops = hops.saturating_add(1);
            }
            _ => {}
        }
        msg
    }
}

/// Writes an optional trailing hop count; zero is omitted so first sends
/// keep the plain form.
fn fmt_hops(f: &mut fmt::Formatter, hops: u16) -> fmt::Result {
    if hops > 0 {
        write!(f, " {}", hops)
    } else {
        Ok(())
    }
}

impl fmt::Display for ProbeMsg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProbeMsg::PingRequest { slot } => {
                write!(f, "REQUEST:Ping {}", slot)
            }
            ProbeMsg::PingReply => write!(f, "REPLY:Ping"),
        }
    }
}

impl fmt::Display for PeerMsg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PeerMsg::Join { joiner, hops } => {
                write!(f, "REQUEST:Join {}", joiner)?;
                fmt_hops(f, *hops)
            }
            PeerMsg::JoinReply { s1, s2 } => {
                write!(f, "REPLY:Join {} {}", s1, s2)
            }
            PeerMsg::SuccessorChange { s2 } => write!(f, "SCR {}", s2),
            PeerMsg::Quit {
                leaver,
                s1,
                s2,
                slot,
            } => match s2 {
                Some(s2) => write!(f, "QUIT {} {} {} {}", leaver, s1, s2, slot),
                None => write!(f, "QUIT {} {} {}", leaver, s1, slot),
            },
            PeerMsg::Vanished { reporter, slot } => {
                write!(f, "SVR: {} {}", reporter, slot)
            }
            PeerMsg::VanishedReply { s1, s2, slot } => {
                write!(f, "REPLY:SVR: {} {} {}", s1, s2, slot)
            }
            PeerMsg::Store { key, hops } => {
                write!(f, "STORE: {}", key)?;
                fmt_hops(f, *hops)
            }
            PeerMsg::FileRequest {
                key,
                requester,
                hops,
            } => {
                write!(f, "REQUEST:FILE: {} {}", key, requester)?;
                fmt_hops(f, *hops)
            }
            PeerMsg::NotFound { key, owner } => {
                write!(f, "NOTFOUND: {} {}", key, owner)
            }
            PeerMsg::Transfer { sender, fname } => {
                write!(f, "TRANSFER: {} {}", sender, fname)
            }
        }
    }
}

/// Whitespace-separated field cursor over one message.
struct Fields<'s> {
    text: &'s str,
    segs: SplitWhitespace<'s>,
}

impl<'s> Fields<'s> {
    fn new(text: &'s str) -> Self {
        Fields {
            text,
            segs: text.split_whitespace(),
        }
    }

    /// Expect to get the next field and parse it.
    fn next<T: FromStr>(&mut self, what: &str) -> Result<T, ChordletError> {
        self.segs
            .next()
            .and_then(|seg| seg.parse().ok())
            .ok_or_else(|| {
                ChordletError::msg(format!(
                    "missing or invalid {} in '{}'",
                    what, self.text
                ))
            })
    }

    /// Parse the next field if there is one.
    fn maybe_next<T: FromStr>(
        &mut self,
        what: &str,
    ) -> Result<Option<T>, ChordletError> {
        match self.segs.next() {
            None => Ok(None),
            Some(seg) => seg.parse().map(Some).map_err(|_| {
                ChordletError::msg(format!(
                    "invalid {} in '{}'",
                    what, self.text
                ))
            }),
        }
    }

    fn slot(&mut self) -> Result<Slot, ChordletError> {
        let num: u8 = self.next("slot")?;
        Slot::from_number(num).ok_or_else(|| {
            ChordletError::msg(format!(
                "invalid slot {} in '{}'",
                num, self.text
            ))
        })
    }

    /// Errors out if unconsumed fields remain.
    fn finish(mut self) -> Result<(), ChordletError> {
        match self.segs.next() {
            None => Ok(()),
            Some(extra) => Err(ChordletError::msg(format!(
                "unexpected field '{}' in '{}'",
                extra, self.text
            ))),
        }
    }
}

impl FromStr for ProbeMsg {
    type Err = ChordletError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut fields = Fields::new(text);
        let msg = match fields.segs.next() {
            Some("REQUEST:Ping") => ProbeMsg::PingRequest {
                slot: fields.slot()?,
            },
            Some("REPLY:Ping") => ProbeMsg::PingReply,
            _ => {
                return Err(ChordletError::msg(format!(
                    "unrecognized probe message '{}'",
                    text
                )))
            }
        };
        fields.finish()?;
        Ok(msg)
    }
}

impl FromStr for PeerMsg {
    type Err = ChordletError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut fields = Fields::new(text);
        let msg = match fields.segs.next() {
            Some("REQUEST:Join") => PeerMsg::Join {
                joiner: fields.next("joiner id")?,
                hops: fields.maybe_next("hops")?.unwrap_or(0),
            },

            Some("REPLY:Join") => PeerMsg::JoinReply {
                s1: fields.next("successor-1")?,
                s2: fields.next("successor-2")?,
            },

            Some("SCR") => PeerMsg::SuccessorChange {
                s2: fields.next("successor-2")?,
            },

            Some("QUIT") => {
                // QUIT <id> <s1> [<s2>] <slot>: the slot is always last
                let leaver = fields.next("leaver id")?;
                let s1 = fields.next("successor-1")?;
                let rest: Vec<&str> = fields.segs.by_ref().collect();
                let (s2, slot) = match rest[..] {
                    [slot] => (None, slot),
                    [s2, slot] => (Some(s2.parse()?), slot),
                    _ => {
                        return Err(ChordletError::msg(format!(
                            "malformed quit notice '{}'",
                            text
                        )))
                    }
                };
                let slot = Slot::from_number(slot.parse()?).ok_or_else(|| {
                    ChordletError::msg(format!("invalid slot in '{}'", text))
                })?;
                PeerMsg::Quit {
                    leaver,
                    s1,
                    s2,
                    slot,
                }
            }

            Some("SVR:") => PeerMsg::Vanished {
                reporter: fields.next("reporter id")?,
                slot: fields.slot()?,
            },

            Some("REPLY:SVR:") => PeerMsg::VanishedReply {
                s1: fields.next("successor-1")?,
                s2: fields.next("successor-2")?,
                slot: fields.slot()?,
            },

            Some("STORE:") => PeerMsg::Store {
                key: fields.next("file key")?,
                hops: fields.maybe_next("hops")?.unwrap_or(0),
            },

            Some("REQUEST:FILE:") => PeerMsg::FileRequest {
                key: fields.next("file key")?,
                requester: fields.next("requester id")?,
                hops: fields.maybe_next("hops")?.unwrap_or(0),
            },

            Some("NOTFOUND:") => PeerMsg::NotFound {
                key: fields.next("file key")?,
                owner: fields.next("owner id")?,
            },

            Some("TRANSFER:") => PeerMsg::Transfer {
                sender: fields.next("sender id")?,
                fname: fields.next("file name")?,
            },

            _ => {
                return Err(ChordletError::msg(format!(
                    "unrecognized peer message '{}'",
                    text
                )))
            }
        };
        fields.finish()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod messages_tests {
    use super::*;

    #[test]
    fn probe_wire_form() -> Result<(), ChordletError> {
        let ping = ProbeMsg::PingRequest { slot: Slot::Second };
        assert_eq!(ping.to_string(), "REQUEST:Ping 2");
        assert_eq!("REQUEST:Ping 2".parse::<ProbeMsg>()?, ping);
        assert_eq!("REPLY:Ping".parse::<ProbeMsg>()?, ProbeMsg::PingReply);
        assert!("REQUEST:Ping 3".parse::<ProbeMsg>().is_err());
        assert!("REQUEST:Ping".parse::<ProbeMsg>().is_err());
        assert!("REPLY:Ping 1".parse::<ProbeMsg>().is_err());
        Ok(())
    }

    #[test]
    fn quit_notice_forms() -> Result<(), ChordletError> {
        assert_eq!(
            "QUIT 10 20 30 1".parse::<PeerMsg>()?,
            PeerMsg::Quit {
                leaver: 10,
                s1: 20,
                s2: Some(30),
                slot: Slot::First
            }
        );
        let notice: PeerMsg = "QUIT 10 20 2".parse()?;
        assert_eq!(
            notice,
            PeerMsg::Quit {
                leaver: 10,
                s1: 20,
                s2: None,
                slot: Slot::Second
            }
        );
        assert_eq!(notice.to_string(), "QUIT 10 20 2");
        assert!("QUIT 10 20".parse::<PeerMsg>().is_err());
        assert!("QUIT 10 20 30 40 1".parse::<PeerMsg>().is_err());
        Ok(())
    }

    #[test]
    fn tags_with_colons() -> Result<(), ChordletError> {
        assert_eq!(
            "SVR: 10 1".parse::<PeerMsg>()?,
            PeerMsg::Vanished {
                reporter: 10,
                slot: Slot::First
            }
        );
        assert_eq!(
            "REPLY:SVR: 30 5 2".parse::<PeerMsg>()?,
            PeerMsg::VanishedReply {
                s1: 30,
                s2: 5,
                slot: Slot::Second
            }
        );
        assert_eq!(
            PeerMsg::FileRequest {
                key: 2067,
                requester: 10,
                hops: 0
            }
            .to_string(),
            "REQUEST:FILE: 2067 10"
        );
        assert_eq!(
            "TRANSFER: 20 2067.pdf".parse::<PeerMsg>()?,
            PeerMsg::Transfer {
                sender: 20,
                fname: "2067.pdf".into()
            }
        );
        Ok(())
    }

    #[test]
    fn hop_counts() -> Result<(), ChordletError> {
        let store: PeerMsg = "STORE: 20".parse()?;
        assert_eq!(store.hops(), Some(0));
        let fwd = store.forwarded().forwarded();
        assert_eq!(fwd.to_string(), "STORE: 20 2");
        assert_eq!("STORE: 20 2".parse::<PeerMsg>()?, fwd);
        assert_eq!(
            "REQUEST:Join 15 4".parse::<PeerMsg>()?,
            PeerMsg::Join {
                joiner: 15,
                hops: 4
            }
        );
        assert_eq!(PeerMsg::SuccessorChange { s2: 3 }.hops(), None);
        Ok(())
    }

    #[test]
    fn malformed_rejected() {
        assert!("HELLO 1".parse::<PeerMsg>().is_err());
        assert!("".parse::<PeerMsg>().is_err());
        assert!("SCR".parse::<PeerMsg>().is_err());
        assert!("SCR x".parse::<PeerMsg>().is_err());
        assert!("SCR 4 5".parse::<PeerMsg>().is_err());
        assert!("REPLY:Join 5".parse::<PeerMsg>().is_err());
        assert!("STORE: 20 x".parse::<PeerMsg>().is_err());
    }
}
