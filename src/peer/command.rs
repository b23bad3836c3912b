//! Ring peer -- operator commands.

use std::str::FromStr;

use super::*;

/// Commands an operator issues to a running peer, one per input line.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PeerCommand {
    /// Place a file key on the ring.
    Store(FileKey),

    /// Fetch the file of a key from its owner.
    Request(FileKey),

    /// Leave the ring gracefully and exit.
    Quit,
}

impl FromStr for PeerCommand {
    type Err = ChordletError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim().to_lowercase();
        let mut segs = line.split_whitespace();

        let cmd = match (segs.next(), segs.next()) {
            (Some("store"), Some(key)) => PeerCommand::Store(key.parse()?),
            (Some("request"), Some(key)) => PeerCommand::Request(key.parse()?),
            (Some("quit"), None) => PeerCommand::Quit,
            _ => {
                return Err(ChordletError::msg(format!(
                    "unrecognized command '{}'",
                    line
                )))
            }
        };
        if segs.next().is_some() {
            return Err(ChordletError::msg(format!(
                "too many arguments in '{}'",
                line
            )));
        }
        Ok(cmd)
    }
}

// RingPeer operator commands handling
impl RingPeer {
    /// Handler of operator command. Returns true if the peer should now
    /// leave; departure notices are then queued as effects.
    pub fn handle_command(&mut self, cmd: PeerCommand) -> bool {
        match cmd {
            PeerCommand::Store(key) => {
                self.store(key, 0);
                false
            }
            PeerCommand::Request(key) => {
                self.request(key);
                false
            }
            PeerCommand::Quit => {
                self.depart();
                true
            }
        }
    }
}
