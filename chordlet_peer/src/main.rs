//! Chordlet ring peer executable.

use std::io::{self, BufRead};
use std::process::ExitCode;
use std::thread;

use chordlet::{
    logger_init, pf_error, pf_warn, ChordletError, PeerCommand, PeerConfig,
    PeerId, PeerNode, StartMode, ME,
};
use clap::{Parser, Subcommand};
use log::{self, LevelFilter};
use tokio::runtime::Builder;
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;

/// How this peer enters the ring.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Mode {
    /// Found a ring with both successors known up front.
    Init {
        /// My peer ID.
        id: PeerId,

        /// First successor ID.
        succ1: PeerId,

        /// Second successor ID.
        succ2: PeerId,

        /// Seconds between successor probing rounds.
        ping_interval: u64,
    },

    /// Join an existing ring through a known member.
    Join {
        /// My peer ID.
        id: PeerId,

        /// ID of any current ring member.
        known: PeerId,

        /// Seconds between successor probing rounds.
        ping_interval: u64,
    },
}

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    mode: Mode,

    /// Peer configuration parameters TOML string.
    /// Use '+' in place of newline.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 4)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok((id, mode, interval,
    /// config))` on success or `Err(ChordletError)` on any error.
    fn sanitize(
        &self,
    ) -> Result<(PeerId, StartMode, Duration, PeerConfig), ChordletError> {
        let config_str = self.config.replace('+', "\n");
        let config = PeerConfig::from_toml(if config_str.trim().is_empty() {
            None
        } else {
            Some(config_str.as_str())
        })?;

        // `entry` must differ from me; in a two-peer ring succ2 is me
        let (id, mode, ping_interval, entry, others) = match self.mode {
            Mode::Init {
                id,
                succ1,
                succ2,
                ping_interval,
            } => (
                id,
                StartMode::Init {
                    s1: succ1,
                    s2: succ2,
                },
                ping_interval,
                succ1,
                vec![succ1, succ2],
            ),
            Mode::Join {
                id,
                known,
                ping_interval,
            } => (
                id,
                StartMode::Join { known },
                ping_interval,
                known,
                vec![known],
            ),
        };

        if id >= config.ring_size {
            Err(ChordletError::msg(format!(
                "invalid peer id {} for ring size {}",
                id, config.ring_size
            )))
        } else if entry == id {
            Err(ChordletError::msg(format!("neighbor id {} is my own", id)))
        } else if let Some(bad) =
            others.iter().find(|&&o| o >= config.ring_size)
        {
            Err(ChordletError::msg(format!("invalid neighbor id {}", bad)))
        } else if ping_interval == 0 {
            Err(ChordletError::msg("invalid ping_interval 0"))
        } else if self.threads < 2 {
            Err(ChordletError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )))
        } else {
            Ok((id, mode, Duration::from_secs(ping_interval), config))
        }
    }
}

/// Operator input reader thread function. Forwards each valid command line
/// to the peer until `quit` or end of input.
fn operator_input_thread(tx_cmd: mpsc::UnboundedSender<PeerCommand>) {
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                pf_error!("error reading operator input: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<PeerCommand>() {
            Ok(cmd) => {
                if tx_cmd.send(cmd).is_err() || cmd == PeerCommand::Quit {
                    break;
                }
            }
            Err(e) => {
                pf_warn!("{}", e);
                println!(
                    "Invalid input, use 'store <key>', 'request <key>' \
                     or 'quit'. Try again."
                );
            }
        }
    }
}

/// Actual main function of Chordlet ring peer.
fn peer_main() -> Result<(), ChordletError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let (id, mode, ping_interval, config) = args.sanitize()?;
    let _ = ME.set(format!("p{}", id));

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!("error sending to term channel: {}", e);
        }
    })?;

    // operator commands come from a plain blocking thread
    let (tx_cmd, rx_cmd) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("operator-input".into())
        .spawn(move || operator_input_thread(tx_cmd))?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name(format!("tokio-worker-p{}", id))
            .build()?;

        // enter tokio runtime, setup the peer node, and start the main
        // event loop logic
        runtime.block_on(async move {
            let mut node =
                PeerNode::new_and_setup(id, mode, ping_interval, config)
                    .await?;

            node.run(rx_cmd, rx_term).await?;

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), ChordletError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of Chordlet ring peer.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = peer_main() {
        pf_error!("peer_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
