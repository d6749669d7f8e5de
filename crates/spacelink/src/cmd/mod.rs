use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};
use spacelink_frame::{AsmOptions, CrcPreset, LinkEncoding, DEFAULT_FLAG_COUNT};
use spacelink_transfer::{NodeTable, DEFAULT_PACKET_SIZE};
use spacelink_transport::DEFAULT_PORT;

use crate::exit::{transfer_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod crc;
pub mod enqueue;
pub mod queue;
pub mod run;
pub mod version;

/// Node table file looked up under the root when `--nodes` is not given.
pub const NODE_TABLE_FILE: &str = "nodes.txt";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the file-transfer agent for one node.
    Run(RunArgs),
    /// Show a node's persisted transfer queues.
    Queue(QueueArgs),
    /// Copy a file into a peer's outgoing spool.
    Enqueue(EnqueueArgs),
    /// Print the CRC-16 of a file.
    Crc(CrcArgs),
    /// Show version information.
    Version(VersionArgs),
}

impl Command {
    /// Verbosity requested by the agent's leading debug digit.
    pub fn debug_level(&self) -> Option<u8> {
        match self {
            Command::Run(args) => args.targets().ok().and_then(|t| t.debug_level),
            _ => None,
        }
    }
}

/// Settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Env {
    pub root: PathBuf,
    pub nodes: Option<PathBuf>,
    pub format: OutputFormat,
}

impl Env {
    pub fn node_table_path(&self) -> PathBuf {
        self.nodes
            .clone()
            .unwrap_or_else(|| self.root.join(NODE_TABLE_FILE))
    }

    pub fn node_table(&self) -> CliResult<NodeTable> {
        let path = self.node_table_path();
        NodeTable::load(&path)
            .map_err(|err| transfer_error(&format!("node table {}", path.display()), err))
    }
}

pub fn run(command: Command, env: &Env) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, env),
        Command::Queue(args) => queue::run(args, env),
        Command::Enqueue(args) => enqueue::run(args, env),
        Command::Crc(args) => crc::run(args, env.format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LinkArg {
    /// V2 envelope, no framing.
    Raw,
    /// V2 envelope in a SLIP frame.
    #[default]
    Slip,
    /// V2 envelope behind a scrambled sync marker.
    Asm,
    /// V2 envelope in a bit-stuffed HDLC frame.
    Hdlc,
}

impl LinkArg {
    pub fn encoding(self) -> LinkEncoding {
        match self {
            LinkArg::Raw => LinkEncoding::Raw,
            LinkArg::Slip => LinkEncoding::Slip,
            LinkArg::Asm => LinkEncoding::Asm(AsmOptions {
                scramble: true,
                invert: false,
            }),
            LinkArg::Hdlc => LinkEncoding::Hdlc {
                flag_count: DEFAULT_FLAG_COUNT,
            },
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// `[DEBUG_LEVEL] NODE [PEER[:IP[:THROUGHPUT]]]`
    #[arg(value_name = "ARGS", num_args = 1..=3, required = true)]
    pub targets: Vec<String>,
    /// UDP port to listen on and send to.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Address to bind the listening socket to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,
    /// Largest file-transfer payload per packet.
    #[arg(long, default_value_t = DEFAULT_PACKET_SIZE)]
    pub packet_size: usize,
    /// Seconds between retries in each direction.
    #[arg(long, default_value_t = 60)]
    pub waittime: u64,
    /// Default to the slow-link throughput.
    #[arg(long)]
    pub slow: bool,
    /// Framing used on the wire.
    #[arg(long, value_enum, default_value_t = LinkArg::Slip)]
    pub link: LinkArg,
}

/// Parsed positional arguments of `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    pub debug_level: Option<u8>,
    pub node: String,
    pub peer: Option<PeerTarget>,
}

/// `PEER[:IP[:THROUGHPUT]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTarget {
    pub node: String,
    pub ip: Option<String>,
    pub throughput: Option<u32>,
}

impl std::str::FromStr for PeerTarget {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let node = parts.next().unwrap_or_default();
        if node.is_empty() {
            return Err(CliError::usage(format!("invalid peer {s:?}: missing node name")));
        }
        let ip = parts.next().filter(|ip| !ip.is_empty()).map(str::to_string);
        let throughput = parts
            .next()
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| CliError::usage(format!("invalid throughput {value:?}")))
            })
            .transpose()?;
        Ok(Self {
            node: node.to_string(),
            ip,
            throughput,
        })
    }
}

impl RunArgs {
    pub fn targets(&self) -> CliResult<Targets> {
        let mut words = self.targets.as_slice();
        let mut debug_level = None;
        if let [first, rest @ ..] = words {
            if !rest.is_empty() && first.len() == 1 {
                if let Some(digit) = first.chars().next().and_then(|c| c.to_digit(10)) {
                    debug_level = Some(digit as u8);
                    words = rest;
                }
            }
        }
        match words {
            [node] => Ok(Targets {
                debug_level,
                node: node.clone(),
                peer: None,
            }),
            [node, peer] => Ok(Targets {
                debug_level,
                node: node.clone(),
                peer: Some(peer.parse()?),
            }),
            _ => Err(CliError::usage(
                "expected [DEBUG_LEVEL] NODE [PEER[:IP[:THROUGHPUT]]]",
            )),
        }
    }
}

#[derive(Args, Debug)]
pub struct QueueArgs {
    /// Node whose queues to show.
    #[arg(env = "SPACELINK_NODE")]
    pub node: String,
    /// Only show incoming transactions.
    #[arg(long, conflicts_with = "outgoing")]
    pub incoming: bool,
    /// Only show outgoing transactions.
    #[arg(long)]
    pub outgoing: bool,
    /// Queue new spool files before listing (writes transfer state).
    #[arg(long)]
    pub scan: bool,
}

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Sending node.
    #[arg(env = "SPACELINK_NODE")]
    pub node: String,
    /// Destination node.
    pub peer: String,
    /// Agent the file belongs to.
    pub agent: String,
    /// File to send.
    pub file: PathBuf,
    /// Name to send the file under. Default: the file's own name.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct CrcArgs {
    /// File to checksum.
    pub file: PathBuf,
    /// CRC-16 parameter set.
    #[arg(long, default_value = "ccitt-false", conflicts_with = "all")]
    pub preset: CrcPreset,
    /// Checksum with every preset.
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(words: &[&str]) -> RunArgs {
        RunArgs {
            targets: words.iter().map(|w| w.to_string()).collect(),
            port: DEFAULT_PORT,
            bind: IpAddr::from([0, 0, 0, 0]),
            packet_size: DEFAULT_PACKET_SIZE,
            waittime: 60,
            slow: false,
            link: LinkArg::Slip,
        }
    }

    #[test]
    fn leading_digit_is_debug_level() {
        let targets = run_args(&["2", "ground", "sat:10.0.0.2:130"]).targets().unwrap();
        assert_eq!(targets.debug_level, Some(2));
        assert_eq!(targets.node, "ground");
        assert_eq!(
            targets.peer,
            Some(PeerTarget {
                node: "sat".into(),
                ip: Some("10.0.0.2".into()),
                throughput: Some(130),
            })
        );
    }

    #[test]
    fn node_only() {
        let targets = run_args(&["ground"]).targets().unwrap();
        assert_eq!(targets.debug_level, None);
        assert_eq!(targets.peer, None);

        // A lone digit is a node name, not a debug level.
        assert_eq!(run_args(&["7"]).targets().unwrap().node, "7");
    }

    #[test]
    fn peer_without_address() {
        let targets = run_args(&["ground", "sat"]).targets().unwrap();
        let peer = targets.peer.unwrap();
        assert_eq!(peer.node, "sat");
        assert_eq!(peer.ip, None);
        assert_eq!(peer.throughput, None);
    }

    #[test]
    fn rejects_bad_targets() {
        assert!(run_args(&["ground", "sat", "extra"]).targets().is_err());
        assert!(run_args(&["1", "ground", "sat:1.2.3.4:fast"]).targets().is_err());
        assert!(run_args(&["1", "ground", ":1.2.3.4"]).targets().is_err());
    }
}
