mod cmd;
mod counters;
mod exit;
mod logging;
mod output;
mod request;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::{Command, Env};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "spacelink", version, about = "Spacecraft file-transfer agent")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). Default: info, or the agent's debug digit.
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<LogLevel>,

    /// Directory holding per-node spools and transfer state.
    #[arg(long, value_name = "DIR", env = "SPACELINK_ROOT", default_value = ".", global = true)]
    root: PathBuf,

    /// Node table (`<id> <name>` per line). Default: `<root>/nodes.txt`.
    #[arg(long, value_name = "FILE", env = "SPACELINK_NODES", global = true)]
    nodes: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    let level = LogLevel::resolve(cli.log_level, cli.command.debug_level());
    init_logging(cli.log_format, level);

    let env = Env {
        root: cli.root,
        nodes: cli.nodes,
        format: cli.format.unwrap_or_else(OutputFormat::default_for_stdout),
    };
    let result = cmd::run(cli.command, &env);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_debug_level_and_peer() {
        let cli = Cli::try_parse_from([
            "spacelink",
            "--root",
            "/var/spacelink",
            "run",
            "1",
            "ground",
            "sat:10.0.0.2:130",
            "--port",
            "10021",
        ])
        .expect("run args should parse");

        assert_eq!(cli.command.debug_level(), Some(1));
        assert_eq!(cli.root, PathBuf::from("/var/spacelink"));
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.port, 10021);
                assert_eq!(args.targets().unwrap().node, "ground");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn explicit_log_level_beats_debug_digit() {
        let level = |args: &[&str]| {
            let cli = Cli::try_parse_from(args).expect("args should parse");
            LogLevel::resolve(cli.log_level, cli.command.debug_level())
        };
        assert_eq!(level(&["spacelink", "--log-level", "debug", "run", "0", "ground"]), LogLevel::Debug);
        assert_eq!(level(&["spacelink", "run", "2", "ground"]), LogLevel::Trace);
        assert_eq!(level(&["spacelink", "run", "ground"]), LogLevel::Info);
        assert_eq!(level(&["spacelink", "run", "ground", "--log-level", "warn"]), LogLevel::Warn);
    }

    #[test]
    fn run_rejects_too_many_targets() {
        assert!(Cli::try_parse_from(["spacelink", "run", "1", "ground", "sat", "moon"]).is_err());
        assert!(Cli::try_parse_from(["spacelink", "run"]).is_err());
    }

    #[test]
    fn queue_direction_flags_conflict() {
        let err = Cli::try_parse_from(["spacelink", "queue", "ground", "--incoming", "--outgoing"])
            .expect_err("conflicting args should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_crc_preset() {
        let cli = Cli::try_parse_from(["spacelink", "crc", "/tmp/x", "--preset", "kermit"])
            .expect("crc args should parse");
        match cli.command {
            Command::Crc(args) => assert_eq!(args.preset, spacelink_frame::CrcPreset::Kermit),
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["spacelink", "crc", "/tmp/x", "--preset", "crc99"]).is_err());
    }

    #[test]
    fn parses_enqueue() {
        let cli = Cli::try_parse_from([
            "spacelink", "enqueue", "ground", "sat", "camera", "/tmp/img.jpg", "--name", "img1.jpg",
        ])
        .expect("enqueue args should parse");
        assert!(matches!(cli.command, Command::Enqueue(_)));
    }
}
