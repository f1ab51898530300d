//! Command-line parsing.
//!
//! The worker is launched by its parent agent as
//! `worker-agent [FLAGS] <RPC_ID> <PARENT_ID> <NODE_CONFIG>`.
//!
//! Known flags are parsed by clap. Long flags clap does not know about are
//! split out first and preserved as generic overrides, so an agent passing a
//! newer flag to an older worker does not crash it.

use crate::identity::LaunchArgs;
use clap::{Arg, CommandFactory, Parser};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Worker agent command line.
#[derive(Debug, Clone, Parser)]
#[command(name = "worker-agent")]
#[command(about = "Media cluster worker: connects to the broker and serves one purpose")]
pub struct Cli {
    #[arg(short = 'r', long = "rabbit-host", value_name = "ARG", help = "RabbitMQ Host")]
    pub rabbit_host: Option<String>,

    #[arg(short = 'g', long = "rabbit-port", value_name = "ARG", help = "RabbitMQ Port")]
    pub rabbit_port: Option<u16>,

    #[arg(
        short = 'l',
        long = "logging-config-file",
        value_name = "ARG",
        help = "Logging Config File"
    )]
    pub logging_config_file: Option<PathBuf>,

    #[arg(short = 's', long = "stunserver", value_name = "ARG", help = "Stun Server hostname")]
    pub stunserver: Option<String>,

    #[arg(short = 'p', long = "stunport", value_name = "ARG", help = "Stun Server port")]
    pub stunport: Option<u16>,

    #[arg(short = 'm', long = "minport", value_name = "ARG", help = "Minimum port")]
    pub minport: Option<u16>,

    #[arg(short = 'M', long = "maxport", value_name = "ARG", help = "Maximum port")]
    pub maxport: Option<u16>,

    /// Identity this worker serves RPC under
    pub rpc_id: String,

    /// Identity of the agent that spawned this worker
    pub parent_id: String,

    /// Node configuration as JSON: {purpose, clusterIP, webrtc: {network_interface}}
    pub node_config: String,
}

/// Ordered `(flag name, value)` overrides applied on top of the file
/// configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    entries: Vec<(String, toml::Value)>,
}

impl CliOverrides {
    #[must_use]
    pub fn from_entries(entries: Vec<(String, toml::Value)>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &toml::Value)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&toml::Value> {
        self.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, name: &str, value: toml::Value) {
        self.entries.push((name.to_string(), value));
    }
}

/// Parsed command line: launch arguments plus configuration overrides.
#[derive(Debug, Clone)]
pub struct CommandLine {
    pub cli: Cli,
    pub overrides: CliOverrides,
}

impl CommandLine {
    /// Parse an argument vector (including the program name).
    ///
    /// # Errors
    ///
    /// Returns the clap error for invalid usage. `-h/--help` is also reported
    /// as an error of kind `DisplayHelp`; `clap::Error::exit` prints it and
    /// exits with status 0.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let args: Vec<String> = args
            .into_iter()
            .map(|arg| {
                arg.into()
                    .into_string()
                    .unwrap_or_else(|raw| raw.to_string_lossy().into_owned())
            })
            .collect();

        let (kept, unknown) = split_unknown_flags(args);
        let cli = Cli::try_parse_from(kept)?;

        let mut overrides = CliOverrides::default();
        if let Some(host) = &cli.rabbit_host {
            overrides.push("rabbit-host", toml::Value::String(host.clone()));
        }
        if let Some(port) = cli.rabbit_port {
            overrides.push("rabbit-port", toml::Value::Integer(i64::from(port)));
        }
        if let Some(path) = &cli.logging_config_file {
            overrides.push(
                "logging-config-file",
                toml::Value::String(path.display().to_string()),
            );
        }
        if let Some(server) = &cli.stunserver {
            overrides.push("stunserver", toml::Value::String(server.clone()));
        }
        if let Some(port) = cli.stunport {
            overrides.push("stunport", toml::Value::Integer(i64::from(port)));
        }
        if let Some(port) = cli.minport {
            overrides.push("minport", toml::Value::Integer(i64::from(port)));
        }
        if let Some(port) = cli.maxport {
            overrides.push("maxport", toml::Value::Integer(i64::from(port)));
        }
        for (name, value) in unknown {
            overrides.push(&name, value);
        }

        Ok(Self { cli, overrides })
    }

    #[must_use]
    pub fn launch_args(&self) -> LaunchArgs {
        LaunchArgs {
            rpc_id: self.cli.rpc_id.clone(),
            parent_id: self.cli.parent_id.clone(),
            node_config: self.cli.node_config.clone(),
        }
    }

    #[must_use]
    pub fn logging_config_file(&self) -> Option<&Path> {
        self.cli.logging_config_file.as_deref()
    }
}

/// Positional launch arguments that follow every flag.
const POSITIONAL_COUNT: usize = 3;

/// Separate flags clap does not declare from the ones it does.
///
/// Unknown `--name=value` becomes a string override. Unknown `--name value`
/// takes `value` as a string only when enough positional launch arguments
/// remain after it; otherwise `--name`, like an unknown `-x`, becomes
/// `true`.
fn split_unknown_flags(args: Vec<String>) -> (Vec<String>, Vec<(String, toml::Value)>) {
    let command = Cli::command();
    let known = KnownFlags {
        longs: command.get_arguments().filter_map(Arg::get_long).collect(),
        shorts: command.get_arguments().filter_map(Arg::get_short).collect(),
    };

    let mut kept = Vec::with_capacity(args.len());
    let mut unknown = Vec::new();
    let mut rest = args.into_iter();

    if let Some(program) = rest.next() {
        kept.push(program);
    }
    let rest: Vec<String> = rest.collect();

    let mut index = 0;
    while let Some(arg) = rest.get(index) {
        index += 1;
        if arg == "--" {
            kept.extend(rest.iter().skip(index - 1).cloned());
            break;
        }
        let Some((name, value)) = known.classify(arg) else {
            kept.push(arg.clone());
            continue;
        };

        let value = match value {
            Some(value) => value,
            None if arg.starts_with("--") => match rest.get(index) {
                Some(next)
                    if !next.starts_with('-')
                        && known.positionals_in(rest.get(index + 1..).unwrap_or_default())
                            >= POSITIONAL_COUNT =>
                {
                    index += 1;
                    toml::Value::String(next.clone())
                }
                _ => toml::Value::Boolean(true),
            },
            None => toml::Value::Boolean(true),
        };
        unknown.push((name, value));
    }

    (kept, unknown)
}

struct KnownFlags<'a> {
    longs: Vec<&'a str>,
    shorts: Vec<char>,
}

impl KnownFlags<'_> {
    /// Returns the flag name and inline value if `arg` is a flag clap does
    /// not declare.
    fn classify(&self, arg: &str) -> Option<(String, Option<toml::Value>)> {
        if let Some(flag) = arg.strip_prefix("--") {
            let (name, value) = match flag.split_once('=') {
                Some((name, value)) => (name, Some(toml::Value::String(value.to_string()))),
                None => (flag, None),
            };
            if name.is_empty() || name == "help" || self.longs.contains(&name) {
                return None;
            }
            return Some((name.to_string(), value));
        }

        let flag = arg.strip_prefix('-')?;
        let first = flag.chars().next()?;
        if first == 'h' || self.shorts.contains(&first) {
            return None;
        }
        Some((flag.to_string(), None))
    }

    /// Whether `arg` is a declared flag whose value is the next argument.
    fn takes_next_value(&self, arg: &str) -> bool {
        if let Some(name) = arg.strip_prefix("--") {
            return self.longs.contains(&name);
        }
        let mut chars = arg.chars().skip(1);
        matches!(
            (arg.starts_with('-'), chars.next(), chars.next()),
            (true, Some(short), None) if self.shorts.contains(&short)
        )
    }

    /// Count the arguments in `args` that clap will read as positionals.
    fn positionals_in(&self, args: &[String]) -> usize {
        let mut count = 0;
        let mut previous_takes_value = false;
        for (position, arg) in args.iter().enumerate() {
            if arg == "--" {
                return count + args.len() - position - 1;
            }
            if !previous_takes_value && !arg.starts_with('-') {
                count += 1;
            }
            previous_takes_value = self.takes_next_value(arg);
        }
        count
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    const NODE_CONFIG: &str = r#"{"purpose":"webrtc","clusterIP":"10.0.0.5"}"#;

    fn argv(flags: &[&str]) -> Vec<String> {
        let mut args = vec!["worker-agent".to_string()];
        args.extend(flags.iter().map(ToString::to_string));
        args.extend(
            ["webrtc-1@10.0.0.5", "agent-1", NODE_CONFIG]
                .iter()
                .map(ToString::to_string),
        );
        args
    }

    #[test]
    fn test_positional_launch_arguments() {
        let command_line = CommandLine::try_parse_from(argv(&[])).unwrap();
        let launch = command_line.launch_args();

        assert_eq!(launch.rpc_id, "webrtc-1@10.0.0.5");
        assert_eq!(launch.parent_id, "agent-1");
        assert_eq!(launch.node_config, NODE_CONFIG);
        assert!(command_line.overrides.is_empty());
    }

    #[test]
    fn test_known_flags_become_named_overrides() {
        let command_line = CommandLine::try_parse_from(argv(&[
            "-r",
            "rabbit.internal",
            "--rabbit-port",
            "5673",
            "-s",
            "stun.example.com",
            "-p",
            "3478",
            "-m",
            "40000",
            "-M",
            "40100",
            "-l",
            "/etc/worker/logging.toml",
        ]))
        .unwrap();

        let overrides = &command_line.overrides;
        assert_eq!(
            overrides.get("rabbit-host"),
            Some(&toml::Value::String("rabbit.internal".to_string()))
        );
        assert_eq!(
            overrides.get("rabbit-port"),
            Some(&toml::Value::Integer(5673))
        );
        assert_eq!(
            overrides.get("stunserver"),
            Some(&toml::Value::String("stun.example.com".to_string()))
        );
        assert_eq!(overrides.get("stunport"), Some(&toml::Value::Integer(3478)));
        assert_eq!(overrides.get("minport"), Some(&toml::Value::Integer(40000)));
        assert_eq!(overrides.get("maxport"), Some(&toml::Value::Integer(40100)));
        assert_eq!(
            command_line.logging_config_file(),
            Some(Path::new("/etc/worker/logging.toml"))
        );
    }

    #[test]
    fn test_unknown_flags_are_preserved() {
        let command_line = CommandLine::try_parse_from(argv(&[
            "--ice-lite=yes",
            "--verbose",
            "-x",
            "--minport",
            "100",
        ]))
        .unwrap();

        let overrides = &command_line.overrides;
        assert_eq!(
            overrides.get("ice-lite"),
            Some(&toml::Value::String("yes".to_string()))
        );
        assert_eq!(overrides.get("verbose"), Some(&toml::Value::Boolean(true)));
        assert_eq!(overrides.get("x"), Some(&toml::Value::Boolean(true)));
        assert_eq!(overrides.get("minport"), Some(&toml::Value::Integer(100)));

        // Positionals were not consumed by the bare unknown flags
        assert_eq!(command_line.cli.rpc_id, "webrtc-1@10.0.0.5");
    }

    #[test]
    fn test_unknown_flag_takes_separate_value() {
        let command_line =
            CommandLine::try_parse_from(argv(&["--ice-lite", "yes", "-r", "rabbit.internal"]))
                .unwrap();

        assert_eq!(
            command_line.overrides.get("ice-lite"),
            Some(&toml::Value::String("yes".to_string()))
        );
        assert_eq!(
            command_line.overrides.get("rabbit-host"),
            Some(&toml::Value::String("rabbit.internal".to_string()))
        );
        assert_eq!(command_line.cli.rpc_id, "webrtc-1@10.0.0.5");
        assert_eq!(command_line.cli.parent_id, "agent-1");
        assert_eq!(command_line.cli.node_config, NODE_CONFIG);
    }

    #[test]
    fn test_unknown_flag_before_positionals_stays_boolean() {
        let command_line = CommandLine::try_parse_from(argv(&["--ice-lite"])).unwrap();

        assert_eq!(
            command_line.overrides.get("ice-lite"),
            Some(&toml::Value::Boolean(true))
        );
        assert_eq!(command_line.cli.rpc_id, "webrtc-1@10.0.0.5");
    }

    #[test]
    fn test_help_short_circuits() {
        let err = CommandLine::try_parse_from(["worker-agent", "-h"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);

        let err = CommandLine::try_parse_from(["worker-agent", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_missing_positionals_is_usage_error() {
        let err = CommandLine::try_parse_from(["worker-agent", "webrtc-1"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_invalid_port_is_usage_error() {
        let err = CommandLine::try_parse_from(argv(&["-p", "not-a-port"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_arguments_after_double_dash_are_positional() {
        let command_line = CommandLine::try_parse_from([
            "worker-agent",
            "--",
            "--odd-rpc-id",
            "agent-1",
            NODE_CONFIG,
        ])
        .unwrap();

        assert_eq!(command_line.cli.rpc_id, "--odd-rpc-id");
        assert!(command_line.overrides.is_empty());
    }
}
