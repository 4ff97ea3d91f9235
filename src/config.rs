use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::Deserialize;
use std::path::Path;

use crate::promql::Guardrails;

pub const DEFAULT_PROMETHEUS_URL: &str = "http://localhost:9090";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";

/// Runtime configuration shared by the `mcp` and `serve` subcommands.
///
/// Settings are merged in precedence order: command line flag, config file,
/// `PROMETHEUS_URL` environment variable, built-in default.
#[derive(Debug, Clone)]
pub struct Config {
    pub prometheus_url: String,
    /// Dashboard library service endpoint. Dashboard operations are
    /// unavailable when unset.
    pub dashboard_url: Option<String>,
    pub listen: String,
    /// `None` disables query safety checks entirely.
    pub guardrails: Option<Guardrails>,
    pub verbose: u8,
}

/// On-disk configuration, all fields optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    prometheus_url: Option<String>,
    dashboard_url: Option<String>,
    listen: Option<String>,
    guardrails: Option<String>,
}

impl FileConfig {
    fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }
}

impl TryFrom<&ArgMatches> for Config {
    type Error = String;

    fn try_from(args: &ArgMatches) -> Result<Self, String> {
        let file = match args.get_one::<String>("CONFIG") {
            Some(path) => FileConfig::load(Path::new(path)).map_err(|e| format!("{e:#}"))?,
            None => FileConfig::default(),
        };

        let prometheus_url = args
            .get_one::<String>("PROMETHEUS_URL")
            .cloned()
            .or(file.prometheus_url)
            .or_else(|| std::env::var("PROMETHEUS_URL").ok())
            .unwrap_or_else(|| DEFAULT_PROMETHEUS_URL.to_string());

        let dashboard_url = args
            .get_one::<String>("DASHBOARD_URL")
            .cloned()
            .or(file.dashboard_url);

        // LISTEN only exists on the serve subcommand
        let listen = args
            .try_get_one::<String>("LISTEN")
            .ok()
            .flatten()
            .cloned()
            .or(file.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());

        let guardrails = args
            .get_one::<String>("GUARDRAILS")
            .cloned()
            .or(file.guardrails)
            .unwrap_or_else(|| "all".to_string());
        let guardrails = Guardrails::parse(&guardrails).map_err(|e| e.to_string())?;

        let verbose = *args.get_one::<u8>("VERBOSE").unwrap_or(&0);

        Ok(Config {
            prometheus_url,
            dashboard_url,
            listen,
            guardrails,
            verbose,
        })
    }
}

/// Arguments common to every subcommand.
pub fn common_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("CONFIG")
                .long("config")
                .short('c')
                .help("Path to a TOML config file")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("PROMETHEUS_URL")
                .long("prometheus-url")
                .help("Prometheus-compatible query endpoint")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("DASHBOARD_URL")
                .long("dashboard-url")
                .help("Dashboard library service endpoint")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("GUARDRAILS")
                .long("guardrails")
                .help(
                    "Query guardrails: 'all' (default), 'none', or a comma-separated list of \
                     disallow-explicit-name-label, require-label-matcher, disallow-blanket-regex",
                )
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("VERBOSE")
                .long("verbose")
                .short('v')
                .help("Increase verbosity")
                .action(ArgAction::Count),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(args: &[&str]) -> ArgMatches {
        common_args(Command::new("test"))
            .try_get_matches_from(args)
            .expect("arguments parse")
    }

    #[test]
    fn defaults_apply() {
        let config = Config::try_from(&matches(&["test"])).expect("config builds");
        assert_eq!(config.prometheus_url, DEFAULT_PROMETHEUS_URL);
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert!(config.dashboard_url.is_none());
        assert!(config.guardrails.is_some());
        assert_eq!(config.verbose, 0);
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_from(&matches(&[
            "test",
            "--prometheus-url",
            "http://prom:9090",
            "--guardrails",
            "none",
            "-vv",
        ]))
        .expect("config builds");
        assert_eq!(config.prometheus_url, "http://prom:9090");
        assert!(config.guardrails.is_none());
        assert_eq!(config.verbose, 2);
    }

    #[test]
    fn unknown_guardrail_is_rejected() {
        let result = Config::try_from(&matches(&["test", "--guardrails", "no-such-rule"]));
        assert!(result.is_err());
    }
}
