use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::{Config, OutputFormat};

/// Config-driven ICMP path validation
#[derive(Parser, Debug)]
#[command(name = "netcheck", version, about)]
pub struct Args {
    /// Path to the test configuration file
    #[arg(short, long, default_value = "netcheck.toml")]
    pub config: PathBuf,

    /// Override the configured output format (text or json)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Only render results with this status (repeatable; PASSED or FAILED)
    #[arg(long = "filter", value_name = "STATUS")]
    pub filter: Vec<String>,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(label) = &self.output {
            config.general.output = OutputFormat::parse(label)?;
        }
        if !self.filter.is_empty() {
            config.general.result_filter = self.filter.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        let args = Args::try_parse_from(["netcheck"]).unwrap();
        assert_eq!(args.config, PathBuf::from("netcheck.toml"));
        assert!(args.output.is_none());
        assert!(args.filter.is_empty());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "netcheck",
            "--config",
            "tests.toml",
            "--output",
            "json",
            "--filter",
            "FAILED",
            "--filter",
            "PASSED",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("tests.toml"));
        assert_eq!(args.output.as_deref(), Some("json"));
        assert_eq!(args.filter, vec!["FAILED".to_string(), "PASSED".to_string()]);
    }
}
