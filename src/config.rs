//! Test configuration loading and run-level validation
//!
//! The configuration is a TOML file with a `[general]` section and a list of
//! `[[tests]]` entries. Run-level settings (output format, parallelism, ToS,
//! interface, source address) are validated here and fail the whole run;
//! per-test fields stay raw so that a bad entry becomes a FAILED result
//! instead of aborting the other tests.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::probe::interface::{self, InterfaceInfo};

pub const DEFAULT_PARALLELISM: usize = 1;
pub const DEFAULT_TOS: u8 = 0;
/// Sequence numbers are 1-based u16 values, which caps the test list
pub const MAX_TESTS: usize = u16::MAX as usize;

/// Output rendering format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(label: &str) -> Result<Self> {
        match label {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(anyhow!(
                "invalid output value: {}. It must be 'text' or 'json'",
                other
            )),
        }
    }
}

/// ToS as written in the file: a bare number or a decimal/hex string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TosValue {
    Number(i64),
    Text(String),
}

/// One test scenario, kept raw for per-probe validation
#[derive(Debug, Clone, Deserialize)]
pub struct TestEntry {
    pub name: String,
    pub dest: String,
    pub request_type: String,
    pub expected_result: String,
    pub timeout: Option<String>,
    pub payload_size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGeneral {
    output: Option<String>,
    parallelism: Option<i64>,
    tos: Option<TosValue>,
    interface_name: Option<String>,
    source_ip: Option<String>,
    result_filter: Option<Vec<String>>,
    set_df_bit: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    general: RawGeneral,
    #[serde(default)]
    tests: Vec<TestEntry>,
}

/// Validated run-level settings
#[derive(Debug, Clone)]
pub struct GeneralConfig {
    pub output: OutputFormat,
    pub parallelism: usize,
    pub tos: u8,
    pub interface: InterfaceInfo,
    pub source_ip: Ipv4Addr,
    pub result_filter: Vec<String>,
    pub set_df_bit: bool,
}

/// Fully loaded configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub general: GeneralConfig,
    pub tests: Vec<TestEntry>,
}

/// Parse a ToS value written as a number, a decimal string, or a hex string
pub fn parse_tos(value: &TosValue) -> Result<u8> {
    let shown = match value {
        TosValue::Number(n) => n.to_string(),
        TosValue::Text(text) => text.clone(),
    };
    let invalid = || {
        anyhow!(
            "invalid TOS value in general configuration: {}. It must be a number or hex string (like '0x00') between 0 and 255",
            shown
        )
    };

    let number = match value {
        TosValue::Number(n) => *n,
        TosValue::Text(text) => {
            let text = text.trim();
            let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                i64::from_str_radix(hex, 16)
            } else {
                text.parse::<i64>()
            };
            parsed.map_err(|_| invalid())?
        }
    };

    u8::try_from(number).map_err(|_| invalid())
}

fn parse_source_ip(text: &str) -> Result<Ipv4Addr> {
    text.parse()
        .map_err(|_| anyhow!("invalid source IP address: {}", text))
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("config file read error: {}", path.display()))?;
        Self::parse(&text)
    }

    /// Parse and validate configuration text
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(text).context("config parse error")?;

        if raw.tests.is_empty() {
            return Err(anyhow!("no test scenarios found"));
        }
        if raw.tests.len() > MAX_TESTS {
            return Err(anyhow!(
                "too many test scenarios: {} (at most {} per run)",
                raw.tests.len(),
                MAX_TESTS
            ));
        }

        let output = match &raw.general.output {
            Some(label) => OutputFormat::parse(label)?,
            None => OutputFormat::Text,
        };

        let parallelism = match raw.general.parallelism {
            Some(n) if n > 0 => n as usize,
            _ => DEFAULT_PARALLELISM,
        };

        let tos = match &raw.general.tos {
            Some(value) => parse_tos(value)?,
            None => DEFAULT_TOS,
        };

        let source_ip = raw
            .general
            .source_ip
            .as_deref()
            .map(parse_source_ip)
            .transpose()?;

        let (iface, source_ip) =
            interface::resolve(raw.general.interface_name.as_deref(), source_ip)?;

        Ok(Self {
            general: GeneralConfig {
                output,
                parallelism,
                tos,
                interface: iface,
                source_ip,
                result_filter: raw.general.result_filter.unwrap_or_default(),
                set_df_bit: raw.general.set_df_bit.unwrap_or(false),
            },
            tests: raw.tests,
        })
    }
}
