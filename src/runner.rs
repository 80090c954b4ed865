//! Bounded-concurrency probe scheduler
//!
//! Probes run concurrently under a semaphore sized to the configured
//! parallelism. Each probe writes its result into a slot matching its
//! position in the configuration, so output order never depends on
//! completion order. A probe that fails validation settles as FAILED in its
//! slot without opening a socket; nothing a single probe does can abort the
//! rest of the run.

use anyhow::{anyhow, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::{Config, GeneralConfig, TestEntry};
use crate::probe::correlate::{self, ExpectedOutcome, ProbePlan};
use crate::probe::icmp::{RequestKind, MAX_PAYLOAD_SIZE};
use crate::report::{ProbeResult, Status};

pub const DEFAULT_TIMEOUT: &str = "1s";
pub const DEFAULT_PAYLOAD_SIZE: usize = 32;
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(10);

/// Default correlation identifier: the low 16 bits of the process id
pub fn process_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

/// Parse a duration string like "250ms", "2s", "1.5s", or "1m"
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let (number, scale) = if let Some(v) = text.strip_suffix("ms") {
        (v, 0.001)
    } else if let Some(v) = text.strip_suffix('s') {
        (v, 1.0)
    } else if let Some(v) = text.strip_suffix('m') {
        (v, 60.0)
    } else {
        return Err(anyhow!("missing unit (expected ms, s, or m)"));
    };

    let value: f64 = number
        .parse()
        .map_err(|_| anyhow!("invalid number {:?}", number))?;
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("invalid number {:?}", number));
    }
    Duration::try_from_secs_f64(value * scale)
        .map_err(|_| anyhow!("duration out of range"))
}

/// Validate one test entry into a runnable plan.
///
/// `sequence` is the entry's 1-based position; together with the run's
/// identifier it forms the correlation key carried on the wire.
pub fn plan_probe(entry: &TestEntry, sequence: u16, identifier: u16) -> Result<ProbePlan> {
    let expected = ExpectedOutcome::parse(&entry.expected_result)?;

    let timeout_text = entry.timeout.as_deref().unwrap_or(DEFAULT_TIMEOUT);
    let timeout = parse_duration(timeout_text)
        .map_err(|e| anyhow!("invalid timeout {:?}: {}", timeout_text, e))?;
    if timeout < MIN_TIMEOUT || timeout > MAX_TIMEOUT {
        return Err(anyhow!(
            "invalid timeout {:?}: must be between 1ms and 10s",
            timeout_text
        ));
    }

    let kind = RequestKind::parse(&entry.request_type)?;

    let payload_size = match entry.payload_size {
        None => DEFAULT_PAYLOAD_SIZE,
        Some(size) if (0..=MAX_PAYLOAD_SIZE as i64).contains(&size) => size as usize,
        Some(size) => {
            return Err(anyhow!(
                "invalid payload_size {}: must be between 0 and 65507",
                size
            ))
        }
    };

    Ok(ProbePlan {
        name: entry.name.clone(),
        destination: entry.dest.clone(),
        kind,
        expected,
        timeout,
        payload_size,
        identifier,
        sequence,
    })
}

/// A FAILED result for an entry that never reached the network. Source
/// fields stay empty and the actual result reads "N/A".
fn failed_entry(entry: &TestEntry, details: String) -> ProbeResult {
    ProbeResult {
        name: entry.name.clone(),
        source_interface: String::new(),
        source_ip_address: String::new(),
        destination: entry.dest.clone(),
        request_type: entry.request_type.clone(),
        expected_result: entry.expected_result.clone(),
        actual_result: "N/A".to_string(),
        duration: Duration::ZERO,
        status: Status::Failed,
        details,
        timestamp: Utc::now(),
    }
}

fn run_one(entry: &TestEntry, general: &GeneralConfig, sequence: u16, identifier: u16) -> ProbeResult {
    let plan = match plan_probe(entry, sequence, identifier) {
        Ok(plan) => plan,
        Err(e) => return failed_entry(entry, e.to_string()),
    };

    let outcome = correlate::run_probe(
        &plan,
        &general.interface,
        general.source_ip,
        general.tos,
        general.set_df_bit,
    );

    ProbeResult {
        name: plan.name,
        source_interface: general.interface.name.clone(),
        source_ip_address: general.source_ip.to_string(),
        destination: plan.destination,
        request_type: plan.kind.label().to_string(),
        expected_result: plan.expected.label().to_string(),
        actual_result: outcome.actual,
        duration: outcome.duration,
        status: if outcome.passed {
            Status::Passed
        } else {
            Status::Failed
        },
        details: outcome.details,
        timestamp: Utc::now(),
    }
}

/// Runs every configured test and collects results in configuration order
pub struct Runner {
    config: Config,
    identifier: u16,
}

impl Runner {
    pub fn new(config: Config) -> Self {
        Self::with_identifier(config, process_identifier())
    }

    /// Use an explicit correlation identifier instead of the process id
    pub fn with_identifier(config: Config, identifier: u16) -> Self {
        Self { config, identifier }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run all tests with bounded concurrency. The returned vector has one
    /// result per configured test, in configuration order.
    pub async fn run(&self) -> Vec<ProbeResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.general.parallelism));
        let results: Arc<Mutex<Vec<Option<ProbeResult>>>> =
            Arc::new(Mutex::new(vec![None; self.config.tests.len()]));

        let mut handles = Vec::with_capacity(self.config.tests.len());
        for (i, entry) in self.config.tests.iter().enumerate() {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                // the semaphore is never closed
                Err(_) => break,
            };
            let entry = entry.clone();
            let general = self.config.general.clone();
            let results = Arc::clone(&results);
            let identifier = self.identifier;
            // the config loader caps the test list at u16::MAX entries
            let sequence = (i + 1) as u16;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = tokio::task::spawn_blocking({
                    let entry = entry.clone();
                    move || run_one(&entry, &general, sequence, identifier)
                })
                .await;
                let result = match outcome {
                    Ok(result) => result,
                    Err(e) => failed_entry(&entry, format!("probe task failed: {}", e)),
                };
                results.lock()[i] = Some(result);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        let mut slots = results.lock();
        slots
            .iter_mut()
            .zip(self.config.tests.iter())
            .map(|(slot, entry)| {
                slot.take()
                    .unwrap_or_else(|| failed_entry(entry, "probe task did not complete".to_string()))
            })
            .collect()
    }
}
