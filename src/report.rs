//! Result model and rendering
//!
//! Results come out of the scheduler in configuration order and are rendered
//! as either line-oriented text or a JSON array. A status filter can narrow
//! the rendered set; the exit-code decision always looks at the full set.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::io::{self, Write};
use std::time::Duration;

/// Final judgement of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    #[serde(rename = "PASSED")]
    Passed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
        }
    }
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// One finished probe, immutable once constructed
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub name: String,
    pub source_interface: String,
    pub source_ip_address: String,
    pub destination: String,
    pub request_type: String,
    pub expected_result: String,
    pub actual_result: String,
    /// Elapsed time from send to settlement, in seconds
    #[serde(serialize_with = "serialize_secs")]
    pub duration: Duration,
    pub status: Status,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// True when every result passed
pub fn all_passed(results: &[ProbeResult]) -> bool {
    results.iter().all(|r| r.status == Status::Passed)
}

/// Keep results whose status label appears in `filter`. An empty filter
/// keeps everything.
pub fn filter_results<'a>(results: &'a [ProbeResult], filter: &[String]) -> Vec<&'a ProbeResult> {
    if filter.is_empty() {
        return results.iter().collect();
    }
    results
        .iter()
        .filter(|r| filter.iter().any(|label| label == r.status.label()))
        .collect()
}

/// Render results as line-oriented text, one block per probe
pub fn render_text<W: Write>(out: &mut W, results: &[&ProbeResult]) -> io::Result<()> {
    for result in results {
        writeln!(out, "Running test: {}", result.name)?;
        writeln!(out, "Destination: {}", result.destination)?;
        writeln!(out, "Source IP: {}", result.source_ip_address)?;
        writeln!(out, "Source Interface: {}", result.source_interface)?;
        writeln!(out, "Request Type: {}", result.request_type)?;
        writeln!(out, "Expected Result: {}", result.expected_result)?;
        writeln!(out, "Actual Result: {}", result.actual_result)?;
        writeln!(out, "Status: {}", result.status.label())?;
        writeln!(out, "Details: {}", result.details)?;
        writeln!(out, "Timestamp: {}", result.timestamp.to_rfc3339())?;
        writeln!(out)?;
    }
    Ok(())
}

/// Render results as a pretty-printed JSON array
pub fn render_json<W: Write>(out: &mut W, results: &[&ProbeResult]) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, results)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, status: Status) -> ProbeResult {
        ProbeResult {
            name: name.to_string(),
            source_interface: "lo".to_string(),
            source_ip_address: "127.0.0.1".to_string(),
            destination: "127.0.0.1".to_string(),
            request_type: "echo".to_string(),
            expected_result: "response".to_string(),
            actual_result: "echo reply".to_string(),
            duration: Duration::from_millis(3),
            status,
            details: "received expected response echo reply from 127.0.0.1".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_all_passed() {
        let results = vec![sample("a", Status::Passed), sample("b", Status::Passed)];
        assert!(all_passed(&results));
        let results = vec![sample("a", Status::Passed), sample("b", Status::Failed)];
        assert!(!all_passed(&results));
        assert!(all_passed(&[]));
    }

    #[test]
    fn test_filter_results() {
        let results = vec![
            sample("a", Status::Passed),
            sample("b", Status::Failed),
            sample("c", Status::Passed),
        ];

        let kept = filter_results(&results, &[]);
        assert_eq!(kept.len(), 3);

        let kept = filter_results(&results, &["FAILED".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "b");

        let kept = filter_results(&results, &["PASSED".to_string(), "FAILED".to_string()]);
        assert_eq!(kept.len(), 3);

        let kept = filter_results(&results, &["SKIPPED".to_string()]);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_text_rendering() {
        let result = sample("smoke", Status::Passed);
        let mut out = Vec::new();
        render_text(&mut out, &[&result]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Running test: smoke"));
        assert!(text.contains("Status: PASSED"));
        assert!(text.contains("Actual Result: echo reply"));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_json_rendering() {
        let result = sample("smoke", Status::Passed);
        let mut out = Vec::new();
        render_json(&mut out, &[&result]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let entry = &value.as_array().unwrap()[0];
        assert_eq!(entry["name"], "smoke");
        assert_eq!(entry["status"], "PASSED");
        assert_eq!(entry["source_ip_address"], "127.0.0.1");
        assert!(entry["duration"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_empty_details_omitted_from_json() {
        let mut result = sample("quiet", Status::Passed);
        result.details = String::new();
        let mut out = Vec::new();
        render_json(&mut out, &[&result]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert!(value.as_array().unwrap()[0].get("details").is_none());
    }
}
