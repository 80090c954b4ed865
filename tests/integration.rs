//! Integration tests for the config→schedule→report pipeline
//!
//! These tests drive the scheduler with entries that settle during
//! validation, so they need neither raw-socket privileges nor network
//! access.

use netcheck::config::{Config, OutputFormat};
use netcheck::report::{self, Status};
use netcheck::runner::Runner;

fn pipeline_config(parallelism: usize) -> Config {
    let text = format!(
        r#"
[general]
source_ip = "127.0.0.1"
parallelism = {parallelism}

[[tests]]
name = "bad-request-type"
dest = "127.0.0.1"
request_type = "syn"
expected_result = "response"

[[tests]]
name = "bad-expected-result"
dest = "127.0.0.1"
request_type = "echo"
expected_result = "maybe"

[[tests]]
name = "bad-timeout"
dest = "127.0.0.1"
request_type = "echo"
expected_result = "response"
timeout = "45s"

[[tests]]
name = "bad-payload"
dest = "127.0.0.1"
request_type = "echo"
expected_result = "response"
payload_size = 70000

[[tests]]
name = "bad-timeout-syntax"
dest = "127.0.0.1"
request_type = "timestamp"
expected_result = "response"
timeout = "soon"
"#
    );
    Config::parse(&text).expect("parse config")
}

#[tokio::test]
async fn test_validation_failures_settle_without_sockets() {
    let config = pipeline_config(1);
    let results = Runner::with_identifier(config, 0x7777).run().await;

    assert_eq!(results.len(), 5);
    for result in &results {
        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.actual_result, "N/A");
        assert!(result.source_interface.is_empty());
    }

    assert!(results[0].details.contains("unsupported request type"));
    assert!(results[1].details.contains("invalid expected_result"));
    assert!(results[2].details.contains("must be between 1ms and 10s"));
    assert!(results[3].details.contains("must be between 0 and 65507"));
    assert!(results[4].details.contains("invalid timeout"));
}

#[tokio::test]
async fn test_results_keep_configuration_order() {
    // parallelism 2: completion order may vary, output order must not
    let config = pipeline_config(2);
    let results = Runner::with_identifier(config, 1).run().await;

    let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        [
            "bad-request-type",
            "bad-expected-result",
            "bad-timeout",
            "bad-payload",
            "bad-timeout-syntax"
        ]
    );
}

#[tokio::test]
async fn test_exit_decision_ignores_filter() {
    let mut config = pipeline_config(1);
    config.general.result_filter = vec!["PASSED".to_string()];
    let filter = config.general.result_filter.clone();
    let results = Runner::with_identifier(config, 1).run().await;

    // nothing passed, so the filtered view is empty
    let rendered = report::filter_results(&results, &filter);
    assert!(rendered.is_empty());

    // while the run as a whole still counts as failed
    assert!(!report::all_passed(&results));
}

#[tokio::test]
async fn test_failed_results_render_in_both_formats() {
    let config = pipeline_config(1);
    let results = Runner::with_identifier(config, 1).run().await;
    let rendered = report::filter_results(&results, &[]);

    let mut text = Vec::new();
    report::render_text(&mut text, &rendered).unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.contains("Running test: bad-request-type"));
    assert!(text.contains("Status: FAILED"));

    let mut json = Vec::new();
    report::render_json(&mut json, &rendered).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 5);
    assert_eq!(value[0]["actual_result"], "N/A");
    assert_eq!(value[0]["status"], "FAILED");
}

#[test]
fn test_config_round_trip_defaults() {
    let config = pipeline_config(1);
    assert_eq!(config.general.output, OutputFormat::Text);
    assert_eq!(config.general.tos, 0);
    assert!(!config.general.set_df_bit);
    assert_eq!(config.tests.len(), 5);
}
