//! Classify command implementation.

use cloudcache_protocol::{classify, ErrorCode, RemoteError, ResultType};
use serde::Serialize;
use std::time::Duration;

/// How one error code is handled.
#[derive(Debug, Serialize)]
pub struct ClassifyResult {
    /// Numeric wire code.
    pub code: i64,
    /// User-facing description.
    pub description: String,
    /// Decision name.
    pub decision: &'static str,
    /// Retry delay in seconds, for retries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Failure reason, for recoverable and fatal outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Whether the failure heals without intervention.
    pub self_healing: bool,
}

/// Runs the classify command.
pub fn run(
    code: &str,
    retry_after: Option<u64>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let code = ErrorCode::parse(code).ok_or_else(|| format!("Unknown error code: {code}"))?;
    let result = describe(code, retry_after);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Code:         {}", result.code);
            println!("Description:  {}", result.description);
            println!("Decision:     {}", result.decision);
            if let Some(secs) = result.retry_after_secs {
                println!("Retry after:  {secs}s");
            }
            if let Some(reason) = &result.reason {
                println!("Reason:       {reason}");
            }
            println!("Self-healing: {}", result.self_healing);
        }
    }

    Ok(())
}

/// Classifies `code` with an optional retry hint.
pub fn describe(code: ErrorCode, retry_after: Option<u64>) -> ClassifyResult {
    let mut error = RemoteError::new(code);
    if let Some(secs) = retry_after {
        error = error.with_retry_after(Duration::from_secs(secs));
    }
    let outcome = classify(Some(&error));

    let (decision, retry_after_secs, reason) = match &outcome {
        ResultType::Success => ("success", None, None),
        ResultType::Retry { after, .. } => ("retry", Some(after.as_secs()), None),
        ResultType::Chunk => ("chunk", None, None),
        ResultType::Recoverable(reason) => ("recoverable", None, Some(reason.to_string())),
        ResultType::Fatal(reason) => ("fatal", None, Some(reason.to_string())),
    };

    ClassifyResult {
        code: code.code(),
        description: code.description(),
        decision,
        retry_after_secs,
        reason,
        self_healing: outcome.is_self_healing(),
    }
}
