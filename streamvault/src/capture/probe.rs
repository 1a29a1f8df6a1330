//! Stream liveness probe.
//!
//! Runs the capture tool in its JSON probe mode and inspects the result.
//! The tool prints a JSON document describing available streams, or one with
//! an `error` key when nothing is live; some plugins interleave
//! `[plugin.*]` warning lines that must be stripped before parsing.

use tokio::process::Command;
use tracing::debug;

use crate::config::SourceConfig;

/// Outcome of one liveness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// The source has at least one playable stream.
    Live,
    /// The tool answered cleanly that nothing is live.
    NotLive { reason: Option<String> },
    /// The probe itself failed (spawn error, empty or unparseable output).
    /// Fails safe: treated as not-live, never as a capture crash.
    Failed { reason: String },
}

impl ProbeVerdict {
    pub fn is_live(&self) -> bool {
        matches!(self, ProbeVerdict::Live)
    }
}

/// Synchronous liveness check against one source URL.
pub struct LivenessProbe {
    binary: String,
    url: String,
    extra_args: Vec<String>,
}

impl LivenessProbe {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            url: config.url.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    /// Run `binary <url> --json <extra-args>` and evaluate its output.
    ///
    /// Blocks its caller for as long as the probe process runs; bounded only
    /// by the tool's own timeout behavior.
    pub async fn check(&self) -> ProbeVerdict {
        let output = Command::new(&self.binary)
            .arg(&self.url)
            .arg("--json")
            .args(&self.extra_args)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return ProbeVerdict::Failed {
                    reason: format!("failed to run {}: {e}", self.binary),
                };
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        evaluate(&stdout, &stderr)
    }
}

/// Evaluate captured probe output.
pub(crate) fn evaluate(stdout: &str, stderr: &str) -> ProbeVerdict {
    if !stderr.trim().is_empty() {
        let first = stderr.lines().next().unwrap_or_default();
        return ProbeVerdict::Failed {
            reason: format!("probe wrote to stderr: {first}"),
        };
    }

    // Plugins may prefix warning lines before the JSON document.
    let filtered: Vec<&str> = stdout
        .lines()
        .filter(|line| !line.contains("[plugin.") && !line.trim().is_empty())
        .collect();

    if filtered.is_empty() {
        return ProbeVerdict::Failed {
            reason: "no usable probe output".to_string(),
        };
    }

    let document: serde_json::Value = match serde_json::from_str(&filtered.join("\n")) {
        Ok(document) => document,
        Err(e) => {
            return ProbeVerdict::Failed {
                reason: format!("unparseable probe output: {e}"),
            };
        }
    };

    match document.get("error") {
        Some(error) => {
            debug!("Probe said: {error}");
            ProbeVerdict::NotLive {
                reason: error.as_str().map(str::to_string),
            }
        }
        None => ProbeVerdict::Live,
    }
}
