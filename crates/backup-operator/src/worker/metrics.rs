//! Run metrics pushed to a Prometheus Pushgateway
//!
//! A backup job lives for minutes at most, so instead of being scraped it
//! pushes one group per plan: job `backup`, labels `app=<source>` and
//! `plan=<name>`. Each push replaces the previous values of that group.

use std::time::Duration;

use chrono::{DateTime, Utc};
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};
use tracing::{debug, info};

use super::{Result, WorkerError};

/// Pushgateway job name for every backup run
pub const METRICS_JOB: &str = "backup";

const PUSH_TIMEOUT: Duration = Duration::from_secs(15);

/// Outcome of one successful backup run
#[derive(Clone, Debug, PartialEq)]
pub struct BackupMetrics {
    /// Source name, e.g. `mongodb`
    pub source: String,
    /// Plan name
    pub plan: String,
    /// Completion time of the run
    pub finished_at: DateTime<Utc>,
    /// Stored artifact size in bytes
    pub size_bytes: u64,
    /// Wall time of the run
    pub duration: Duration,
}

impl BackupMetrics {
    /// Registry holding the three run gauges
    pub fn registry(&self) -> Result<Registry> {
        let gauges = [
            (
                "backup_last_success_timestamp_seconds",
                "Unix time of the last successful backup",
                self.finished_at.timestamp() as f64,
            ),
            (
                "backup_last_size_bytes",
                "Size of the last stored backup artifact",
                self.size_bytes as f64,
            ),
            (
                "backup_duration_seconds",
                "Duration of the last backup run",
                self.duration.as_secs_f64(),
            ),
        ];

        let registry = Registry::new();
        for (name, help, value) in gauges {
            let gauge = Gauge::with_opts(Opts::new(name, help))?;
            gauge.set(value);
            registry.register(Box::new(gauge))?;
        }
        Ok(registry)
    }

    /// Prometheus text exposition of [`Self::registry`]
    pub fn render(&self) -> Result<String> {
        Ok(TextEncoder.encode_to_string(&self.registry()?.gather())?)
    }

    /// Grouping URL under `base`
    pub fn push_url(&self, base: &str) -> String {
        format!(
            "{}/metrics/job/{METRICS_JOB}/app/{}/plan/{}",
            base.trim_end_matches('/'),
            path_segment(&self.source),
            path_segment(&self.plan)
        )
    }

    /// Push to the gateway at `base`, replacing the group
    pub async fn push(&self, base: &str) -> Result<()> {
        let url = self.push_url(base);
        let client = reqwest::Client::builder().timeout(PUSH_TIMEOUT).build()?;
        let response = client
            .put(&url)
            .header("Content-Type", TextEncoder.format_type())
            .body(self.render()?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|error| {
                debug!(%error, "failed to read pushgateway response body");
                String::new()
            });
            return Err(WorkerError::Metrics(format!(
                "pushgateway returned {status}: {body}"
            )));
        }
        info!(url = %url, "metrics pushed");
        Ok(())
    }
}

/// Escape a label value for use as a URL path segment
fn path_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
