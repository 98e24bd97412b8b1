//! Backup job runtime
//!
//! Runs inside the pod started by a plan's CronJob:
//!
//! 1. decode the mounted spec for the given kind
//! 2. connect the S3 destination under `<prefix>/<namespace>/<plan>`
//! 3. stream a snapshot from the source into the destination
//! 4. prune old artifacts when retention is set
//! 5. push run metrics when a Pushgateway is configured

pub mod metrics;
pub mod registry;
pub mod source;

use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use backup_destination::{Artifact, BackupDestination, StorageError};

pub use metrics::BackupMetrics;
pub use registry::{PlanJob, SourceRegistry};
pub use source::{BackupSource, ConsulSource, MongoDBSource, Snapshot};

/// Errors from a backup job run
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The spec payload could not be decoded
    #[error("plan error: {0}")]
    Plan(#[from] backup_common::Error),

    /// No decoder is registered for the kind
    #[error("unknown plan kind: {0}")]
    UnknownKind(String),

    /// The plan has no usable destination
    #[error("plan {plan} has no s3 destination")]
    MissingDestination {
        /// Plan the job runs for
        plan: String,
    },

    /// The source failed to produce a snapshot
    #[error("source error: {0}")]
    Source(String),

    /// Upload, listing or deletion failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// HTTP failure talking to a source or the Pushgateway
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Pushgateway rejected the metrics
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Metrics could not be registered or encoded
    #[error("metrics encoding error: {0}")]
    Encoding(#[from] prometheus::Error),

    /// Local IO failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for the job runtime
pub type Result<T, E = WorkerError> = std::result::Result<T, E>;

/// Which plan this job runs for, from the pod environment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobIdentity {
    /// Plan name
    pub name: String,
    /// Plan namespace
    pub namespace: String,
}

impl JobIdentity {
    /// `namespace/name`
    pub fn plan_ref(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Key prefix for one plan's artifacts: `<prefix>/<namespace>/<name>`,
/// skipping empty segments
pub fn destination_prefix(prefix: &str, identity: &JobIdentity) -> String {
    [
        prefix.trim_matches('/'),
        identity.namespace.as_str(),
        identity.name.as_str(),
    ]
    .into_iter()
    .filter(|segment| !segment.is_empty())
    .collect::<Vec<_>>()
    .join("/")
}

/// What one run produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    /// Artifact id as stored
    pub artifact: String,
    /// Stored size in bytes
    pub size: u64,
    /// Keys removed by retention
    pub pruned: Vec<String>,
}

/// Read the spec at `config`, decode it as `kind` and run it
pub async fn run(
    registry: &SourceRegistry,
    kind: &str,
    config: &Path,
    identity: &JobIdentity,
) -> Result<RunReport> {
    let payload = tokio::fs::read(config).await?;
    let job = registry.decode(kind, &payload)?;

    let s3 = job
        .common
        .destination
        .s3
        .as_ref()
        .ok_or_else(|| WorkerError::MissingDestination {
            plan: identity.plan_ref(),
        })?;
    let destination = BackupDestination::s3(s3, destination_prefix(&s3.prefix, identity)).await?;

    execute(&job, &destination, identity).await
}

/// Run a decoded job against a connected destination
#[instrument(skip_all, fields(plan = %identity.plan_ref(), source = job.source.source()))]
pub async fn execute(
    job: &PlanJob,
    destination: &BackupDestination,
    identity: &JobIdentity,
) -> Result<RunReport> {
    let started = Instant::now();

    let Snapshot { id, reader } = job.source.open().await?;
    info!(artifact = %id, "backup starting");

    // a failing source fails the stream, which aborts the upload
    let size = destination
        .store(Artifact {
            id: id.clone(),
            data: reader,
        })
        .await?;

    let pruned = if job.common.retention > 0 {
        let outcome = destination
            .ensure_retention(job.common.retention as usize)
            .await?;
        outcome.deleted
    } else {
        Vec::new()
    };

    let report = RunReport {
        artifact: id,
        size,
        pruned,
    };
    info!(
        artifact = %report.artifact,
        size = report.size,
        pruned = report.pruned.len(),
        "backup finished"
    );

    if let Some(gateway) = &job.common.pushgateway {
        let metrics = BackupMetrics {
            source: job.source.source().to_string(),
            plan: identity.name.clone(),
            finished_at: Utc::now(),
            size_bytes: report.size,
            duration: started.elapsed(),
        };
        // the artifact is stored either way
        if let Err(error) = metrics.push(&gateway.url).await {
            warn!(%error, "failed to push metrics");
        }
    }

    Ok(report)
}
