//! Backup sources: where artifact bytes come from
//!
//! A source opens one snapshot as an async byte stream, consumed by the
//! destination upload. A producer that fails surfaces as a read error on
//! that stream, before the upload can complete.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{ready, Context as TaskContext, Poll};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::io::StreamReader;
use tracing::{debug, info};

use backup_destination::ArtifactReader;

use super::{Result, WorkerError};

/// Environment variable carrying a Consul ACL token for snapshot requests
pub const CONSUL_TOKEN_ENV: &str = "CONSUL_HTTP_TOKEN";

/// Binary invoked for MongoDB dumps
pub const MONGODUMP_BIN: &str = "mongodump";

/// Timeout for establishing the Consul snapshot request
const CONSUL_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Artifact id for a snapshot taken at `at`: `<source>-<%Y%m%dT%H%M%SZ>.<ext>`
pub fn artifact_id(source: &str, extension: &str, at: DateTime<Utc>) -> String {
    format!("{source}-{}.{extension}", at.format("%Y%m%dT%H%M%SZ"))
}

/// Expand `$VAR` and `${VAR}` using `lookup`. Unset variables expand to
/// nothing; a `$` not followed by a name is kept as-is.
pub fn expand_env(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => {
                    out.push_str(&lookup(&braced[..end]).unwrap_or_default());
                    rest = &braced[end + 1..];
                }
                None => {
                    out.push_str(&rest[pos..]);
                    rest = "";
                }
            }
            continue;
        }

        let starts_name = after.starts_with(|c: char| c == '_' || c.is_ascii_alphabetic());
        if !starts_name {
            out.push('$');
            rest = after;
            continue;
        }
        let len = after
            .find(|c: char| c != '_' && !c.is_ascii_alphanumeric())
            .unwrap_or(after.len());
        out.push_str(&lookup(&after[..len]).unwrap_or_default());
        rest = &after[len..];
    }
    out.push_str(rest);
    out
}

/// An opened snapshot stream
pub struct Snapshot {
    /// Artifact id to store the stream under
    pub id: String,
    /// Snapshot bytes
    pub reader: ArtifactReader,
}

impl Snapshot {
    /// Snapshot whose stream is complete once it reaches EOF
    pub fn from_reader(id: impl Into<String>, reader: ArtifactReader) -> Self {
        Self {
            id: id.into(),
            reader,
        }
    }
}

type ExitFuture = Pin<Box<dyn Future<Output = io::Result<ExitStatus>> + Send>>;

/// Stdout of a dump process.
///
/// EOF is only reported after the process has exited successfully; a
/// non-zero exit turns into a read error, so the upload consuming this
/// stream is aborted instead of completed. Dropping the reader early kills
/// the process.
struct ProcessOutput {
    stdout: ChildStdout,
    exit: Option<ExitFuture>,
    // the process reads it, so it lives as long as the process
    _config: tempfile::NamedTempFile,
}

impl ProcessOutput {
    fn new(mut child: Child, config: tempfile::NamedTempFile) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Source(format!("{MONGODUMP_BIN} stdout unavailable")))?;
        Ok(Self {
            stdout,
            exit: Some(Box::pin(async move { child.wait().await })),
            _config: config,
        })
    }
}

impl AsyncRead for ProcessOutput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let this = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.stdout).poll_read(cx, buf))?;
        if buf.filled().len() > before {
            return Poll::Ready(Ok(()));
        }

        let Some(exit) = this.exit.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let status = ready!(exit.as_mut().poll(cx))?;
        this.exit = None;
        if status.success() {
            debug!("{MONGODUMP_BIN} finished");
            Poll::Ready(Ok(()))
        } else {
            Poll::Ready(Err(io::Error::other(format!(
                "{MONGODUMP_BIN} exited with {status}"
            ))))
        }
    }
}

/// Something that can produce a backup snapshot
#[async_trait]
pub trait BackupSource: Send + Sync {
    /// Short source name, used in artifact ids and metric labels
    fn source(&self) -> &'static str;

    /// Open a new snapshot stream
    async fn open(&self) -> Result<Snapshot>;
}

/// Consul snapshot via `GET /v1/snapshot`
pub struct ConsulSource {
    address: String,
    token: Option<String>,
}

impl ConsulSource {
    /// Source for the agent at `address`; a bare `host:port` gets `http://`
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: std::env::var(CONSUL_TOKEN_ENV).ok().filter(|t| !t.is_empty()),
        }
    }

    /// Snapshot endpoint URL
    pub fn snapshot_url(&self) -> String {
        let address = self.address.trim_end_matches('/');
        if address.contains("://") {
            format!("{address}/v1/snapshot")
        } else {
            format!("http://{address}/v1/snapshot")
        }
    }
}

#[async_trait]
impl BackupSource for ConsulSource {
    fn source(&self) -> &'static str {
        "consul"
    }

    async fn open(&self) -> Result<Snapshot> {
        let url = self.snapshot_url();
        info!(url = %url, "requesting consul snapshot");

        let client = reqwest::Client::builder()
            .connect_timeout(CONSUL_CONNECT_TIMEOUT)
            .build()?;
        let mut request = client.get(&url);
        if let Some(token) = &self.token {
            request = request.header("X-Consul-Token", token);
        }
        let response = request.send().await?.error_for_status()?;

        let stream = response
            .bytes_stream()
            .map_err(std::io::Error::other);
        let id = artifact_id(self.source(), "snap", Utc::now());
        Ok(Snapshot::from_reader(id, Box::pin(StreamReader::new(stream))))
    }
}

/// MongoDB dump via `mongodump --archive --gzip`
///
/// The connection URI goes into a private config file so it never shows up
/// in the process list.
pub struct MongoDBSource {
    uri: String,
    binary: PathBuf,
}

impl MongoDBSource {
    /// Source for `uri`, with `$VAR` references expanded from the environment
    pub fn new(uri: &str) -> Self {
        Self {
            uri: expand_env(uri, |name| std::env::var(name).ok()),
            binary: PathBuf::from(MONGODUMP_BIN),
        }
    }

    /// Use a different `mongodump` binary
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Contents of the `--config` file
    pub fn config_contents(&self) -> Result<String> {
        #[derive(serde::Serialize)]
        struct DumpConfig<'a> {
            uri: &'a str,
        }
        serde_yaml::to_string(&DumpConfig { uri: &self.uri })
            .map_err(|e| WorkerError::Source(format!("encoding mongodump config: {e}")))
    }

    fn write_config(&self) -> Result<tempfile::NamedTempFile> {
        use std::io::Write;

        // created with mode 0600
        let mut file = tempfile::Builder::new()
            .prefix("mongodump-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(self.config_contents()?.as_bytes())?;
        file.flush()?;
        Ok(file)
    }
}

#[async_trait]
impl BackupSource for MongoDBSource {
    fn source(&self) -> &'static str {
        "mongodb"
    }

    async fn open(&self) -> Result<Snapshot> {
        let config = self.write_config()?;
        debug!(config = %config.path().display(), "wrote mongodump config");

        let child = Command::new(&self.binary)
            .arg("--archive")
            .arg("--gzip")
            .arg("--config")
            .arg(config.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WorkerError::Source(format!("failed to start {}: {e}", self.binary.display()))
            })?;
        info!(pid = child.id(), "mongodump started");

        Ok(Snapshot::from_reader(
            artifact_id(self.source(), "archive.gz", Utc::now()),
            Box::pin(ProcessOutput::new(child, config)?),
        ))
    }
}
