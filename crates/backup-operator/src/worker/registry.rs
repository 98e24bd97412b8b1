//! Kind name to payload decoder, for the job runtime
//!
//! The CronJob passes the plan kind on the command line and the serialized
//! spec through the mounted Secret; the registry turns that pair into a
//! [`PlanJob`].

use backup_common::crd::{BackupPlanSpec, ConsulBackupPlan, MongoDBBackupPlan};
use backup_common::BackupPlan;
use backup_controller::resources::deserialize_spec;

use super::source::{BackupSource, ConsulSource, MongoDBSource};
use super::{Result, WorkerError};

/// A decoded plan ready to run
pub struct PlanJob {
    /// Fields shared by every kind
    pub common: BackupPlanSpec,
    /// Where the artifact comes from
    pub source: Box<dyn BackupSource>,
}

impl std::fmt::Debug for PlanJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanJob")
            .field("source", &self.source.source())
            .field("schedule", &self.common.schedule)
            .finish_non_exhaustive()
    }
}

/// Decodes a serialized spec into a [`PlanJob`]
pub type Decoder = fn(&[u8]) -> Result<PlanJob>;

/// Ordered mapping of kind name to [`Decoder`]
#[derive(Clone, Debug, Default)]
pub struct SourceRegistry {
    decoders: Vec<(&'static str, Decoder)>,
}

impl SourceRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoders for every plan kind shipped with the operator
    pub fn builtin() -> Self {
        Self::new()
            .register(ConsulBackupPlan::KIND, decode_consul)
            .register(MongoDBBackupPlan::KIND, decode_mongodb)
    }

    /// Add a decoder for `kind`, replacing an earlier one
    pub fn register(mut self, kind: &'static str, decoder: Decoder) -> Self {
        self.decoders.retain(|(k, _)| *k != kind);
        self.decoders.push((kind, decoder));
        self
    }

    /// Registered kind names
    pub fn kinds(&self) -> Vec<&'static str> {
        self.decoders.iter().map(|(k, _)| *k).collect()
    }

    /// Decode `payload` as a spec of `kind`
    pub fn decode(&self, kind: &str, payload: &[u8]) -> Result<PlanJob> {
        let (_, decoder) = self
            .decoders
            .iter()
            .find(|(k, _)| *k == kind)
            .ok_or_else(|| WorkerError::UnknownKind(kind.to_string()))?;
        decoder(payload)
    }
}

fn decode_consul(payload: &[u8]) -> Result<PlanJob> {
    let spec = deserialize_spec::<ConsulBackupPlan>(payload)?;
    Ok(PlanJob {
        source: Box::new(ConsulSource::new(spec.address)),
        common: spec.common,
    })
}

fn decode_mongodb(payload: &[u8]) -> Result<PlanJob> {
    let spec = deserialize_spec::<MongoDBBackupPlan>(payload)?;
    Ok(PlanJob {
        source: Box::new(MongoDBSource::new(&spec.uri)),
        common: spec.common,
    })
}
