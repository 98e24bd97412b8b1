//! Backup operator - scheduled Consul and MongoDB backups to S3

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use kube::Client;

use backup_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use backup_controller::resources::{config_path, PLAN_NAMESPACE_ENV, PLAN_NAME_ENV};
use backup_controller::{Context, JobTemplateConfig, PlanRegistry};
use backup_operator::worker::{self, JobIdentity, SourceRegistry};
use backup_operator::{ensure_crds_installed, render_crds};

/// Backup operator - converges backup plans into CronJobs that snapshot
/// Consul and MongoDB into S3
#[derive(Parser, Debug)]
#[command(name = "backup-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Log output format (json or text)
    #[arg(long, env = "BACKUP_LOG_FORMAT", default_value = "json", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the plan controllers (default mode)
    Controller(ControllerArgs),
    /// Run one backup; this is what the generated CronJobs execute
    Run(RunArgs),
    /// Print CRD manifests
    Crd,
}

#[derive(Args, Debug, Default)]
struct ControllerArgs {
    /// Image the generated backup jobs run
    #[arg(long, env = "BACKUP_WORKER_IMAGE")]
    worker_image: Option<String>,

    /// Pull policy for the backup job image
    #[arg(long, env = "BACKUP_IMAGE_PULL_POLICY")]
    image_pull_policy: Option<String>,

    /// Service account for the backup job pods
    #[arg(long, env = "BACKUP_SERVICE_ACCOUNT")]
    service_account: Option<String>,

    /// Do not install or update CRDs on startup
    #[arg(long)]
    skip_crd_install: bool,
}

impl ControllerArgs {
    fn job_template(&self) -> JobTemplateConfig {
        let defaults = JobTemplateConfig::default();
        JobTemplateConfig {
            image: self.worker_image.clone().unwrap_or(defaults.image),
            image_pull_policy: self.image_pull_policy.clone(),
            service_account: self.service_account.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Plan kind, e.g. MongoDBBackupPlan
    #[arg(long)]
    kind: String,

    /// Serialized plan spec
    #[arg(long, default_value_t = config_path())]
    config: String,

    /// Name of the plan being backed up
    #[arg(long, env = PLAN_NAME_ENV)]
    plan_name: String,

    /// Namespace of the plan being backed up
    #[arg(long, env = PLAN_NAMESPACE_ENV)]
    plan_namespace: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube and reqwest both link rustls; pin the provider before either builds a client
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    if cli.crd {
        print!("{}", render_crds(&PlanRegistry::builtin())?);
        return Ok(());
    }

    match cli.command {
        Some(Commands::Crd) => {
            print!("{}", render_crds(&PlanRegistry::builtin())?);
            Ok(())
        }
        Some(Commands::Run(args)) => run_backup(args).await,
        Some(Commands::Controller(args)) => run_controller(args).await,
        None => run_controller(ControllerArgs::default()).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;
    let registry = PlanRegistry::builtin();

    if !args.skip_crd_install {
        ensure_crds_installed(&client, &registry).await?;
    }

    let job = args.job_template();
    tracing::info!(image = %job.image, kinds = ?registry.kinds(), "Starting backup plan controllers");
    let ctx = Arc::new(Context::new(client.clone(), job));

    futures::future::join_all(registry.build_controllers(client, ctx)).await;
    tracing::info!("Controllers stopped");
    Ok(())
}

async fn run_backup(args: RunArgs) -> anyhow::Result<()> {
    let identity = JobIdentity {
        name: args.plan_name,
        namespace: args.plan_namespace,
    };
    let config = PathBuf::from(args.config);

    let report = worker::run(&SourceRegistry::builtin(), &args.kind, &config, &identity)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, plan = %identity.plan_ref(), "backup failed");
            anyhow::anyhow!("backup of {} failed: {}", identity.plan_ref(), e)
        })?;

    tracing::info!(
        plan = %identity.plan_ref(),
        artifact = %report.artifact,
        size = report.size,
        "backup complete"
    );
    Ok(())
}
