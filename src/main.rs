use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use kube::api::Api;
use mesh_failover::controller::config::{DEFAULT_API_PORT, DEFAULT_LOCAL_CLUSTER};
use mesh_failover::controller::leader::{self, LeaderElector};
use mesh_failover::controller::{self, ControllerConfig};
use mesh_failover::crd::{FailoverService, StatusState};
use mesh_failover::failover::labels::{DEFAULT_OWNER_LABEL_KEY, DEFAULT_OWNER_LABEL_VALUE};
use mesh_failover::failover::{OwnershipLabels, DEFAULT_VIRTUAL_IP_CIDR};
use mesh_failover::{telemetry, Error};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
    /// Show FailoverService summary for the cluster
    Info(InfoArgs),
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Operator namespace, holding cluster registrations and the leader lease
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Name the cluster running the operator is registered under
    #[arg(long, env = "LOCAL_CLUSTER_NAME", default_value = DEFAULT_LOCAL_CLUSTER)]
    local_cluster: String,

    /// Label key marking generated artifacts
    #[arg(long, env = "OWNER_LABEL_KEY", default_value = DEFAULT_OWNER_LABEL_KEY)]
    owner_label_key: String,

    /// Label value marking generated artifacts
    #[arg(long, env = "OWNER_LABEL_VALUE", default_value = DEFAULT_OWNER_LABEL_VALUE)]
    owner_label_value: String,

    /// Seconds between full resyncs after a successful pass
    #[arg(long, env = "RESYNC_SECONDS", default_value_t = controller::config::DEFAULT_RESYNC_SECONDS)]
    resync_seconds: u64,

    /// IPv4 block virtual addresses for failover hostnames are drawn from
    #[arg(long, env = "VIRTUAL_IP_CIDR", default_value = DEFAULT_VIRTUAL_IP_CIDR)]
    virtual_ip_cidr: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Port of the REST API and metrics server
    #[arg(long, env = "API_PORT", default_value_t = DEFAULT_API_PORT)]
    api_port: u16,
}

impl RunArgs {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            namespace: self.namespace.clone(),
            local_cluster: self.local_cluster.clone(),
            labels: OwnershipLabels::new(&self.owner_label_key, &self.owner_label_value),
            resync_interval: Duration::from_secs(self.resync_seconds),
            virtual_ip_cidr: self.virtual_ip_cidr.clone(),
        }
    }
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Only count FailoverServices in this namespace
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("mesh-failover operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Info(info_args) => run_info(info_args).await,
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_info(args: InfoArgs) -> Result<(), Error> {
    let client = kube::Client::try_default().await?;

    let api: Api<FailoverService> = match &args.namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let services = api.list(&Default::default()).await?;

    let count = |state: StatusState| {
        services
            .items
            .iter()
            .filter(|fs| {
                fs.status
                    .as_ref()
                    .and_then(|s| s.translation_status.as_ref())
                    .map(|t| t.state == state)
                    .unwrap_or(false)
            })
            .count()
    };

    println!("FailoverServices: {}", services.items.len());
    println!("  translated:        {}", count(StatusState::Accepted));
    println!("  processing errors: {}", count(StatusState::ProcessingError));
    Ok(())
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = match args.log_format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    // Only enable OTEL if an endpoint is provided
    let otel_enabled = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();
    let otel_layer = if otel_enabled {
        Some(telemetry::init_telemetry()?)
    } else {
        None
    };
    registry.with(otel_layer).init();

    if otel_enabled {
        info!("OpenTelemetry tracing initialized");
    } else {
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }

    info!(
        "Starting mesh-failover operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let config = args.controller_config();
    info!(
        "Local cluster {}, owner label {}, resync every {:?}",
        config.local_cluster,
        config.labels.selector(),
        config.resync_interval
    );

    // The lease lives next to the pod when running in-cluster
    let leader_namespace =
        std::env::var("POD_NAMESPACE").unwrap_or_else(|_| args.namespace.clone());
    let is_leader = Arc::new(AtomicBool::new(false));
    let elector = LeaderElector::new(
        client.clone(),
        &leader_namespace,
        &leader::default_identity(),
    );
    tokio::spawn(elector.run(Arc::clone(&is_leader)));

    let reconciler = controller::FailoverReconciler::from_client(client.clone(), &config)?;

    // Create shared controller state
    let state = Arc::new(controller::ControllerState {
        client: client.clone(),
        reconciler,
        config,
        is_leader: Arc::clone(&is_leader),
    });

    #[cfg(feature = "rest-api")]
    {
        let api_state = state.clone();
        let api_port = args.api_port;
        tokio::spawn(async move {
            if let Err(e) = mesh_failover::rest_api::run_server(api_state, api_port).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }

    // Run the main controller loop
    let result = controller::run_controller(state).await;

    // Flush any remaining traces
    telemetry::shutdown_telemetry();

    result
}
