use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use cluster_features::chart::{HelmCli, ImageRegistry};
use cluster_features::config::ClusterConfig;
use cluster_features::controller::{self, ControllerState, DEFAULT_CONFIG_MAP};
use cluster_features::env::HostEnvironment;
use cluster_features::features::{EngineOptions, FeatureEngine};
use cluster_features::kubernetes::KubeAccessor;
use cluster_features::{telemetry, Error};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the configuration ConfigMap and reconcile features
    Run(RunArgs),
    /// Reconcile once from a configuration file and print feature statuses
    Reconcile(ReconcileArgs),
    /// Print the JSON schema of the configuration document
    Schema,
    /// Show version and build information
    Version,
}

#[derive(Parser, Debug)]
struct EngineArgs {
    /// Directory holding the feature charts
    #[arg(long, env = "CHARTS_DIR", default_value = "/opt/cluster-features/charts")]
    charts_dir: PathBuf,

    /// Helm binary used to manage releases
    #[arg(long, env = "HELM_BINARY", default_value = "helm")]
    helm_binary: PathBuf,

    /// Kubeconfig handed to helm
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// YAML file overriding the default component images
    #[arg(long, env = "IMAGES_FILE")]
    images: Option<PathBuf>,

    /// Attempts per workload when rolling out a restart
    #[arg(long, env = "RESTART_ATTEMPTS", default_value_t = 3)]
    restart_attempts: u32,

    /// Upper bound on waiting for custom resources to register
    #[arg(long, env = "CRD_TIMEOUT_SECS", default_value_t = 120)]
    crd_timeout_secs: u64,

    /// Interval between custom resource discovery polls
    #[arg(long, env = "CRD_POLL_INTERVAL_SECS", default_value_t = 2)]
    crd_poll_interval_secs: u64,

    /// The daemon runs under strict confinement
    #[arg(long, env = "STRICT")]
    strict: bool,

    /// Address other nodes reach this node on (detected when unset)
    #[arg(long, env = "NODE_ADDRESS")]
    node_address: Option<IpAddr>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace of the configuration ConfigMap and the leader lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "kube-system")]
    namespace: String,

    /// Name of the configuration ConfigMap
    #[arg(long, env = "CONFIG_MAP", default_value = DEFAULT_CONFIG_MAP)]
    config_map: String,

    /// Listen address of the metrics endpoint
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Parser, Debug)]
struct ReconcileArgs {
    /// Configuration document (YAML or JSON)
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    #[command(flatten)]
    engine: EngineArgs,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("cluster-features v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Schema => {
            let schema = schemars::schema_for!(ClusterConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
        Commands::Reconcile(reconcile_args) => {
            init_tracing(args.log_format);
            let result = run_reconcile(reconcile_args).await;
            telemetry::shutdown_telemetry();
            result
        }
        Commands::Run(run_args) => {
            init_tracing(args.log_format);
            let result = run_daemon(run_args).await;
            telemetry::shutdown_telemetry();
            result
        }
    }
}

fn init_tracing(log_format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    // Logs go to stderr so `reconcile` output stays parseable
    let json = log_format == LogFormat::Json;
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| fmt::layer().json().with_target(true).with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_target(true).with_writer(std::io::stderr)));

    if let Ok(endpoint) = std::env::var(telemetry::OTLP_ENDPOINT_ENV) {
        match telemetry::init_telemetry(&registry, &endpoint) {
            Ok(otel_layer) => {
                registry.with(otel_layer).init();
                info!("OpenTelemetry tracing initialized");
            }
            Err(e) => {
                registry.init();
                warn!(error = %e, "OpenTelemetry tracing disabled");
            }
        }
    } else {
        registry.init();
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }
}

fn build_engine(args: &EngineArgs, client: kube::Client) -> Result<FeatureEngine, Error> {
    let images = match &args.images {
        Some(path) => ImageRegistry::load(path)?,
        None => ImageRegistry::default(),
    };

    let mut helm = HelmCli::new(&args.helm_binary, &args.charts_dir);
    if let Some(kubeconfig) = &args.kubeconfig {
        helm = helm.with_kubeconfig(kubeconfig);
    }

    let env = HostEnvironment::new(args.strict).with_node_address(args.node_address);

    let options = EngineOptions {
        restart_attempts: args.restart_attempts,
        crd_poll_interval: Duration::from_secs(args.crd_poll_interval_secs),
        crd_timeout: Duration::from_secs(args.crd_timeout_secs),
    };

    Ok(FeatureEngine::new(
        Arc::new(helm),
        Arc::new(KubeAccessor::new(client)),
        Arc::new(env),
        Arc::new(images),
    )
    .with_options(options))
}

async fn run_reconcile(args: ReconcileArgs) -> Result<(), Error> {
    let cfg = ClusterConfig::load(&args.file)?;
    let client = kube::Client::try_default().await.map_err(Error::KubeError)?;
    let engine = build_engine(&args.engine, client)?;

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let report = controller::reconcile_once(&engine, &cancel, &cfg).await;
    print!("{}", serde_yaml::to_string(&report.statuses)?);
    if let Some(dns_ip) = &report.dns_ip {
        println!("dnsIP: {}", dns_ip);
    }

    if !report.is_success() {
        error!("{} feature(s) failed to reconcile", report.errors.len());
        telemetry::shutdown_telemetry();
        std::process::exit(1);
    }
    Ok(())
}

async fn run_daemon(args: RunArgs) -> Result<(), Error> {
    info!("Starting cluster-features v{}", env!("CARGO_PKG_VERSION"));

    let client = kube::Client::try_default().await.map_err(Error::KubeError)?;
    info!("Connected to Kubernetes cluster");

    let engine = build_engine(&args.engine, client.clone())?;
    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let is_leader = Arc::new(AtomicBool::new(false));
    {
        let lease_client = client.clone();
        let lease_ns = args.namespace.clone();
        let identity = controller::holder_identity();
        let is_leader_bg = Arc::clone(&is_leader);
        let cancel_bg = cancel.clone();

        tokio::spawn(async move {
            controller::run_leader_election(
                lease_client,
                &lease_ns,
                &identity,
                is_leader_bg,
                cancel_bg,
            )
            .await;
        });
    }

    #[cfg(feature = "metrics")]
    {
        let addr = args.metrics_addr;
        let cancel_bg = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = controller::metrics::serve(addr, cancel_bg).await {
                error!("Metrics server error: {:?}", e);
            }
        });
    }

    let state = Arc::new(ControllerState {
        client,
        engine,
        namespace: args.namespace,
        config_map: args.config_map,
        is_leader,
    });

    controller::run_controller(state, cancel).await
}

/// Cancel `token` on SIGINT or SIGTERM
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {:?}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("Shutdown signal received");
        token.cancel();
    });
}
