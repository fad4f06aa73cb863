use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use dell_csi_operator::config::operator::{
    detect_openshift, discover_kube_version, parse_enabled_drivers, resolve_config_dir,
    DEFAULT_CONFIG_FILE,
};
use dell_csi_operator::config::{DriverConfigProvider, FileConfigProvider, OperatorConfig};
use dell_csi_operator::controller::{run_controller, run_proxy_controller};
use dell_csi_operator::crd::{
    CSIIsilon, CSIPowerMax, CSIPowerStore, CSIUnity, CSIVXFlexOS, DriverType,
};
use dell_csi_operator::leader::{LeaderElector, CLAIM_RETRY};
use tokio::task::JoinSet;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

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
    /// Show version information
    Version,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Directory holding config.yaml and the driver config JSON files
    #[arg(long, env = "X_CSI_OPERATOR_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[arg(long, env = "X_CSI_OPERATOR_CONFIG_FILE", default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,

    /// Comma-separated driver types to manage; all when unset
    #[arg(long, env = "OPERATOR_DRIVERS")]
    drivers: Option<String>,

    /// Address the metrics endpoint binds to
    #[arg(long, default_value = ":9999")]
    metrics_addr: String,

    /// Only run controllers while holding the operator lease
    #[arg(long)]
    enable_leader_election: bool,

    /// Reject user env vars the driver config does not know
    #[arg(long)]
    strict_env_check: bool,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Operator namespace, used for the leader election lease
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = "default")]
    namespace: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("Dell CSI Operator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn run_operator(args: RunArgs) -> anyhow::Result<()> {
    init_tracing(args.log_format);
    info!("Starting Dell CSI Operator v{}", env!("CARGO_PKG_VERSION"));

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let config_dir = resolve_config_dir(args.config_dir.as_deref(), &args.config_file);
    let kube_version = discover_kube_version(&client, &config_dir, &args.config_file)
        .await
        .context("failed to resolve the Kubernetes version")?;
    info!("Using Kubernetes version {}", kube_version);
    let is_openshift = detect_openshift(&client).await;

    let settings = OperatorConfig {
        config_dir: config_dir.clone(),
        config_file: args.config_file.clone(),
        kube_version,
        enabled_drivers: parse_enabled_drivers(args.drivers.as_deref()),
        is_openshift,
        strict_check: args.strict_env_check,
        ..Default::default()
    };
    let provider: Arc<dyn DriverConfigProvider> =
        Arc::new(FileConfigProvider::new(config_dir, args.config_file.clone()));

    #[cfg(feature = "metrics")]
    {
        let addr = dell_csi_operator::controller::metrics::parse_bind_addr(&args.metrics_addr)?;
        tokio::spawn(async move {
            if let Err(e) = dell_csi_operator::controller::metrics::serve(addr).await {
                error!("Metrics server error: {:?}", e);
            }
        });
    }

    if args.enable_leader_election {
        let namespace =
            std::env::var("POD_NAMESPACE").unwrap_or_else(|_| args.namespace.clone());
        let identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string())
        });
        info!("Leader election enabled, identity {}", identity);

        let leading = Arc::new(AtomicBool::new(false));
        let elector = LeaderElector::new(client.clone(), &namespace, &identity);
        tokio::spawn(elector.run(Arc::clone(&leading)));
        while !leading.load(Ordering::Relaxed) {
            tokio::time::sleep(CLAIM_RETRY).await;
        }
    }

    let mut controllers = JoinSet::new();
    for driver_type in &settings.enabled_drivers {
        info!("Enabling controller for {}", driver_type);
        let (client, provider, settings) = (client.clone(), provider.clone(), settings.clone());
        match driver_type {
            DriverType::PowerMax => {
                controllers.spawn(run_controller::<CSIPowerMax>(client, provider, settings))
            }
            DriverType::Isilon => {
                controllers.spawn(run_controller::<CSIIsilon>(client, provider, settings))
            }
            DriverType::Unity => {
                controllers.spawn(run_controller::<CSIUnity>(client, provider, settings))
            }
            DriverType::VxFlexOs => {
                controllers.spawn(run_controller::<CSIVXFlexOS>(client, provider, settings))
            }
            DriverType::PowerStore => {
                controllers.spawn(run_controller::<CSIPowerStore>(client, provider, settings))
            }
        };
    }
    if settings.enabled_drivers.contains(&DriverType::PowerMax) {
        controllers.spawn(run_proxy_controller(client.clone()));
    }

    while let Some(joined) = controllers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Controller stopped: {}", e),
            Err(e) => error!("Controller task failed: {}", e),
        }
    }
    info!("All controllers stopped");
    Ok(())
}
