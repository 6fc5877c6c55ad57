use clap::Parser;
use pkg_constants::paths::DEFAULT_OPERATOR_CONFIG;
use pkg_constants::state::EVENT_LOG_CAPACITY;
use pkg_controllers::apply::Applier;
use pkg_controllers::certs::ensure_root_issuer;
use pkg_controllers::context::Context;
use pkg_controllers::manager::Manager;
use pkg_controllers::services::load_catalog;
use pkg_state::client::StateStore;
use pkg_state::registry::Registry;
use pkg_state::watch::EventLog;
use pkg_types::config::{OperatorConfig, OperatorConfigFile, load_config_file};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dataplane-operator", about = "Dataplane NodeSet and Deployment operator")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_OPERATOR_CONFIG)]
    config: String,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Namespace for manifests that name none
    #[arg(long)]
    namespace: Option<String>,

    /// Directory of service definitions loaded into every namespace
    #[arg(long)]
    services_dir: Option<String>,

    /// Directory of manifests applied at startup
    #[arg(long)]
    manifests_dir: Option<String>,

    /// Seconds between full resyncs
    #[arg(long)]
    resync_secs: Option<u64>,

    /// Number of reconcile workers
    #[arg(long)]
    workers: Option<usize>,

    /// Log as JSON lines
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

impl Cli {
    /// CLI args take precedence over the config file.
    fn merge_into(self, mut file: OperatorConfigFile) -> OperatorConfigFile {
        file.data_dir = self.data_dir.or(file.data_dir);
        file.namespace = self.namespace.or(file.namespace);
        file.services_dir = self.services_dir.or(file.services_dir);
        file.manifests_dir = self.manifests_dir.or(file.manifests_dir);
        file.resync_secs = self.resync_secs.or(file.resync_secs);
        file.workers = self.workers.or(file.workers);
        file
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    // Load config file (returns defaults if file not found)
    let file_cfg: OperatorConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > environment > defaults
    let config = OperatorConfig::from_sources(cli.merge_into(file_cfg), |key| {
        std::env::var(key).ok()
    });

    info!("Starting dataplane-operator");
    info!("  Data dir:      {}", config.data_dir);
    info!("  Namespace:     {}", config.namespace);
    info!("  Services dir:  {}", config.services_dir);
    info!("  Workers:       {}", config.workers);
    info!("  Resync:        {}s", config.resync_interval.as_secs());

    let store = StateStore::new(&config.data_dir).await?;
    let registry = Registry::open(store, EventLog::new(EVENT_LOG_CAPACITY)).await?;

    ensure_root_issuer(&registry, &config.namespace).await?;
    let catalog = load_catalog(&config.services_dir)?;

    if let Some(dir) = &config.manifests_dir {
        Applier::new(registry.clone(), &config.namespace)
            .apply_dir(dir)
            .await?;
    }

    let ctx = Context::new(registry.clone(), Arc::new(config), catalog);
    let manager = Manager::new(ctx).start();

    // Block until Ctrl-C
    info!("Operator is running. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down operator");

    manager.shutdown().await;
    registry.close().await?;
    Ok(())
}
