//! swagent entry point.
//!
//! Loads the agent configuration (or a warm boot snapshot), brings up the
//! transaction coordinator against the simulated ASIC and serves until
//! interrupted, saving a snapshot on the way out.

use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use swagent::audit::{AuditCategory, AuditOutcome, AuditRecord};
use swagent::observer::FibChangeLogger;
use swagent::{
    AgentConfig, ObserverRegistry, PersistedState, SimulatedAsic, StateTree, SwitchHandler,
    TransactionCoordinator,
};

/// Switch agent control plane
#[derive(Parser, Debug)]
#[command(name = "swagent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Agent configuration file (JSON)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Warm boot snapshot, restored at startup and written at shutdown
    #[arg(short = 'w', long)]
    warm_boot_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Override the configured maximum ECMP width
    #[arg(long)]
    max_ecmp_width: Option<usize>,

    /// Route entries the simulated ASIC accepts before failing programming
    #[arg(long)]
    route_capacity: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    info!("====================================================================");
    info!("Starting swagent");
    info!("====================================================================");

    let mut config = match &args.config {
        Some(path) => match AgentConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => {
            warn!("no configuration file given, starting with an empty switch");
            AgentConfig::default()
        }
    };
    if let Some(width) = args.max_ecmp_width {
        if width == 0 {
            error!("--max-ecmp-width must be at least 1");
            return ExitCode::FAILURE;
        }
        config.max_ecmp_width = width;
    }
    info!("Max ECMP width: {}", config.max_ecmp_width);

    swagent::audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "main", "startup")
        .with_outcome(AuditOutcome::InProgress));

    let asic = match args.route_capacity {
        Some(capacity) => {
            info!("Simulated ASIC route capacity: {}", capacity);
            SimulatedAsic::new().with_route_capacity(capacity)
        }
        None => SimulatedAsic::new(),
    };

    let mut observers = ObserverRegistry::new();
    observers.register(Arc::new(FibChangeLogger::new(
        config.route_update_tracked_prefixes.iter().copied(),
    )));
    #[cfg(feature = "mod-acl-nexthop")]
    observers.register(Arc::new(swagent::observer::AclNexthopObserver::new()));
    info!("Registered observers: {:?}", observers);

    let coordinator = TransactionCoordinator::start(StateTree::new(), Arc::new(asic), observers);
    let handler = SwitchHandler::new(coordinator, config.engine_config());

    let snapshot = match &args.warm_boot_file {
        Some(path) => match PersistedState::load(path) {
            Ok(state) => state,
            Err(e) => {
                error!("cannot read warm boot snapshot {}: {}", path.display(), e);
                handler.shutdown().await;
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let initial = match snapshot {
        Some(state) => {
            info!("Warm boot: restoring state from snapshot");
            swagent::audit_log!(AuditRecord::new(AuditCategory::WarmBoot, "main", "restore")
                .with_outcome(AuditOutcome::InProgress));
            handler.load_state("warm_boot_restore", state.into_tree()).await
        }
        None => handler.load_state("apply_config", config.apply(&StateTree::new())).await,
    };
    if let Err(e) = initial {
        error!("initial state rejected: {}", e);
        handler.shutdown().await;
        return ExitCode::FAILURE;
    }

    handler.mark_configured();
    info!("Switch configured at generation {}", handler.generation());

    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("Received SIGINT, shutting down gracefully..."),
        Err(err) => error!("Failed to listen for ctrl-c: {}", err),
    }

    if let Some(path) = &args.warm_boot_file {
        match handler.save_snapshot(path) {
            Ok(()) => info!("Saved warm boot snapshot to {}", path.display()),
            Err(e) => error!("cannot save warm boot snapshot: {}", e),
        }
    }
    handler.shutdown().await;

    swagent::audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "main", "shutdown")
        .with_outcome(AuditOutcome::Success));

    info!("====================================================================");
    info!("swagent shutdown complete");
    info!("====================================================================");

    ExitCode::SUCCESS
}
