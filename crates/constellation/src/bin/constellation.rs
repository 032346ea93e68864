//! Constellation CLI
//!
//! Usage:
//!   constellation
//!   constellation --config stack.yaml
//!   constellation --config stack.yaml --dry-run

use constellation::{
    DependencyPolicy, Orchestrator, OrchestratorConfig, ServiceFile, ServiceState, StatusBoard,
    SuperviseArgs,
};
use std::time::Duration;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    let args: SuperviseArgs = argh::from_env();

    // Initialize logging
    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    // Load config
    log::info!("Loading config file: {}", args.config);
    let registry = match ServiceFile::from_file(&args.config).and_then(|f| f.to_registry()) {
        Ok(registry) => registry,
        Err(e) => {
            log::error!("Error while parsing config: {}", e);
            std::process::exit(1);
        }
    };

    let config = OrchestratorConfig {
        shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        dependency_policy: if args.finished_satisfies {
            DependencyPolicy::RunningOrFinished
        } else {
            DependencyPolicy::RunningOnly
        },
    };
    let mut orchestrator = Orchestrator::with_registry(registry, config);

    // Validate only mode
    if args.validate {
        match orchestrator.validate() {
            Ok(graph) => {
                println!("Config '{}' is valid", args.config);
                println!("  Services: {}", graph.len());
                println!(
                    "  Launch order: {}",
                    graph.launch_order().collect::<Vec<_>>().join(", ")
                );
            }
            Err(e) => {
                log::error!("Invalid config: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Dry run mode
    if args.dry_run {
        match orchestrator.plan() {
            Ok(plan) => println!("{}", plan),
            Err(e) => {
                log::error!("Failed to generate launch plan: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());

    // Set up Ctrl+C handler
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, initiating shutdown...");
        let _ = shutdown_tx.send(());
    }) {
        log::error!("Error setting Ctrl+C handler: {}", e);
        std::process::exit(1);
    }

    let (mut events, services) = match orchestrator.initialize() {
        Ok(started) => started,
        Err(e) => {
            log::error!("Error while initializing services: {}", e);
            std::process::exit(1);
        }
    };

    let mut board = StatusBoard::new(&services);
    println!("{}", board.render());

    let mut shutting_down = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => println!("{}", board.apply(&event)),
                None => break,
            },
            changed = shutdown_rx.changed(), if !shutting_down => {
                if changed.is_ok() {
                    orchestrator.shutdown();
                }
                shutting_down = true;
            }
        }
    }

    orchestrator.wait().await;

    println!();
    println!("{}", board.render());

    let failed = orchestrator
        .states()
        .iter()
        .any(|(_, state)| *state == ServiceState::Failed);

    log::info!("Constellation exiting");
    if failed {
        std::process::exit(1);
    }
}
