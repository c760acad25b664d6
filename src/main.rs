// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use telemetry_spool::clock::system_clock;
use telemetry_spool::config::{load_config_with_env, ConfigLoader, LoggingConfig, TelemetryConfig};
use telemetry_spool::controller::{ControllerService, Ingestor};
use telemetry_spool::fsprobe::StatvfsProbe;
use telemetry_spool::liveness::LivenessTracker;
use telemetry_spool::node::NodeRuntime;
use telemetry_spool::sink::SinkFactory;
use telemetry_spool::transport::zenoh::{forward_samples, open_session};
use telemetry_spool::transport::ZenohTransport;

/// Telemetry spool - store-and-forward telemetry for edge nodes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Node ID (overrides config file)
    #[arg(short, long)]
    node_id: Option<String>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Role {
    /// Spool local samples and forward them to the controller
    Node,
    /// Ingest node data, publish acks and answer liveness queries
    Controller,
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let log_level = match logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG wins over the configured level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    let builder = FmtSubscriber::builder().with_env_filter(filter);
    if logging.format == "compact" {
        tracing::subscriber::set_global_default(builder.compact().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn run_node(config: TelemetryConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let session = open_session(&config.zenoh).await?;
    let transport = Arc::new(
        ZenohTransport::new(session.clone(), &config.zenoh.key_prefix, &config.node.node_id).await?,
    );
    let runtime = NodeRuntime::start(&config, transport, Arc::new(StatvfsProbe), system_clock()).await?;

    let intake = forward_samples(&session, &config.zenoh.key_prefix, runtime.producer(), shutdown).await;
    if let Err(e) = &intake {
        tracing::error!("Sample intake stopped: {}", e);
    }
    runtime.shutdown().await?;
    intake
}

async fn run_controller(config: TelemetryConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let session = open_session(&config.zenoh).await?;

    let sink = SinkFactory::create(&config.controller.sink)?;
    info!("Ingest sink initialized: {}", sink.backend_type());
    sink.initialize().await?;

    let max_retries = config
        .controller
        .sink
        .backend_config
        .as_reductstore()
        .map(|r| r.max_retries)
        .unwrap_or(3);
    let liveness = Arc::new(LivenessTracker::new(
        config.controller.online_timeout(),
        config.controller.freshness_timeout(),
        system_clock(),
    ));
    let ingestor = Arc::new(Ingestor::new(sink, liveness, max_retries));

    let service = ControllerService::new(
        session,
        ingestor,
        config.zenoh.key_prefix.clone(),
        config.controller.ack_interval(),
    );
    service.run(shutdown).await
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file
    let mut config = load_config_with_env(&args.config)?;

    // Apply CLI overrides
    if let Some(node_id) = args.node_id {
        config.node.node_id = node_id;
        ConfigLoader::validate(&config)?;
    }

    init_logging(&config.logging)?;

    info!("Starting telemetry-spool as {:?}", args.role);
    info!("Loaded configuration from: {:?}", args.config);
    info!("Node ID: {}", config.node.node_id);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let role = args.role;
    let mut task = tokio::spawn(async move {
        match role {
            Role::Node => run_node(config, shutdown_rx).await,
            Role::Controller => run_controller(config, shutdown_rx).await,
        }
    });

    // Run until Ctrl+C, or until the role stops on its own
    let joined = tokio::select! {
        joined = &mut task => joined,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received Ctrl+C, shutting down");
            let _ = shutdown_tx.send(true);
            task.await
        }
    };

    match joined {
        Ok(result) => result?,
        Err(e) => tracing::error!("Role task failed: {}", e),
    }
    info!("telemetry-spool shut down successfully");
    Ok(())
}
