use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use msg_relay::broker::{DestinationSet, DnsResolver, StompConnector};
use msg_relay::config::RelayConfig;
use msg_relay::dirq::DirQueue;
use msg_relay::relay::{PublisherSettings, Relay};

/// Relays monitoring messages from the local disk queue to the message brokers.
#[derive(Parser)]
#[command(name = "msg-relay", version)]
struct Args {
    /// Path to the TOML config file.
    #[arg(
        short,
        long,
        default_value = "/etc/msg-relay/msg-relay.toml",
        env = "MSG_RELAY_CONFIG"
    )]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "msg_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match RelayConfig::load(&args.config) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "cannot load configuration");
            return ExitCode::FAILURE;
        }
    };

    let queue = match DirQueue::open(config.monitoring_dir()) {
        Ok(queue) => Arc::new(queue),
        Err(error) => {
            error!(%error, dir = %config.monitoring_dir().display(), "cannot open message queue");
            return ExitCode::FAILURE;
        }
    };

    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok());
    let endpoint = config
        .publish
        .endpoint
        .clone()
        .or_else(|| host.clone())
        .unwrap_or_else(|| "localhost".to_string());
    let fqdn = if config.publish.publish_fqdn {
        host
    } else {
        None
    };

    let settings = PublisherSettings {
        alias: config.broker.alias.clone(),
        check_interval: config.check_interval(),
        endpoint,
        fqdn,
    };
    let destinations = DestinationSet::from_config(&config.destinations, &config.publish);
    let connector = StompConnector::from_config(&config.broker);

    let stop = CancellationToken::new();
    let relay = Relay::start(
        Arc::clone(&queue),
        Box::new(connector),
        Box::new(DnsResolver),
        destinations,
        settings,
        &config.pipeline,
        stop.clone(),
    );
    info!(
        queue = %queue.root().display(),
        alias = %config.broker.alias,
        "msg-relay started"
    );

    wait_for_signal().await;
    info!("shutdown requested, draining the pipeline");
    stop.cancel();

    let shutdown = relay.shutdown();
    tokio::pin!(shutdown);
    tokio::select! {
        _ = &mut shutdown => {}
        _ = wait_for_signal() => {
            warn!("second signal received, exiting without draining");
            return ExitCode::FAILURE;
        }
    }

    info!("msg-relay stopped");
    ExitCode::SUCCESS
}

async fn wait_for_signal() {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}
