use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use query_helpers::{logging, shutdown};
use query_server::auth::{self, Certificate};
use query_server::config::Config;
use query_server::core::node::mock::MockNode;
use query_server::core::{self, HandlerContext, Publisher, Registry, RequestWorker, SendQueue, SubscriptionManager};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    logging::init_logging("query_server=info,tokio=warn", "QUERY_SERVER_LOG", "query-server");

    let config = Config::load().context("failed to load configuration")?;
    info!(
        "server starting: query={}, heartbeat={}, block_publish={}, transaction_publish={}",
        config.query_endpoint,
        config.heartbeat_endpoint,
        config.block_publish_endpoint,
        config.transaction_publish_endpoint,
    );

    let whitelisted_ips = parse_whitelisted_ips(&config.auth.whitelisted_ips);

    let server_certificate = config
        .auth
        .server_certificate_path
        .as_deref()
        .map(Certificate::load)
        .transpose()
        .context("failed to load server certificate")?;

    let accepted_client_keys = if config.auth.curve_enabled() {
        let dir = config
            .auth
            .client_certificates_dir
            .as_deref()
            .expect("curve_enabled() guarantees client_certificates_dir is set");
        Some(auth::load_client_keys(dir).context("failed to load client certificates")?)
    } else {
        None
    };

    let zmq_context = zmq::Context::new();

    // The blockchain database, transaction pool, and peer network are
    // opaque external collaborators (out of scope); MockNode stands in as
    // the integration seam a production deployment replaces.
    let node: Arc<dyn core::Node> = Arc::new(MockNode::default());

    let publisher = Arc::new(
        Publisher::bind(&zmq_context, &config.block_publish_endpoint, &config.transaction_publish_endpoint)
            .context("failed to bind publisher sockets")?,
    );

    let (send_queue, wakeup_pull_socket) =
        SendQueue::new(&zmq_context, config.send_queue_high_water_mark)
            .context("failed to create send queue")?;
    let send_queue = Arc::new(send_queue);

    let subscriptions = SubscriptionManager::start(
        send_queue.clone(),
        config.subscription_limit,
        config.subscription_expiration(),
    );

    core::events::spawn_block_bridge(node.block_events(), publisher.clone(), subscriptions.clone());
    core::events::spawn_transaction_bridge(node.transaction_events(), publisher.clone());

    let mut registry = Registry::new();
    core::handlers::register_all(&mut registry);

    let handler_context = Arc::new(HandlerContext { node: node.clone(), subscriptions });

    let settings = core::worker::WorkerSettings {
        query_endpoint: config.query_endpoint.clone(),
        heartbeat_endpoint: config.heartbeat_endpoint.clone(),
        polling_interval: Duration::from_secs(config.polling_interval_seconds),
        heartbeat_interval: Duration::from_secs(config.heartbeat_interval_seconds),
        server_certificate,
        accepted_client_keys,
        whitelisted_ips,
    };

    let worker = RequestWorker::start(
        zmq_context,
        settings,
        send_queue,
        wakeup_pull_socket,
        registry,
        handler_context,
        tokio::runtime::Handle::current(),
    )
    .context("failed to start request worker")?;

    let shutdown_token = CancellationToken::new();
    tokio::spawn(shutdown::listen_shutdown(shutdown_token.clone()));
    shutdown_token.cancelled().await;

    info!("shutdown signal received, stopping worker");
    worker.stop();
    Ok(())
}

fn parse_whitelisted_ips(raw: &[String]) -> Vec<IpAddr> {
    raw.iter()
        .filter_map(|entry| match entry.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(err) => {
                warn!("ignoring invalid whitelisted IP: value={entry}, error={err}");
                None
            }
        })
        .collect()
}
