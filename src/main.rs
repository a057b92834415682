//! Domainwall - Entry point.
//!
//! Loads the configuration, builds the first blocklist snapshot, then serves
//! DNS on UDP and, when enabled, the HTTP proxy on TCP until Ctrl-C.
//! Sending SIGHUP forces an immediate blocklist refresh.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use domainwall::blocklist::BlocklistCache;
use domainwall::cache::MokaCache;
use domainwall::config::Config;
use domainwall::dns::{self, BlockAnswer, DnsServer, QueryHandler, UpstreamResolver};
use domainwall::filter::Filter;
use domainwall::proxy::ProxyServer;
use domainwall::store::ConfiguredStore;
use domainwall::tenant::TenantResolver;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Forward SIGHUP to the refresh loop.
#[cfg(unix)]
fn spawn_reload_signal(trigger: mpsc::Sender<()>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            if trigger.try_send(()).is_err() {
                warn!("refresh already pending, ignoring SIGHUP");
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_reload_signal(trigger: mpsc::Sender<()>) -> Result<()> {
    // Keep the channel open so the refresh loop keeps running.
    std::mem::forget(trigger);
    Ok(())
}

async fn run() -> Result<()> {
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;

    init_tracing(&config);

    // Initialize metrics (must be done early, before any metrics are recorded)
    domainwall::metrics::init(&config.metrics).context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        info!("Metrics enabled on {}", config.metrics.listen);
    }

    info!("Starting domainwall...");
    info!("Upstream resolver: {}", config.dns.upstream);
    info!("Failure policy: {:?}", config.failure_policy);

    let store =
        ConfiguredStore::from_config(&config.rules.source).context("Failed to create rule store")?;
    info!(store = ?store, "rule store configured");

    let blocklist = Arc::new(BlocklistCache::new(store));
    if let Err(err) = blocklist.refresh().await {
        warn!(error = %err, "initial blocklist load failed, serving without rules until the next refresh");
    }

    let (trigger_tx, trigger_rx) = mpsc::channel(1);
    spawn_reload_signal(trigger_tx)?;
    tokio::spawn(Arc::clone(&blocklist).run(config.rules.refresh_interval(), trigger_rx));

    let filter = Filter::new(blocklist.reader())
        .with_policy(config.failure_policy)
        .with_dns_scope(config.dns.scope)
        .with_resolver(TenantResolver::new(config.proxy.trusted_proxies.iter().copied()));

    let socket = dns::server::bind(config.dns.listen, config.dns.fallback_listen)
        .await
        .context("Failed to bind DNS socket")?;
    let cache = MokaCache::with_capacity(
        config.dns.answer_cache_ttl(),
        config.dns.answer_cache_capacity,
    );
    let resolver = UpstreamResolver::new(config.dns.upstream, config.dns.upstream_timeout());
    let handler = QueryHandler::new(filter.clone(), cache, resolver)
        .with_block_answer(BlockAnswer::from(&config.dns));
    let dns_server = DnsServer::new(socket, handler);
    info!("DNS listening on {}", dns_server.local_addr()?);
    let dns_handle = tokio::spawn(dns_server.run());

    let proxy_handle = if config.proxy.enabled {
        let proxy = ProxyServer::bind(config.proxy.listen, filter, config.proxy.connect_timeout())
            .await
            .with_context(|| format!("Failed to bind proxy on {}", config.proxy.listen))?;
        Some(tokio::spawn(proxy.run()))
    } else {
        info!("HTTP proxy disabled");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting down...");

    dns_handle.abort();
    if let Some(handle) = proxy_handle {
        handle.abort();
    }

    info!("Shutdown complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}
