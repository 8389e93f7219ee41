mod clients;
mod config;
mod ports;
mod server;
mod tasks;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use meridian_core::{ModuleRegistry, Supervisor, system};
use meridian_limiter::RateLimiter;
use meridian_model::ModuleStatus;
use meridian_observe::{Logger, LoggerConfig};
use meridian_store::{FailoverStore, FileBackend, RemoteBackend, StorageBackend};

use crate::clients::{HttpTextGenerator, RestPaymentClient, WebhookSocialClient};
use crate::config::AgentConfig;
use crate::ports::{PaymentClient, SocialClient, TextGenerator};
use crate::server::ApiState;
use crate::tasks::TaskContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration problems are the one fatal startup path: print every
    // specific issue and exit.
    let config = match AgentConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration errors:");
            for error in &e.errors {
                eprintln!("  - {error}");
            }
            eprintln!("fix the environment and restart");
            std::process::exit(1);
        }
    };

    Logger::init(&LoggerConfig {
        format: config.log_format,
        level: config.log_level.clone(),
        file: config.log_file.clone(),
        ..LoggerConfig::default()
    })
    .context("logger initialization")?;

    system::init_uptime();
    info!(instance = system::instance_id(), "meridian starting");

    // Storage: networked primary when configured, durable local fallback
    // always. An unreachable primary degrades, never aborts.
    let fallback = FileBackend::new(&config.data_dir).context("fallback storage directory")?;
    let primary = config
        .store_addr
        .as_ref()
        .map(|addr| Arc::new(RemoteBackend::new(addr)) as Arc<dyn StorageBackend>);
    let store = Arc::new(FailoverStore::new(primary, Arc::new(fallback)));

    let registry = ModuleRegistry::new();
    if store.connect().await {
        registry.set_status("store", ModuleStatus::Connected);
    } else {
        warn!("running on local storage fallback");
        registry.set_status("store", ModuleStatus::Fallback);
    }

    let limiter = Arc::new(RateLimiter::with_limits(store.clone(), config.limit_table()));
    let supervisor = Arc::new(Supervisor::new(registry.clone()));

    // Collaborators: registered for startup probing and ordered shutdown.
    let mut socials: Vec<Arc<dyn SocialClient>> = Vec::new();
    for platform in &config.platforms {
        let client = Arc::new(
            WebhookSocialClient::new(
                &platform.name,
                &platform.webhook_url,
                platform.inbox_url.clone(),
                platform.token.clone(),
            )
            .with_context(|| format!("{} client", platform.name))?,
        );
        supervisor.register(client.clone());
        socials.push(client);
    }

    let generator = Arc::new(
        HttpTextGenerator::new(&config.generator_url, &config.generator_key)
            .context("generator client")?,
    );
    supervisor.register(generator.clone());

    let payments = Arc::new(
        RestPaymentClient::new(
            &config.payment_url,
            &config.payment_client_id,
            &config.payment_secret,
        )
        .context("payment client")?,
    );
    supervisor.register(payments.clone());

    supervisor.startup().await;

    let ctx = Arc::new(TaskContext {
        store: store.clone(),
        limiter,
        registry: registry.clone(),
        socials,
        generator: generator as Arc<dyn TextGenerator>,
        payments: payments.clone() as Arc<dyn PaymentClient>,
        post_limits: config.post_limits(),
        topics: config.topics.clone(),
    });

    supervisor.spawn(tasks::posting::spec(), tasks::posting::cycle(ctx.clone()));
    supervisor.spawn(
        tasks::engagement::spec(),
        tasks::engagement::cycle(ctx.clone()),
    );
    supervisor.spawn(tasks::sales::spec(), tasks::sales::cycle(ctx.clone()));
    supervisor.spawn(
        tasks::analytics::spec(),
        tasks::analytics::cycle(ctx.clone()),
    );
    supervisor.spawn(tasks::learning::spec(), tasks::learning::cycle(ctx.clone()));
    supervisor.spawn(tasks::health::spec(), tasks::health::cycle(ctx.clone()));
    info!(loops = supervisor.active_loops(), "task loops started");

    let api = server::router(Arc::new(ApiState {
        registry: registry.clone(),
        payments: payments as Arc<dyn PaymentClient>,
        store: store.clone(),
    }));
    // Even a failed bind goes through the full shutdown sequence so the
    // loops and collaborators started above are released.
    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.bind_addr, error = %e, "cannot bind http listener");
            supervisor.shutdown().await;
            anyhow::bail!("binding {}: {e}", config.bind_addr);
        }
    };
    info!(addr = %config.bind_addr, "http server listening");

    let http_cancel = supervisor.cancellation_token();
    let http = tokio::spawn(async move {
        let shutdown = async move { http_cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, api)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!(error = %e, "http server failed");
        }
    });

    // Run until a shutdown signal or the supervisory loop exits; the
    // shutdown sequence itself is idempotent.
    tokio::select! {
        _ = supervisor.supervise() => {}
        _ = shutdown_signal() => info!("shutdown signal received"),
    }

    supervisor.shutdown().await;
    let _ = http.await;
    info!("meridian stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                error!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
