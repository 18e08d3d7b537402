//! Storefront checkout service

use std::sync::Arc;

use anyhow::Result;
use ecommerce_checkout::config::AppConfig;
use ecommerce_checkout::gateway::{MercadoPagoClient, MockGateway, PaymentGateway};
use ecommerce_checkout::http::{self, AppState, SERVICE_NAME};
use ecommerce_checkout::notify::{HttpMailer, LogNotifier, Notifier};
use ecommerce_checkout::services::{Backends, EventPublisher, Services};
use ecommerce_checkout::store::memory::MemoryStore;
use ecommerce_checkout::store::postgres::{create_pool, PgStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ecommerce_checkout=info,tower_http=debug".into());
    tracing_subscriber::registry().with(env_filter).with(tracing_subscriber::fmt::layer()).init();

    let config = AppConfig::from_env()?;

    let gateway: Arc<dyn PaymentGateway> = match &config.gateway {
        Some(gateway) => Arc::new(MercadoPagoClient::new(gateway)?),
        None => {
            tracing::warn!("MP_ACCESS_TOKEN not set, using the mock payment gateway");
            Arc::new(MockGateway::new())
        }
    };
    let notifier: Arc<dyn Notifier> = match &config.mail {
        Some(mail) => Arc::new(HttpMailer::new(mail)?),
        None => Arc::new(LogNotifier),
    };
    let nats = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, domain events will only be logged");
                None
            }
        },
        None => None,
    };
    let events = EventPublisher::new(nats);

    let backends = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            Backends::with_store(Arc::new(PgStore::new(pool)), gateway, notifier, events)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            Backends::with_store(Arc::new(MemoryStore::new()), gateway, notifier, events)
        }
    };

    let services = Services::new(backends, config.checkout.clone());
    let state = AppState::new(services, &config.jwt_secret, config.checkout.public_base_url.clone());
    let app = http::router(state);

    let addr = config.socket_addr();
    tracing::info!(%addr, "{SERVICE_NAME} listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
