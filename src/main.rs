use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{net::TcpListener, signal, sync::mpsc};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use greenhouse_service::{
    api,
    app::{Greenhouse, GreenhouseOptions},
    config::Config,
    control::CommandPublisher,
    db::{self, memory::MemoryStore, postgres::PgStore},
    mqtt::{self, MqttPublisher},
    notify::{LogNotifier, NotificationSender, WebhookNotifier},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent; env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let options = GreenhouseOptions::from(&config);

    // MQTT client; the event loop is spawned once the pipeline exists
    let (client, eventloop) = mqtt::connect(&config.mqtt);
    let publisher: Arc<dyn CommandPublisher> = Arc::new(MqttPublisher::new(client.clone()));

    let notifier: Arc<dyn NotificationSender> = match &config.webhook {
        Some(webhook) => {
            info!(url = %webhook.url, timeout = ?webhook.timeout, "Alert notifications via webhook");
            Arc::new(WebhookNotifier::new(webhook)?)
        }
        None => Arc::new(LogNotifier),
    };

    let greenhouse = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            info!("Database ready");
            Greenhouse::build(Arc::new(PgStore::new(pool)), publisher, notifier, options).await?
        }
        None => {
            warn!("DATABASE_URL not set; records are kept in memory only");
            Greenhouse::build(Arc::new(MemoryStore::new()), publisher, notifier, options).await?
        }
    };

    // Inbound sensor messages: transport task -> bounded channel -> consumer
    {
        let (tx, rx) = mpsc::channel(256);
        let prefix = config.mqtt.topic_prefix.clone();
        mqtt::spawn_event_loop(eventloop, client, &prefix, tx);
        tokio::spawn(mqtt::run_consumer(
            rx,
            prefix,
            greenhouse.sensors.clone(),
            greenhouse.alerts.clone(),
        ));
    }

    tokio::spawn(
        greenhouse
            .clone()
            .run_merge(Duration::from_secs(config.merge_interval_secs)),
    );
    tokio::spawn(
        greenhouse
            .automation
            .clone()
            .run(Duration::from_secs(config.automation_check_interval_secs)),
    );
    tokio::spawn(greenhouse.alerts.clone().run_notifications());

    // Start HTTP server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(greenhouse))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
