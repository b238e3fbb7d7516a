//! calbus server: routes system events and runs the change consumer.

mod config;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use calbus_bus::{EventRouter, LocalTransport, TransportConfig};
use calbus_core::{CalendarDirectory, SysCode, SysEvent};
use calbus_db::{MemoryDirectory, PgDirectory, PoolConfig};
use calbus_jobs::{ConsumerBuilder, ConsumerConfig};
use calbus_notify::{NotificationMerger, SharingCache, SharingCacheConfig};

use crate::config::{LogFormat, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env();

    // RUST_LOG wins over CALBUS_LOG_LEVEL
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!(
        log_format = ?config.log_format,
        log_level = %config.log_level,
        "Logging initialized"
    );

    let directory: Arc<dyn CalendarDirectory> = match config.database_url.as_deref() {
        Some(url) => {
            info!("Connecting to database...");
            let dir = PgDirectory::connect(url, PoolConfig::from_env()).await?;
            if config.run_migrations {
                info!("Running database migrations...");
                dir.migrate().await?;
                info!("Database migrations complete");
            }
            Arc::new(dir)
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory directory");
            Arc::new(MemoryDirectory::new())
        }
    };

    let transport = Arc::new(LocalTransport::new(TransportConfig::from_env()));
    let router = EventRouter::new(transport.clone());

    let cache_config = SharingCacheConfig::from_env();
    info!(
        capacity = cache_config.capacity,
        ttl_secs = cache_config.ttl_secs,
        "Sharing cache configured"
    );
    let merger = NotificationMerger::new(directory, SharingCache::new(cache_config));

    let mut consumer = ConsumerBuilder::new(transport.clone())
        .with_config(ConsumerConfig::from_env())
        .with_handler(merger)
        .build()
        .start()?;

    if let Err(e) = router.publish(SysEvent::new(SysCode::ServiceStarted)) {
        warn!(error = %e, "Failed to publish service start event");
    }
    info!("calbus server running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if let Err(e) = router.publish(SysEvent::new(SysCode::ServiceStopped)) {
        warn!(error = %e, "Failed to publish service stop event");
    }

    let stopped = consumer.stop().await;
    info!(stats = %consumer.stats(), "Final change consumer counters");
    transport.close_all();
    stopped?;

    Ok(())
}
