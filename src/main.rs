use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use gcs_link::config::CONFIG;
use gcs_link::settings::{FileSettings, MemorySettings, SettingsStore};
use gcs_link::util::setup_logging;
use gcs_link::{GcsLink, LinkEvent, LinkOptions, NoticeLevel, Store, StoreOptions};

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging(&CONFIG.general.log_level);
    info!("Application starting...");

    let store = Store::new(StoreOptions::from_config(&CONFIG)?);
    let settings: Arc<dyn SettingsStore> = match CONFIG.link.settings_file() {
        Some(path) => {
            info!("Settings file: {:?}", path);
            Arc::new(FileSettings::new(path))
        }
        None => {
            warn!("No config directory, endpoint changes will not persist");
            Arc::new(MemorySettings::default())
        }
    };

    let link = GcsLink::new(
        store.clone(),
        settings,
        LinkOptions::from(&CONFIG.link),
        &CONFIG.link.default_endpoint,
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let events_handle = spawn_event_logger(store, shutdown_tx.subscribe());

    link.connect()?;

    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, closing link..."),
        Err(err) => error!("Failed to listen for shutdown signal: {}", err),
    }

    if let Err(e) = link.disconnect() {
        error!("Failed to close link: {}", e);
    }
    let _ = shutdown_tx.send(());
    if let Err(e) = events_handle.await {
        error!("Event logger join error: {}", e);
    }

    info!("Link closed, shutting down");
    Ok(())
}

fn spawn_event_logger(
    store: Store,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let mut events = store.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => log_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event logger skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.recv() => {
                    debug!("Stopping event logger");
                    break;
                }
            }
        }
    })
}

fn log_event(event: LinkEvent) {
    match event {
        LinkEvent::Connection(state) => info!("Link state: {:?}", state),
        LinkEvent::Notice(notice) => {
            let text = match notice.title {
                Some(title) => format!("{}: {}", title, notice.message),
                None => notice.message,
            };
            match notice.level {
                NoticeLevel::Success | NoticeLevel::Info => info!("{}", text),
                NoticeLevel::Warning => warn!("{}", text),
                NoticeLevel::Error => error!("{}", text),
            }
        }
        LinkEvent::LogAppended(entry) => {
            info!("[vehicle {}] {} {}", entry.level, entry.time, entry.text)
        }
        LinkEvent::EndpointChanged(endpoint) => info!("Endpoint changed to {}", endpoint),
        other => debug!("{:?}", other),
    }
}
