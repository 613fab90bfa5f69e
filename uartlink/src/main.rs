use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{self, SignalKind};
use tokio_util::task::TaskTracker;

use uartlink::config::Config;
use uartlink::discovery::{DeviceIdEnumerator, FilterMode, PortEnumerator, SystemEnumerator};
use uartlink::link::SerialLinkFactory;
use uartlink::manager::LinkManager;
use uartlink::session::{self, AesGcmCipher, SessionContext};
use uartlink::tracing::{self, prelude::*};
use uartlink::Error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::init_journald_or_stdout();

    let config = match env::var("UARTLINK_CONFIG") {
        Ok(path) => Config::load_from(Path::new(&path))?,
        Err(_) => Config::from_env(),
    };

    let enumerator: Box<dyn PortEnumerator> = if config.search_by_id {
        Box::new(DeviceIdEnumerator::new())
    } else {
        Box::new(SystemEnumerator)
    };
    let filter = FilterMode::from_config(config.search_by_id, config.use_manufacturer);
    let session = session::shared(SessionContext::new(config.device_id, None));
    let manager = LinkManager::new(
        enumerator,
        filter,
        Arc::new(SerialLinkFactory::new(config.baud_rate)),
        session,
        Arc::new(AesGcmCipher),
        config.auto_reconnect,
    );

    let tracker = TaskTracker::new();
    {
        let manager = manager.clone();
        let forced_port = config.forced_port.clone();
        tracker.spawn(async move {
            match manager.start(forced_port).await {
                Ok(()) => info!("Connected."),
                Err(Error::Closed) => debug!("Link manager closed."),
                Err(e) => error!(error = %e, "Link manager stopped."),
            }
        });
    }
    tracker.close();
    info!("Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }

    trace!("Shutting down.");
    manager.close().await;

    tracker.wait().await;
    info!("Exiting.");
    Ok(())
}
