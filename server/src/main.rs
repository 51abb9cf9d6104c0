use std::io;

use log::{info, warn};
use model_registry::{ModelRegistry, PreprocessSelector};
use tokio::{net::TcpListener, signal, task};

use server::{AppState, ServerConfig, cleanup, router};

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config = ServerConfig::from_env()?;
    let device = config.device.resolve();
    let labels = config.labels()?;
    let descriptors = config.descriptors()?;
    info!(
        device:% = device,
        classes = labels.len(),
        configured = descriptors.len();
        "loading models"
    );

    let (registry, labels, descriptors) = {
        let dirs = config.checkpoint_dirs.clone();
        task::spawn_blocking(move || {
            let report = ModelRegistry::build(&descriptors, &dirs, &labels);
            (report.registry, labels, descriptors)
        })
        .await
        .map_err(io::Error::other)?
    };

    let names: Vec<&str> = registry.names().collect();
    if names.is_empty() {
        warn!("serving mocked predictions");
    } else {
        info!("serving {names:?}");
    }

    let state = AppState::new(
        registry,
        PreprocessSelector::deployed(),
        labels,
        descriptors.into_iter().map(|d| d.name),
    );
    let purge = cleanup::spawn_account_purge(
        state.accounts.clone(),
        config.cleanup_interval,
        config.unverified_ttl,
    );

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("listening at {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if signal::ctrl_c().await.is_ok() {
                info!("received SIGTERM");
            }
        })
        .await?;

    purge.abort();
    info!("wrapping up");
    Ok(())
}
