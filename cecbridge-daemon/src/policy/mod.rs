//! Entry policies, one per subcommand. `startup` decides and replaces the
//! process with `ap` or `bridge`; those two run until the process ends.

pub mod ap;
pub mod bridge;
pub mod startup;

use cecbridge_core::{config::AppSettings, store::StateStore};

fn state_store(settings: &AppSettings) -> StateStore {
    StateStore::new(settings.paths.clone())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutting down...");
}
