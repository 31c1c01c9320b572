pub mod config;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod logging;
pub mod matching;
pub mod relay;
pub mod strategy;
pub mod template;
pub mod tls;

use std::sync::Arc;

use log::{error, info};

use crate::listener::ListenerManager;
use crate::tls::MaterialStore;

/// Boot the listener fleet and serve until interrupted.
///
/// This function intentionally logs errors rather than returning them so
/// the simple `main` runner can call it without changing its signature.
pub async fn run() {
	// Load settings (fall back to defaults on error)
	let settings = match crate::config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("warning: failed to load settings: {}", e);
			crate::config::Settings::default()
		}
	};

	if let Err(e) = crate::logging::init_logging(settings.log_level.as_deref()) {
		eprintln!("warning: failed to initialize logging: {}", e);
	}

	let material_store = Arc::new(MaterialStore::new(
		settings.scratch_dir.clone(),
		settings.cleanup_on_shutdown,
	));
	let manager = Arc::new(ListenerManager::new(
		material_store,
		settings.kubectl_path.clone(),
	));

	// Boot loading: one bad entry is logged and skipped, a broken config
	// document is fatal.
	match crate::config::loader::load_and_apply(&settings, &manager).await {
		Ok(report) => {
			info!(
				"boot loading finished: {} listener(s) up, {} failed",
				report.created.len(),
				report.failed.len()
			);
		}
		Err(e) => {
			error!("failed to load listener configuration: {}", e);
			return;
		}
	}

	info!("loki is ready ({} listener(s))", manager.list().await.len());

	match tokio::signal::ctrl_c().await {
		Ok(()) => info!("interrupt received; shutting down"),
		Err(e) => error!("failed to wait for interrupt: {}", e),
	}

	// Orderly shutdown kills every tunnel subprocess and removes the TLS
	// scratch files; tunnels additionally die with the process through
	// kill-on-drop.
	manager.shutdown().await;
	info!("shutdown complete");
}
