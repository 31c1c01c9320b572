use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::Router;
use axum::http::header::HeaderName;
use chrono::{DateTime, Utc};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::service::TowerToHyperService;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::sensitive_headers::{
	SetSensitiveRequestHeadersLayer, SetSensitiveResponseHeadersLayer,
};

use crate::config::model::{Expectation, ListenerConfig};
use crate::dispatch::{self, ListenerCore};
use crate::error::{Error, Result};
use crate::relay::{TokenCache, TunnelHandle, TunnelSupervisor, tunnel_key};
use crate::strategy::{self, RelayStrategy, RuntimeRelayRule};
use crate::tls::{self, MaterialKind, MaterialStore};

const RELEASE_WAIT: Duration = Duration::from_secs(10);

/// Immutable view of a live listener, the shape the management surface
/// consumes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSnapshot {
	pub listener_id: String,
	pub port: u16,
	pub description: Option<String>,
	pub tls_enabled: bool,
	pub mtls_enabled: bool,
	pub basic_auth_enabled: bool,
	pub relay_count: usize,
	pub expectation_count: usize,
	pub created: DateTime<Utc>,
}

/// A bound listener: dispatch core, serving task, TLS material and the
/// tunnels it owns.
pub struct ListenerInstance {
	config: ListenerConfig,
	core: Arc<ListenerCore>,
	created: DateTime<Utc>,
	shutdown: watch::Sender<bool>,
	serve_handle: Mutex<Option<JoinHandle<()>>>,
	tunnels: Mutex<HashMap<String, TunnelHandle>>,
}

impl ListenerInstance {
	pub fn core(&self) -> &Arc<ListenerCore> {
		&self.core
	}

	pub fn snapshot(&self) -> ListenerSnapshot {
		ListenerSnapshot {
			listener_id: self.config.server_id.clone(),
			port: self.config.port,
			description: self.config.description.clone(),
			tls_enabled: self.config.tls_config.is_some(),
			mtls_enabled: self
				.config
				.tls_config
				.as_ref()
				.is_some_and(|t| t.mtls_config.is_some()),
			basic_auth_enabled: self.config.basic_auth_config.is_some(),
			relay_count: self.config.relays.as_ref().map_or(0, Vec::len),
			expectation_count: self.core.expectation_count(),
			created: self.created,
		}
	}
}

/// Owns the listener fleet: creation, lookup, release and shutdown.
pub struct ListenerManager {
	listeners: Mutex<HashMap<String, Arc<ListenerInstance>>>,
	material_store: Arc<MaterialStore>,
	tunnel_supervisor: TunnelSupervisor,
	oauth: Arc<TokenCache>,
}

impl ListenerManager {
	pub fn new(material_store: Arc<MaterialStore>, kubectl_path: impl Into<String>) -> Self {
		Self {
			listeners: Mutex::new(HashMap::new()),
			material_store,
			tunnel_supervisor: TunnelSupervisor::new(kubectl_path),
			oauth: Arc::new(TokenCache::new()),
		}
	}

	/// Validate, materialize TLS state, start tunnels, bind and serve.
	/// Any failure aborts the listener and unwinds its partial state.
	pub async fn create_listener(&self, config: ListenerConfig) -> Result<ListenerSnapshot> {
		config.validate()?;
		let id = config.server_id.clone();

		let mut listeners = self.listeners.lock().await;
		if listeners.contains_key(&id) {
			return Err(Error::ListenerAlreadyExists(id));
		}
		if let Some(existing) = listeners.values().find(|l| l.config.port == config.port) {
			return Err(Error::ListenerCreation(format!(
				"port {} is already owned by listener '{}'",
				config.port, existing.config.server_id
			)));
		}

		// TLS material is validated and written to the scratch area before
		// anything is bound; the rustls config stays scoped to this
		// listener.
		let tls_config = match &config.tls_config {
			Some(tls) => {
				let server_config = match tls::build_server_config(tls) {
					Ok(c) => c,
					Err(e) => {
						self.material_store.release_listener(&id);
						return Err(e);
					}
				};
				let materialize = || -> Result<()> {
					self.material_store.write_material(&id, &tls.certificate, MaterialKind::Cert)?;
					self.material_store.write_material(&id, &tls.private_key, MaterialKind::Key)?;
					if let Some(mtls) = &tls.mtls_config {
						self.material_store.write_material(&id, &mtls.ca_certificate, MaterialKind::Ca)?;
					}
					Ok(())
				};
				if let Err(e) = materialize() {
					self.material_store.release_listener(&id);
					return Err(e);
				}
				Some(server_config)
			}
			None => None,
		};

		// Tunnels start one at a time; a single failure kills the ones
		// already running.
		let relays = config.relays.clone().unwrap_or_default();
		let mut tunnels: HashMap<String, TunnelHandle> = HashMap::new();
		let mut runtime_rules: Vec<RuntimeRelayRule> = Vec::with_capacity(relays.len());
		for rule in relays {
			let assigned_host_port = match &rule.tunnel_config {
				Some(tunnel) => {
					let key = tunnel_key(tunnel);
					match self.tunnel_supervisor.start(tunnel).await {
						Ok(handle) => {
							let port = handle.host_port;
							tunnels.insert(key, handle);
							Some(port)
						}
						Err(e) => {
							kill_tunnels(&mut tunnels).await;
							self.material_store.release_listener(&id);
							return Err(e);
						}
					}
				}
				None => None,
			};
			match RuntimeRelayRule::new(rule, assigned_host_port) {
				Ok(r) => runtime_rules.push(r),
				Err(e) => {
					kill_tunnels(&mut tunnels).await;
					self.material_store.release_listener(&id);
					return Err(Error::ListenerCreation(e.to_string()));
				}
			}
		}

		let relay_enabled = !runtime_rules.is_empty();
		let relay_strategy =
			relay_enabled.then(|| RelayStrategy::new(runtime_rules, self.oauth.clone()));

		let core = Arc::new(ListenerCore {
			listener_id: id.clone(),
			basic_auth: config
				.basic_auth_config
				.as_ref()
				.map(|b| (b.username.clone(), b.password.clone())),
			global_headers: config.global_headers.clone().unwrap_or_default(),
			relay_enabled,
			expectations: RwLock::new(Vec::new()),
			strategies: strategy::build_strategies(relay_strategy),
		});

		let tcp = match TcpListener::bind(("0.0.0.0", config.port)).await {
			Ok(l) => l,
			Err(e) => {
				kill_tunnels(&mut tunnels).await;
				self.material_store.release_listener(&id);
				return Err(Error::ListenerCreation(format!(
					"failed to bind port {}: {}",
					config.port, e
				)));
			}
		};

		let app = build_router(core.clone());
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let handle = match &tls_config {
			Some(server_config) => {
				let acceptor = TlsAcceptor::from(server_config.clone());
				tokio::spawn(serve_tls(tcp, acceptor, app, shutdown_rx))
			}
			None => tokio::spawn(serve_plain(tcp, app, shutdown_rx)),
		};

		info!(
			"listener '{}' serving on {}port {}",
			id,
			if tls_config.is_some() { "TLS " } else { "" },
			config.port
		);

		let instance = Arc::new(ListenerInstance {
			config,
			core,
			created: Utc::now(),
			shutdown: shutdown_tx,
			serve_handle: Mutex::new(Some(handle)),
			tunnels: Mutex::new(tunnels),
		});
		let snapshot = instance.snapshot();
		listeners.insert(id, instance);
		Ok(snapshot)
	}

	/// Stop the listener and unwind its state: tunnels first, then the
	/// server, then the TLS scratch files. Releasing an unknown id is an
	/// error.
	pub async fn release_listener(&self, listener_id: &str) -> Result<()> {
		let instance = {
			let mut listeners = self.listeners.lock().await;
			listeners
				.remove(listener_id)
				.ok_or_else(|| Error::ListenerNotFound(listener_id.to_string()))?
		};

		let mut tunnels = instance.tunnels.lock().await;
		kill_tunnels(&mut tunnels).await;
		drop(tunnels);

		let _ = instance.shutdown.send(true);
		if let Some(mut handle) = instance.serve_handle.lock().await.take() {
			if timeout(RELEASE_WAIT, &mut handle).await.is_err() {
				warn!("listener '{}' did not stop within {:?}; aborting", listener_id, RELEASE_WAIT);
				handle.abort();
			}
		}

		self.material_store.release_listener(listener_id);
		info!("listener '{}' released", listener_id);
		Ok(())
	}

	/// Release everything. Idempotent; errors are logged, not returned.
	pub async fn shutdown(&self) {
		let ids: Vec<String> = {
			let listeners = self.listeners.lock().await;
			listeners.keys().cloned().collect()
		};
		for id in ids {
			if let Err(e) = self.release_listener(&id).await {
				error!("failed to release listener '{}' during shutdown: {}", id, e);
			}
		}
		self.material_store.shutdown();
	}

	pub async fn add_expectation(&self, listener_id: &str, expectation: Expectation) -> Result<()> {
		let instance = self.get_instance(listener_id).await?;
		instance.core.add_expectation(expectation)
	}

	pub async fn clear_expectations(&self, listener_id: &str) -> Result<()> {
		let instance = self.get_instance(listener_id).await?;
		instance.core.clear_expectations();
		Ok(())
	}

	pub async fn get(&self, listener_id: &str) -> Result<ListenerSnapshot> {
		Ok(self.get_instance(listener_id).await?.snapshot())
	}

	pub async fn list(&self) -> Vec<ListenerSnapshot> {
		let listeners = self.listeners.lock().await;
		let mut snapshots: Vec<ListenerSnapshot> =
			listeners.values().map(|l| l.snapshot()).collect();
		snapshots.sort_by(|a, b| a.listener_id.cmp(&b.listener_id));
		snapshots
	}

	async fn get_instance(&self, listener_id: &str) -> Result<Arc<ListenerInstance>> {
		let listeners = self.listeners.lock().await;
		listeners
			.get(listener_id)
			.cloned()
			.ok_or_else(|| Error::ListenerNotFound(listener_id.to_string()))
	}
}

async fn kill_tunnels(tunnels: &mut HashMap<String, TunnelHandle>) {
	for (key, handle) in tunnels.drain() {
		debug!("killing tunnel {}", key);
		handle.kill().await;
	}
}

/// Every request funnels through the dispatch fallback; the defensive
/// layers mirror the rest of the suite's serving stack.
fn build_router(core: Arc<ListenerCore>) -> Router {
	let sensitive_request: Arc<[HeaderName]> = Arc::from(
		vec![
			HeaderName::from_static("authorization"),
			HeaderName::from_static("cookie"),
		]
		.into_boxed_slice(),
	);
	let sensitive_response: Arc<[HeaderName]> =
		Arc::from(vec![HeaderName::from_static("set-cookie")].into_boxed_slice());

	Router::new()
		.fallback(dispatch::dispatch)
		.layer(
			ServiceBuilder::new()
				// Catch panics in handlers and return a safe response
				// instead of unwinding the task.
				.layer(CatchPanicLayer::new())
				// Mark sensitive headers on both sides so logging and
				// tracing avoid printing them.
				.layer(SetSensitiveRequestHeadersLayer::from_shared(sensitive_request))
				.layer(SetSensitiveResponseHeadersLayer::from_shared(sensitive_response)),
		)
		.with_state(core)
}

async fn serve_plain(tcp: TcpListener, app: Router, mut shutdown: watch::Receiver<bool>) {
	let server = axum::serve(tcp, app).with_graceful_shutdown(async move {
		let _ = shutdown.changed().await;
	});
	if let Err(e) = server.await {
		error!("listener serve error: {}", e);
	}
}

/// TLS accept loop: handshake per connection, then hand the stream to
/// hyper's auto builder.
async fn serve_tls(
	tcp: TcpListener,
	acceptor: TlsAcceptor,
	app: Router,
	mut shutdown: watch::Receiver<bool>,
) {
	loop {
		tokio::select! {
			_ = shutdown.changed() => break,
			accepted = tcp.accept() => {
				let (stream, peer_addr) = match accepted {
					Ok(t) => t,
					Err(e) => {
						warn!("accept error: {}", e);
						tokio::time::sleep(Duration::from_millis(100)).await;
						continue;
					}
				};

				let acceptor = acceptor.clone();
				let app = app.clone();
				tokio::spawn(async move {
					let _ = stream.set_nodelay(true);

					let tls_stream = match acceptor.accept(stream).await {
						Ok(s) => s,
						Err(e) => {
							warn!("TLS handshake failed ({}): {}", peer_addr, e);
							return;
						}
					};

					let service = TowerToHyperService::new(app);
					let io = TokioIo::new(tls_stream);
					let builder = AutoBuilder::new(TokioExecutor::new());
					if let Err(e) = builder.serve_connection(io, service).await {
						debug!("connection error ({}): {}", peer_addr, e);
					}
				});
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn manager() -> (ListenerManager, tempfile::TempDir) {
		let dir = tempfile::tempdir().unwrap();
		let store = Arc::new(MaterialStore::new(dir.path(), true));
		(ListenerManager::new(store, "kubectl"), dir)
	}

	fn config(id: &str, port: u16) -> ListenerConfig {
		serde_json::from_value(serde_json::json!({
			"serverId": id,
			"port": port,
		}))
		.unwrap()
	}

	fn free_port() -> u16 {
		std::net::TcpListener::bind(("127.0.0.1", 0))
			.unwrap()
			.local_addr()
			.unwrap()
			.port()
	}

	#[tokio::test]
	async fn duplicate_id_rejected() {
		let (mgr, _dir) = manager();
		let port = free_port();
		mgr.create_listener(config("dup", port)).await.unwrap();
		let err = mgr.create_listener(config("dup", free_port())).await.unwrap_err();
		assert!(matches!(err, Error::ListenerAlreadyExists(_)));
		mgr.shutdown().await;
	}

	#[tokio::test]
	async fn duplicate_port_rejected() {
		let (mgr, _dir) = manager();
		let port = free_port();
		mgr.create_listener(config("a", port)).await.unwrap();
		let err = mgr.create_listener(config("b", port)).await.unwrap_err();
		assert!(matches!(err, Error::ListenerCreation(_)));
		mgr.shutdown().await;
	}

	#[tokio::test]
	async fn release_unknown_id_is_error() {
		let (mgr, _dir) = manager();
		let err = mgr.release_listener("ghost").await.unwrap_err();
		assert!(matches!(err, Error::ListenerNotFound(_)));
	}

	#[tokio::test]
	async fn double_release_is_error() {
		let (mgr, _dir) = manager();
		let port = free_port();
		mgr.create_listener(config("once", port)).await.unwrap();
		mgr.release_listener("once").await.unwrap();
		let err = mgr.release_listener("once").await.unwrap_err();
		assert!(matches!(err, Error::ListenerNotFound(_)));
	}

	#[tokio::test]
	async fn released_port_can_be_rebound() {
		let (mgr, _dir) = manager();
		let port = free_port();
		mgr.create_listener(config("first", port)).await.unwrap();
		mgr.release_listener("first").await.unwrap();
		mgr.create_listener(config("second", port)).await.unwrap();
		mgr.shutdown().await;
	}

	#[tokio::test]
	async fn snapshot_reflects_config() {
		let (mgr, _dir) = manager();
		let port = free_port();
		let cfg: ListenerConfig = serde_json::from_value(serde_json::json!({
			"serverId": "snap",
			"port": port,
			"description": "demo",
			"basicAuthConfig": { "username": "u", "password": "p" },
		}))
		.unwrap();
		let snap = mgr.create_listener(cfg).await.unwrap();
		assert_eq!(snap.listener_id, "snap");
		assert_eq!(snap.port, port);
		assert_eq!(snap.description.as_deref(), Some("demo"));
		assert!(snap.basic_auth_enabled);
		assert!(!snap.tls_enabled);
		assert_eq!(snap.expectation_count, 0);
		mgr.shutdown().await;
	}

	#[tokio::test]
	async fn shutdown_is_idempotent() {
		let (mgr, _dir) = manager();
		mgr.create_listener(config("x", free_port())).await.unwrap();
		mgr.shutdown().await;
		mgr.shutdown().await;
		assert!(mgr.list().await.is_empty());
	}

	#[tokio::test]
	async fn invalid_tls_material_aborts_creation() {
		let (mgr, _dir) = manager();
		let cfg: ListenerConfig = serde_json::from_value(serde_json::json!({
			"serverId": "tls-bad",
			"port": free_port(),
			"tlsConfig": { "certificate": "nonsense", "privateKey": "nonsense" },
		}))
		.unwrap();
		let err = mgr.create_listener(cfg).await.unwrap_err();
		assert!(matches!(err, Error::InvalidCertificate(_)));
		assert!(mgr.list().await.is_empty());
	}
}
