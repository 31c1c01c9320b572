#![allow(dead_code)]

use std::sync::Arc;

use vanopticon_loki::config::model::{Expectation, ListenerConfig};
use vanopticon_loki::listener::ListenerManager;
use vanopticon_loki::tls::MaterialStore;

/// Bind-and-release probe for a port the OS considers free right now.
pub fn free_port() -> u16 {
	std::net::TcpListener::bind(("127.0.0.1", 0))
		.unwrap()
		.local_addr()
		.unwrap()
		.port()
}

pub fn manager_in(scratch: &std::path::Path) -> ListenerManager {
	let store = Arc::new(MaterialStore::new(scratch, true));
	ListenerManager::new(store, "kubectl")
}

pub fn listener_config(raw: serde_json::Value) -> ListenerConfig {
	serde_json::from_value(raw).expect("listener config fixture")
}

pub fn expectation(raw: serde_json::Value) -> Expectation {
	serde_json::from_value(raw).expect("expectation fixture")
}

pub fn http_client() -> reqwest::Client {
	reqwest::Client::builder()
		.timeout(std::time::Duration::from_secs(5))
		.build()
		.unwrap()
}

/// Client that accepts the self-signed certificates the TLS tests mint.
pub fn insecure_https_client() -> reqwest::Client {
	reqwest::Client::builder()
		.timeout(std::time::Duration::from_secs(5))
		.danger_accept_invalid_certs(true)
		.build()
		.unwrap()
}
