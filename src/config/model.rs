use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One entry of the top-level config array: a listener definition plus the
/// expectations seeded into it at boot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
	pub server: ListenerConfig,
	#[serde(default)]
	pub expectations: Vec<Expectation>,
}

/// Immutable definition of one listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerConfig {
	pub server_id: String,
	pub port: u16,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub tls_config: Option<TlsConfig>,
	#[serde(default)]
	pub global_headers: Option<Vec<HeaderPair>>,
	#[serde(default)]
	pub basic_auth_config: Option<BasicAuthConfig>,
	#[serde(default)]
	pub relays: Option<Vec<RelayRule>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
	pub certificate: String,
	pub private_key: String,
	#[serde(default)]
	pub mtls_config: Option<MtlsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MtlsConfig {
	pub ca_certificate: String,
	#[serde(default = "default_true")]
	pub require_client_auth: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthConfig {
	pub username: String,
	pub password: String,
}

/// Ordered name/value pair; global headers keep their configured order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderPair {
	pub name: String,
	pub value: String,
}

/// A relay policy: forward matching requests to an origin, possibly via a
/// port-forward tunnel and/or with an OAuth2 bearer token attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRule {
	#[serde(default)]
	pub remote_url: Option<String>,
	#[serde(default = "default_prefixes")]
	pub prefixes: Vec<String>,
	#[serde(default)]
	pub token_url: Option<String>,
	#[serde(default)]
	pub client_id: Option<String>,
	#[serde(default)]
	pub client_secret: Option<String>,
	#[serde(default)]
	pub scope: Option<String>,
	#[serde(default = "default_grant_type")]
	pub grant_type: String,
	#[serde(default)]
	pub headers: Option<BTreeMap<String, String>>,
	#[serde(default)]
	pub tunnel_config: Option<TunnelConfig>,
	#[serde(default)]
	pub ignore_ssl_errors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfig {
	pub namespace: String,
	pub pod_prefix: String,
	pub pod_port: u16,
}

/// A pairing of request matcher and response specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
	pub http_request: RequestSpec,
	pub http_response: ResponseSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
	#[serde(default)]
	pub method: Option<String>,
	pub path: String,
	#[serde(default)]
	pub sse: bool,
	#[serde(default)]
	pub headers: Option<BTreeMap<String, String>>,
	#[serde(default)]
	pub query_parameters: Option<BTreeMap<String, String>>,
	#[serde(default)]
	pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
	#[serde(default)]
	pub status_code: Option<u16>,
	#[serde(default)]
	pub headers: Option<BTreeMap<String, String>>,
	#[serde(default)]
	pub body: Option<serde_json::Value>,
	#[serde(default)]
	pub file: Option<String>,
	#[serde(default)]
	pub messages: Option<Vec<String>>,
	/// Informational only; SSE bodies are emitted in one batch.
	#[serde(default)]
	pub interval: Option<u64>,
}

impl ResponseSpec {
	/// The response body as text: strings verbatim, any other JSON value
	/// serialized compactly.
	pub fn body_text(&self) -> Option<String> {
		match &self.body {
			None => None,
			Some(serde_json::Value::String(s)) => Some(s.clone()),
			Some(other) => Some(other.to_string()),
		}
	}

	pub fn status(&self) -> u16 {
		self.status_code.unwrap_or(200)
	}
}

fn default_true() -> bool {
	true
}

fn default_prefixes() -> Vec<String> {
	vec!["/**".to_string()]
}

fn default_grant_type() -> String {
	"client_credentials".to_string()
}

impl ListenerConfig {
	pub fn validate(&self) -> Result<()> {
		if self.server_id.trim().is_empty() {
			return Err(Error::ListenerCreation("serverId must not be empty".to_string()));
		}
		if self.port < 1024 {
			return Err(Error::ListenerCreation(format!(
				"port {} is outside the allowed range 1024-65535",
				self.port
			)));
		}
		if let Some(relays) = &self.relays {
			for (i, rule) in relays.iter().enumerate() {
				rule.validate().map_err(|e| {
					Error::ListenerCreation(format!("relay rule {}: {}", i, e))
				})?;
			}
		}
		Ok(())
	}
}

impl RelayRule {
	pub fn validate(&self) -> Result<()> {
		let tunnel_ok = self
			.tunnel_config
			.as_ref()
			.is_some_and(|t| !t.namespace.is_empty() && !t.pod_prefix.is_empty());
		match &self.remote_url {
			Some(u) => {
				url::Url::parse(u).map_err(|e| {
					Error::ListenerCreation(format!("invalid remoteUrl '{}': {}", u, e))
				})?;
			}
			None => {
				if !tunnel_ok {
					return Err(Error::ListenerCreation(
						"relay rule needs a remoteUrl or a fully-specified tunnelConfig".to_string(),
					));
				}
			}
		}

		let oauth_fields = [&self.token_url, &self.client_id, &self.client_secret];
		let present = oauth_fields.iter().filter(|f| f.is_some()).count();
		if present != 0 && present != 3 {
			return Err(Error::ListenerCreation(
				"OAuth2 relay config requires tokenUrl, clientId and clientSecret together".to_string(),
			));
		}
		Ok(())
	}

	pub fn oauth_enabled(&self) -> bool {
		self.token_url.is_some() && self.client_id.is_some() && self.client_secret.is_some()
	}
}

impl Expectation {
	pub fn validate(&self) -> Result<()> {
		if !self.http_request.path.starts_with('/') {
			return Err(Error::InvalidExpectation(format!(
				"path '{}' must start with '/'",
				self.http_request.path
			)));
		}
		Ok(())
	}

	/// Expectations overwrite each other on the exact (method, path) pair.
	pub fn same_route(&self, other: &Expectation) -> bool {
		let m = |e: &Expectation| e.http_request.method.as_deref().map(str::to_ascii_uppercase);
		m(self) == m(other) && self.http_request.path == other.http_request.path
	}
}
