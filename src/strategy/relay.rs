use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use log::{debug, warn};

use crate::config::model::{Expectation, RelayRule};
use crate::error::{Error, Result};
use crate::matching::{self, PrefixGlob};
use crate::relay::TokenCache;
use crate::template::RequestContext;

use super::{HttpResponse, InboundRequest, ResponseStrategy};

const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Inbound request headers never forwarded upstream.
const HOP_HEADERS: [&str; 4] = ["host", "content-length", "connection", "upgrade"];

/// Upstream response headers that describe the dead upstream framing and
/// are re-derived by the inbound serving stack.
const FRAMING_HEADERS: [&str; 3] = ["connection", "transfer-encoding", "content-length"];

/// A relay rule resolved at listener creation: compiled prefix globs and
/// the tunnel host port, assigned exactly once and never mutated after.
pub struct RuntimeRelayRule {
	pub rule: RelayRule,
	pub assigned_host_port: Option<u16>,
	globs: Vec<PrefixGlob>,
}

impl RuntimeRelayRule {
	pub fn new(rule: RelayRule, assigned_host_port: Option<u16>) -> Result<Self> {
		let globs = rule
			.prefixes
			.iter()
			.map(|p| PrefixGlob::compile(p))
			.collect::<Result<Vec<_>>>()?;
		Ok(Self {
			rule,
			assigned_host_port,
			globs,
		})
	}

	fn match_score(&self, path: &str) -> Option<usize> {
		matching::best_score(&self.globs, path)
	}
}

/// Forwards every request on a relay-enabled listener to the
/// longest-prefix-matching rule's origin.
pub struct RelayStrategy {
	rules: Vec<RuntimeRelayRule>,
	oauth: Arc<TokenCache>,
	client: reqwest::Client,
	insecure_client: reqwest::Client,
}

impl RelayStrategy {
	pub fn new(rules: Vec<RuntimeRelayRule>, oauth: Arc<TokenCache>) -> Self {
		let client = reqwest::Client::builder()
			.timeout(RELAY_TIMEOUT)
			.build()
			.expect("failed to build relay HTTP client");
		// ignoreSSLErrors is scoped to the outbound call only.
		let insecure_client = reqwest::Client::builder()
			.timeout(RELAY_TIMEOUT)
			.danger_accept_invalid_certs(true)
			.build()
			.expect("failed to build relay HTTP client");
		Self {
			rules,
			oauth,
			client,
			insecure_client,
		}
	}

	/// Longest literal prefix wins; ties go to the earlier rule.
	fn select(&self, path: &str) -> Option<&RuntimeRelayRule> {
		let mut best: Option<(&RuntimeRelayRule, usize)> = None;
		for rule in &self.rules {
			if let Some(score) = rule.match_score(path) {
				if best.map(|(_, b)| score > b).unwrap_or(true) {
					best = Some((rule, score));
				}
			}
		}
		best.map(|(r, _)| r)
	}
}

#[async_trait]
impl ResponseStrategy for RelayStrategy {
	fn name(&self) -> &'static str {
		"relay"
	}

	fn priority(&self) -> i32 {
		30
	}

	// On a relay-enabled listener every request is relayed; expectations
	// are not consulted.
	fn supports(&self, _expectation: &Expectation) -> bool {
		true
	}

	async fn handle(
		&self,
		request: &InboundRequest,
		_expectation: &Expectation,
		_ctx: &RequestContext,
	) -> Result<HttpResponse> {
		let Some(selected) = self.select(&request.path) else {
			return Ok(HttpResponse::text(502, "No matching relay"));
		};

		let url = target_url(selected, &request.path, request.query.as_deref());
		debug!("relaying {} {} -> {}", request.method, request.path, url);

		let client = if selected.rule.ignore_ssl_errors {
			&self.insecure_client
		} else {
			&self.client
		};

		let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
			.map_err(|e| Error::RelayTransport(format!("unsupported method: {}", e)))?;

		let mut headers = reqwest::header::HeaderMap::new();
		for (name, value) in &request.headers {
			if HOP_HEADERS.iter().any(|h| name.as_str().eq_ignore_ascii_case(h)) {
				continue;
			}
			if let (Ok(n), Ok(v)) = (
				reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
				reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
			) {
				headers.append(n, v);
			}
		}
		if let Some(extra) = &selected.rule.headers {
			for (name, value) in extra {
				if let (Ok(n), Ok(v)) = (
					reqwest::header::HeaderName::from_bytes(name.as_bytes()),
					reqwest::header::HeaderValue::from_str(value),
				) {
					headers.insert(n, v);
				}
			}
		}
		if selected.rule.oauth_enabled() {
			match self.oauth.access_token(&selected.rule).await {
				Ok(token) => {
					let bearer = format!("Bearer {}", token);
					if let Ok(v) = reqwest::header::HeaderValue::from_str(&bearer) {
						headers.insert(reqwest::header::AUTHORIZATION, v);
					}
				}
				Err(e) => {
					warn!("token acquisition for relay failed: {}", e);
					return Ok(HttpResponse::text(
						502,
						format!("Error relaying request to remote server: {}", e),
					));
				}
			}
		}

		let mut outbound = client.request(method, url.as_str()).headers(headers);
		if method_carries_body(&request.method) {
			outbound = outbound.body(request.body.clone());
		}

		let upstream = match outbound.send().await {
			Ok(r) => r,
			Err(e) => {
				warn!("relay to {} failed: {}", url, e);
				return Ok(HttpResponse::text(
					502,
					format!("Error relaying request to remote server: {}", e),
				));
			}
		};

		let status = upstream.status().as_u16();
		let mut response = HttpResponse::new(status);
		for (name, value) in upstream.headers() {
			if FRAMING_HEADERS.iter().any(|h| name.as_str().eq_ignore_ascii_case(h)) {
				continue;
			}
			if let Ok(v) = value.to_str() {
				response.headers.push((name.as_str().to_string(), v.to_string()));
			}
		}
		match upstream.bytes().await {
			Ok(body) => {
				response.body = body;
				Ok(response)
			}
			Err(e) => Ok(HttpResponse::text(
				502,
				format!("Error relaying request to remote server: {}", e),
			)),
		}
	}
}

/// Compose the upstream URL: tunnel target when assigned, remote URL
/// otherwise; path appended with exactly one joining slash, query string
/// carried verbatim.
fn target_url(rule: &RuntimeRelayRule, path: &str, query: Option<&str>) -> String {
	let base = match rule.assigned_host_port {
		Some(port) => format!("http://localhost:{}", port),
		None => rule.rule.remote_url.clone().unwrap_or_default(),
	};
	let base = base.trim_end_matches('/');
	let path = if path.starts_with('/') {
		path.to_string()
	} else {
		format!("/{}", path)
	};
	match query {
		Some(q) if !q.is_empty() => format!("{}{}?{}", base, path, q),
		_ => format!("{}{}", base, path),
	}
}

fn method_carries_body(method: &axum::http::Method) -> bool {
	!matches!(
		*method,
		axum::http::Method::GET
			| axum::http::Method::HEAD
			| axum::http::Method::OPTIONS
			| axum::http::Method::TRACE
			| axum::http::Method::CONNECT
	)
}
