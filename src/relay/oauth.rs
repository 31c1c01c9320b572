use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use log::debug;
use serde::Deserialize;

use crate::config::model::RelayRule;
use crate::error::{Error, Result};

/// Fixed cache lifetime; the issuer's `expires_in` is ignored.
const TOKEN_LIFETIME: Duration = Duration::from_secs(3300);
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
	access_token: String,
}

struct CacheEntry {
	token: String,
	expires_at: Instant,
}

/// Client-credentials token cache keyed by `tokenUrl:clientId`.
///
/// Concurrent fetches for the same key may race; cache writes are atomic
/// and the last writer wins.
pub struct TokenCache {
	client: reqwest::Client,
	entries: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for TokenCache {
	fn default() -> Self {
		Self::new()
	}
}

impl TokenCache {
	pub fn new() -> Self {
		let client = reqwest::Client::builder()
			.timeout(FETCH_TIMEOUT)
			.build()
			.expect("failed to build HTTP client for OAuth2");
		Self {
			client,
			entries: RwLock::new(HashMap::new()),
		}
	}

	/// Return a bearer token for the rule, fetching one when the cache has
	/// no live entry.
	pub async fn access_token(&self, rule: &RelayRule) -> Result<String> {
		let (Some(token_url), Some(client_id), Some(client_secret)) =
			(&rule.token_url, &rule.client_id, &rule.client_secret)
		else {
			return Err(Error::TokenAcquisition(
				"relay rule has no OAuth2 configuration".to_string(),
			));
		};

		let key = cache_key(token_url, client_id);
		if let Some(token) = self.cached(&key) {
			debug!("token cache hit for {}", key);
			return Ok(token);
		}

		let mut form: Vec<(&str, &str)> = vec![
			("grant_type", rule.grant_type.as_str()),
			("client_id", client_id.as_str()),
			("client_secret", client_secret.as_str()),
		];
		if let Some(scope) = &rule.scope {
			form.push(("scope", scope.as_str()));
		}

		let resp = self
			.client
			.post(token_url)
			.form(&form)
			.send()
			.await
			.map_err(|e| Error::TokenAcquisition(format!("POST {} failed: {}", token_url, e)))?;

		let status = resp.status();
		if status.as_u16() != 200 {
			return Err(Error::TokenAcquisition(format!(
				"token endpoint {} returned {}",
				token_url, status
			)));
		}

		let body: TokenResponse = resp.json().await.map_err(|e| {
			Error::TokenAcquisition(format!("token endpoint {} returned non-JSON body: {}", token_url, e))
		})?;

		let mut entries = self.entries.write().expect("token cache lock poisoned");
		entries.insert(
			key,
			CacheEntry {
				token: body.access_token.clone(),
				expires_at: Instant::now() + TOKEN_LIFETIME,
			},
		);
		Ok(body.access_token)
	}

	fn cached(&self, key: &str) -> Option<String> {
		let entries = self.entries.read().expect("token cache lock poisoned");
		entries
			.get(key)
			.filter(|e| Instant::now() < e.expires_at)
			.map(|e| e.token.clone())
	}

	#[cfg(test)]
	fn seed(&self, key: &str, token: &str, expires_at: Instant) {
		self.entries.write().unwrap().insert(
			key.to_string(),
			CacheEntry {
				token: token.to_string(),
				expires_at,
			},
		);
	}
}

fn cache_key(token_url: &str, client_id: &str) -> String {
	format!("{}:{}", token_url, client_id)
}
