pub mod dynamic_file;
pub mod relay;
pub mod sse;
pub mod static_response;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method};

use crate::config::model::Expectation;
use crate::error::Result;
use crate::template::RequestContext;

pub use dynamic_file::FileTemplateStrategy;
pub use relay::{RelayStrategy, RuntimeRelayRule};
pub use sse::SseStrategy;
pub use static_response::StaticStrategy;

/// The pieces of an incoming request a strategy may need.
#[derive(Debug, Clone)]
pub struct InboundRequest {
	pub method: Method,
	pub path: String,
	pub query: Option<String>,
	pub headers: HeaderMap,
	pub body: Bytes,
}

/// A response under construction: status, ordered headers, opaque body.
#[derive(Debug, Clone)]
pub struct HttpResponse {
	pub status: u16,
	pub headers: Vec<(String, String)>,
	pub body: Bytes,
}

impl HttpResponse {
	pub fn new(status: u16) -> Self {
		Self {
			status,
			headers: Vec::new(),
			body: Bytes::new(),
		}
	}

	pub fn text(status: u16, body: impl Into<String>) -> Self {
		Self {
			status,
			headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
			body: Bytes::from(body.into()),
		}
	}

	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}

	pub fn has_header(&self, name: &str) -> bool {
		self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
	}
}

/// One response strategy. The dispatcher asks every registered strategy
/// whether it supports the matched expectation and hands the request to
/// the highest-priority claimant.
#[async_trait]
pub trait ResponseStrategy: Send + Sync {
	fn name(&self) -> &'static str;

	fn priority(&self) -> i32;

	fn supports(&self, expectation: &Expectation) -> bool;

	async fn handle(
		&self,
		request: &InboundRequest,
		expectation: &Expectation,
		ctx: &RequestContext,
	) -> Result<HttpResponse>;
}

/// Assemble the strategy list for a listener, sorted by descending
/// priority. The relay strategy is present only on relay-enabled
/// listeners.
pub fn build_strategies(relay: Option<RelayStrategy>) -> Vec<Arc<dyn ResponseStrategy>> {
	let mut strategies: Vec<Arc<dyn ResponseStrategy>> = vec![
		Arc::new(StaticStrategy),
		Arc::new(FileTemplateStrategy),
		Arc::new(SseStrategy),
	];
	if let Some(r) = relay {
		strategies.push(Arc::new(r));
	}
	strategies.sort_by_key(|s| std::cmp::Reverse(s.priority()));
	strategies
}
