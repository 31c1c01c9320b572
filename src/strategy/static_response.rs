use async_trait::async_trait;
use axum::body::Bytes;

use crate::config::model::Expectation;
use crate::error::Result;
use crate::template::RequestContext;

use super::{HttpResponse, InboundRequest, ResponseStrategy};

/// Fallback strategy: answers with the expectation's configured status,
/// headers and body verbatim. Always registered, claims anything no
/// higher-priority strategy wants.
pub struct StaticStrategy;

#[async_trait]
impl ResponseStrategy for StaticStrategy {
	fn name(&self) -> &'static str {
		"static"
	}

	fn priority(&self) -> i32 {
		0
	}

	fn supports(&self, _expectation: &Expectation) -> bool {
		true
	}

	async fn handle(
		&self,
		_request: &InboundRequest,
		expectation: &Expectation,
		_ctx: &RequestContext,
	) -> Result<HttpResponse> {
		let spec = &expectation.http_response;
		let mut response = HttpResponse::new(spec.status());
		if let Some(headers) = &spec.headers {
			for (name, value) in headers {
				response.headers.push((name.clone(), value.clone()));
			}
		}
		if let Some(body) = spec.body_text() {
			response.body = Bytes::from(body);
		}
		Ok(response)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::{HeaderMap, Method};
	use std::collections::BTreeMap;

	fn request() -> InboundRequest {
		InboundRequest {
			method: Method::GET,
			path: "/a".to_string(),
			query: None,
			headers: HeaderMap::new(),
			body: Bytes::new(),
		}
	}

	fn ctx() -> RequestContext {
		RequestContext::new(&HeaderMap::new(), b"", BTreeMap::new())
	}

	#[tokio::test]
	async fn returns_configured_response_verbatim() {
		let exp: Expectation = serde_json::from_value(serde_json::json!({
			"httpRequest": { "method": "GET", "path": "/a" },
			"httpResponse": {
				"statusCode": 203,
				"headers": { "Content-Type": "text/plain" },
				"body": "ok"
			}
		}))
		.unwrap();

		let s = StaticStrategy;
		assert!(s.supports(&exp));
		let r = s.handle(&request(), &exp, &ctx()).await.unwrap();
		assert_eq!(r.status, 203);
		assert_eq!(r.body.as_ref(), b"ok");
		assert!(r.has_header("Content-Type"));
	}

	#[tokio::test]
	async fn empty_response_defaults_to_200() {
		let exp: Expectation = serde_json::from_value(serde_json::json!({
			"httpRequest": { "path": "/a" },
			"httpResponse": {}
		}))
		.unwrap();
		let r = StaticStrategy.handle(&request(), &exp, &ctx()).await.unwrap();
		assert_eq!(r.status, 200);
		assert!(r.body.is_empty());
	}
}
