use async_trait::async_trait;
use axum::body::Bytes;
use log::debug;

use crate::config::model::Expectation;
use crate::error::Result;
use crate::template::RequestContext;

use super::{HttpResponse, InboundRequest, ResponseStrategy};

/// Answers `sse=true` expectations with a single `text/event-stream`
/// body. Messages are batched; the configured interval is recorded but
/// never scheduled.
pub struct SseStrategy;

#[async_trait]
impl ResponseStrategy for SseStrategy {
	fn name(&self) -> &'static str {
		"sse"
	}

	fn priority(&self) -> i32 {
		20
	}

	fn supports(&self, expectation: &Expectation) -> bool {
		expectation.http_request.sse
			&& expectation
				.http_response
				.messages
				.as_ref()
				.is_some_and(|m| !m.is_empty())
	}

	async fn handle(
		&self,
		_request: &InboundRequest,
		expectation: &Expectation,
		_ctx: &RequestContext,
	) -> Result<HttpResponse> {
		let spec = &expectation.http_response;
		let messages = spec.messages.as_deref().unwrap_or_default();

		if let Some(interval) = spec.interval {
			debug!("sse interval {}ms recorded; messages are emitted in one batch", interval);
		}

		let mut body = String::new();
		for message in messages {
			body.push_str("data: ");
			body.push_str(message);
			body.push_str("\n\n");
		}

		let mut response = HttpResponse::new(spec.status())
			.with_header("Content-Type", "text/event-stream")
			.with_header("Cache-Control", "no-cache")
			.with_header("Connection", "keep-alive");
		if let Some(headers) = &spec.headers {
			for (name, value) in headers {
				if !response.has_header(name) {
					response.headers.push((name.clone(), value.clone()));
				}
			}
		}
		response.body = Bytes::from(body);
		Ok(response)
	}
}
