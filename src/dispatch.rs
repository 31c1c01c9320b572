use std::sync::{Arc, RwLock};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::Response;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, warn};

use crate::config::model::{Expectation, HeaderPair, RequestSpec, ResponseSpec};
use crate::error::Result;
use crate::matching;
use crate::strategy::{HttpResponse, InboundRequest, ResponseStrategy};
use crate::template::RequestContext;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Per-listener state the dispatch callback works against. The manager
/// holds a reference for lookup but all mutation goes through the
/// methods here.
pub struct ListenerCore {
	pub listener_id: String,
	pub basic_auth: Option<(String, String)>,
	pub global_headers: Vec<HeaderPair>,
	pub relay_enabled: bool,
	pub expectations: RwLock<Vec<Expectation>>,
	pub strategies: Vec<Arc<dyn ResponseStrategy>>,
}

impl ListenerCore {
	/// Append an expectation, first removing prior entries on the same
	/// `(method, path)` pair so the latest definition wins.
	pub fn add_expectation(&self, expectation: Expectation) -> Result<()> {
		expectation.validate()?;
		let mut list = self.expectations.write().expect("expectation lock poisoned");
		list.retain(|e| !e.same_route(&expectation));
		list.push(expectation);
		Ok(())
	}

	pub fn clear_expectations(&self) {
		self.expectations
			.write()
			.expect("expectation lock poisoned")
			.clear();
	}

	pub fn expectation_count(&self) -> usize {
		self.expectations
			.read()
			.expect("expectation lock poisoned")
			.len()
	}

	/// Consistent snapshot for one request; appends and clears running
	/// concurrently are not observed mid-match.
	fn snapshot(&self) -> Vec<Expectation> {
		self.expectations
			.read()
			.expect("expectation lock poisoned")
			.clone()
	}
}

/// Placeholder handed to the relay strategy, which ignores expectations.
fn relay_placeholder() -> Expectation {
	Expectation {
		http_request: RequestSpec {
			method: None,
			path: "/".to_string(),
			sse: false,
			headers: None,
			query_parameters: None,
			body: None,
		},
		http_response: ResponseSpec {
			status_code: None,
			headers: None,
			body: None,
			file: None,
			messages: None,
			interval: None,
		},
	}
}

/// The per-request callback: auth gate, expectation match, context
/// build, strategy selection, global-header merge.
pub async fn dispatch(State(core): State<Arc<ListenerCore>>, request: Request) -> Response {
	// 1. Basic-auth gate.
	if let Some((username, password)) = &core.basic_auth {
		let expected = format!("Basic {}", BASE64.encode(format!("{}:{}", username, password)));
		let presented = request
			.headers()
			.get(header::AUTHORIZATION)
			.and_then(|v| v.to_str().ok());
		if presented != Some(expected.as_str()) {
			let mut response = HttpResponse::new(401);
			response
				.headers
				.push(("WWW-Authenticate".to_string(), "Basic realm=\"loki\"".to_string()));
			return into_axum(merge_global_headers(response, &core.global_headers));
		}
	}

	let (parts, body) = request.into_parts();
	let path = parts.uri.path().to_string();
	let query = parts.uri.query().map(str::to_string);

	let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
		Ok(b) => b,
		Err(e) => {
			warn!("listener {}: failed to read request body: {}", core.listener_id, e);
			return into_axum(HttpResponse::text(400, "failed to read request body"));
		}
	};

	// 2. Expectation match. Relay-enabled listeners skip it entirely;
	// the relay strategy claims every request.
	let (expectation, path_variables) = if core.relay_enabled {
		(relay_placeholder(), Default::default())
	} else {
		let matched = core.snapshot().into_iter().find_map(|e| {
			matching::request_matches(&e.http_request, &parts.method, &path, query.as_deref(), &parts.headers, &body)
				.map(|vars| (e, vars))
		});
		match matched {
			Some(m) => m,
			None => {
				debug!("listener {}: no expectation matched {} {}", core.listener_id, parts.method, path);
				let response = HttpResponse::text(
					404,
					format!("No expectation matched for {} {}", parts.method, path),
				);
				return into_axum(merge_global_headers(response, &core.global_headers));
			}
		}
	};

	// 3. Request context and strategy selection.
	let ctx = RequestContext::new(&parts.headers, &body, path_variables);
	let inbound = InboundRequest {
		method: parts.method.clone(),
		path,
		query,
		headers: parts.headers.clone(),
		body,
	};

	let Some(strategy) = core.strategies.iter().find(|s| s.supports(&expectation)) else {
		// The static strategy claims everything, so this is a corrupt
		// expectation, not a routine miss.
		warn!("listener {}: no strategy found for expectation", core.listener_id);
		return into_axum(merge_global_headers(
			HttpResponse::text(500, "No strategy found for configuration"),
			&core.global_headers,
		));
	};

	debug!(
		"listener {}: {} {} handled by '{}'",
		core.listener_id,
		inbound.method,
		inbound.path,
		strategy.name()
	);

	// 4. Invoke; any error becomes a JSON 500 envelope.
	let response = match strategy.handle(&inbound, &expectation, &ctx).await {
		Ok(r) => r,
		Err(e) => {
			warn!("listener {}: strategy '{}' failed: {}", core.listener_id, strategy.name(), e);
			let envelope = serde_json::json!({
				"errorCode": "CALLBACK_ERROR",
				"message": e.to_string(),
			});
			HttpResponse {
				status: 500,
				headers: vec![("Content-Type".to_string(), "application/json".to_string())],
				body: envelope.to_string().into(),
			}
		}
	};

	// 5. Global headers fill the gaps the response left open.
	into_axum(merge_global_headers(response, &core.global_headers))
}

/// Expectation headers win; global headers are added only for names the
/// response does not already carry. No other headers are introduced.
fn merge_global_headers(mut response: HttpResponse, globals: &[HeaderPair]) -> HttpResponse {
	for g in globals {
		if !response.has_header(&g.name) {
			response.headers.push((g.name.clone(), g.value.clone()));
		}
	}
	response
}

fn into_axum(response: HttpResponse) -> Response {
	let status =
		StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
	let mut builder = Response::builder().status(status);
	for (name, value) in &response.headers {
		if let (Ok(n), Ok(v)) = (
			HeaderName::from_bytes(name.as_bytes()),
			HeaderValue::from_str(value),
		) {
			builder = builder.header(n, v);
		}
	}
	builder
		.body(Body::from(response.body))
		.unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::Error;
	use crate::strategy;
	use async_trait::async_trait;

	fn core_with(
		expectations: Vec<Expectation>,
		basic_auth: Option<(String, String)>,
		global_headers: Vec<HeaderPair>,
	) -> Arc<ListenerCore> {
		Arc::new(ListenerCore {
			listener_id: "test".to_string(),
			basic_auth,
			global_headers,
			relay_enabled: false,
			expectations: RwLock::new(expectations),
			strategies: strategy::build_strategies(None),
		})
	}

	fn expectation(raw: serde_json::Value) -> Expectation {
		serde_json::from_value(raw).unwrap()
	}

	fn get(path: &str) -> Request {
		Request::builder()
			.method("GET")
			.uri(path)
			.body(Body::empty())
			.unwrap()
	}

	async fn body_of(response: Response) -> String {
		let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
		String::from_utf8_lossy(&bytes).to_string()
	}

	#[tokio::test]
	async fn static_with_global_headers() {
		let core = core_with(
			vec![expectation(serde_json::json!({
				"httpRequest": { "method": "GET", "path": "/a" },
				"httpResponse": {
					"statusCode": 200,
					"headers": { "Content-Type": "text/plain" },
					"body": "ok"
				}
			}))],
			None,
			vec![HeaderPair {
				name: "X-Env".to_string(),
				value: "test".to_string(),
			}],
		);

		let response = dispatch(State(core), get("/a")).await;
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(response.headers()["Content-Type"], "text/plain");
		assert_eq!(response.headers()["X-Env"], "test");
		assert_eq!(body_of(response).await, "ok");
	}

	#[tokio::test]
	async fn expectation_header_beats_global() {
		let core = core_with(
			vec![expectation(serde_json::json!({
				"httpRequest": { "method": "GET", "path": "/a" },
				"httpResponse": { "headers": { "X-Env": "from-expectation" } }
			}))],
			None,
			vec![HeaderPair {
				name: "X-Env".to_string(),
				value: "from-global".to_string(),
			}],
		);
		let response = dispatch(State(core), get("/a")).await;
		let values: Vec<_> = response.headers().get_all("X-Env").iter().collect();
		assert_eq!(values.len(), 1);
		assert_eq!(values[0], "from-expectation");
	}

	#[tokio::test]
	async fn template_body_with_path_variable_and_header() {
		let core = core_with(
			vec![expectation(serde_json::json!({
				"httpRequest": { "method": "GET", "path": "/users/{id}" },
				"httpResponse": { "body": "Hello ${pathVariables.id} / ${headers['X-Who']}" }
			}))],
			None,
			vec![],
		);
		let request = Request::builder()
			.method("GET")
			.uri("/users/42")
			.header("X-Who", "ada")
			.body(Body::empty())
			.unwrap();
		let response = dispatch(State(core), request).await;
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(body_of(response).await, "Hello 42 / ada");
	}

	#[tokio::test]
	async fn no_match_is_404() {
		let core = core_with(vec![], None, vec![]);
		let response = dispatch(State(core), get("/missing")).await;
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
		assert!(body_of(response).await.contains("GET /missing"));
	}

	#[tokio::test]
	async fn basic_auth_rejects_bad_credentials() {
		let core = core_with(
			vec![expectation(serde_json::json!({
				"httpRequest": { "method": "GET", "path": "/a" },
				"httpResponse": { "body": "ok" }
			}))],
			Some(("user".to_string(), "pass".to_string())),
			vec![],
		);

		let response = dispatch(State(core.clone()), get("/a")).await;
		assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
		assert!(
			response.headers()["WWW-Authenticate"]
				.to_str()
				.unwrap()
				.starts_with("Basic")
		);

		let authed = Request::builder()
			.method("GET")
			.uri("/a")
			.header("Authorization", format!("Basic {}", BASE64.encode("user:pass")))
			.body(Body::empty())
			.unwrap();
		let response = dispatch(State(core), authed).await;
		assert_eq!(response.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn sse_expectation_batches() {
		let core = core_with(
			vec![expectation(serde_json::json!({
				"httpRequest": { "method": "GET", "path": "/stream", "sse": true },
				"httpResponse": { "messages": ["a", "b", "c"] }
			}))],
			None,
			vec![],
		);
		let response = dispatch(State(core), get("/stream")).await;
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(response.headers()["Content-Type"], "text/event-stream");
		assert_eq!(body_of(response).await, "data: a\n\ndata: b\n\ndata: c\n\n");
	}

	#[tokio::test]
	async fn add_expectation_overwrites_same_route() {
		let core = core_with(vec![], None, vec![]);
		core.add_expectation(expectation(serde_json::json!({
			"httpRequest": { "method": "GET", "path": "/a" },
			"httpResponse": { "body": "first" }
		})))
		.unwrap();
		core.add_expectation(expectation(serde_json::json!({
			"httpRequest": { "method": "GET", "path": "/b" },
			"httpResponse": { "body": "other" }
		})))
		.unwrap();
		core.add_expectation(expectation(serde_json::json!({
			"httpRequest": { "method": "GET", "path": "/a" },
			"httpResponse": { "body": "second" }
		})))
		.unwrap();
		assert_eq!(core.expectation_count(), 2);

		let response = dispatch(State(core), get("/a")).await;
		assert_eq!(body_of(response).await, "second");
	}

	struct FailingStrategy;

	#[async_trait]
	impl ResponseStrategy for FailingStrategy {
		fn name(&self) -> &'static str {
			"failing"
		}
		fn priority(&self) -> i32 {
			99
		}
		fn supports(&self, _expectation: &Expectation) -> bool {
			true
		}
		async fn handle(
			&self,
			_request: &InboundRequest,
			_expectation: &Expectation,
			_ctx: &RequestContext,
		) -> crate::error::Result<HttpResponse> {
			Err(Error::Template("boom".to_string()))
		}
	}

	#[tokio::test]
	async fn strategy_error_becomes_callback_envelope() {
		let core = Arc::new(ListenerCore {
			listener_id: "test".to_string(),
			basic_auth: None,
			global_headers: vec![],
			relay_enabled: false,
			expectations: RwLock::new(vec![expectation(serde_json::json!({
				"httpRequest": { "method": "GET", "path": "/a" },
				"httpResponse": {}
			}))]),
			strategies: vec![Arc::new(FailingStrategy)],
		});
		let response = dispatch(State(core), get("/a")).await;
		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(response.headers()["Content-Type"], "application/json");
		let body = body_of(response).await;
		let v: serde_json::Value = serde_json::from_str(&body).unwrap();
		assert_eq!(v["errorCode"], "CALLBACK_ERROR");
		assert!(v["message"].as_str().unwrap().contains("boom"));
	}
}
