use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use axum::http::HeaderMap;
use minijinja::syntax::SyntaxConfig;
use minijinja::value::{Object, Value};
use minijinja::{Environment, UndefinedBehavior};

use crate::error::{Error, Result};

/// Substrings whose presence marks a response body as a template.
const TEMPLATE_MARKERS: [&str; 5] = ["${", "<#", "[#", "<@", "[@"];

/// Cheap detector used by the dynamic strategy to claim expectations.
pub fn looks_like_template(s: &str) -> bool {
	TEMPLATE_MARKERS.iter().any(|m| s.contains(m))
}

/// The data tree templates render against, built once per request.
#[derive(Debug, Clone)]
pub struct RequestContext {
	pub headers: Vec<(String, String)>,
	pub body: serde_json::Value,
	pub cookies: BTreeMap<String, String>,
	pub path_variables: BTreeMap<String, String>,
}

impl RequestContext {
	/// Build the context from the raw request pieces. The body is parsed
	/// as JSON; anything else (including an empty body) becomes an empty
	/// object. For repeated header names only the first value is exposed.
	pub fn new(headers: &HeaderMap, body: &[u8], path_variables: BTreeMap<String, String>) -> Self {
		let mut first_values: Vec<(String, String)> = Vec::new();
		for (name, value) in headers {
			if first_values.iter().any(|(n, _)| n == name.as_str()) {
				continue;
			}
			if let Ok(v) = value.to_str() {
				first_values.push((name.as_str().to_string(), v.to_string()));
			}
		}

		let body = serde_json::from_slice(body).unwrap_or_else(|_| serde_json::json!({}));

		let mut cookies = BTreeMap::new();
		for value in headers.get_all(axum::http::header::COOKIE) {
			let Ok(raw) = value.to_str() else { continue };
			for pair in raw.split(';') {
				if let Some((k, v)) = pair.split_once('=') {
					cookies.insert(k.trim().to_string(), v.trim().to_string());
				}
			}
		}

		Self {
			headers: first_values,
			body,
			cookies,
			path_variables,
		}
	}

	/// First value of a header, matched case-insensitively.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(n, _)| n.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}
}

/// Header lookup object: the HTTP layer normalizes header names to
/// lowercase, so `${headers['X-Who']}` must resolve case-insensitively.
#[derive(Debug)]
struct HeaderTree {
	entries: Vec<(String, String)>,
}

impl Object for HeaderTree {
	fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
		let wanted = key.as_str()?;
		self.entries
			.iter()
			.find(|(n, _)| n.eq_ignore_ascii_case(wanted))
			.map(|(_, v)| Value::from(v.as_str()))
	}
}

fn environment() -> &'static Environment<'static> {
	static ENV: OnceLock<Environment<'static>> = OnceLock::new();
	ENV.get_or_init(|| {
		let syntax = SyntaxConfig::builder()
			.block_delimiters("<#", "#>")
			.variable_delimiters("${", "}")
			.comment_delimiters("<#--", "--#>")
			.build()
			.expect("template syntax configuration is invalid");
		let mut env = Environment::new();
		env.set_syntax(syntax);
		env.set_undefined_behavior(UndefinedBehavior::Strict);
		env
	})
}

/// Render `source` against the request context. Syntax errors and missing
/// keys both surface as `Error::Template`.
pub fn render(source: &str, ctx: &RequestContext) -> Result<String> {
	let data = minijinja::context! {
		headers => Value::from_object(HeaderTree {
			entries: ctx.headers.clone(),
		}),
		body => Value::from_serialize(&ctx.body),
		cookies => Value::from_serialize(&ctx.cookies),
		pathVariables => Value::from_serialize(&ctx.path_variables),
	};
	environment()
		.render_str(source, data)
		.map_err(|e| Error::Template(e.to_string()))
}
