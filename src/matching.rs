use std::collections::BTreeMap;

use axum::http::{HeaderMap, Method};
use regex::Regex;

use crate::config::model::RequestSpec;
use crate::error::{Error, Result};

/// Match a request path against an expectation pattern, binding `{name}`
/// segments to the aligned path segments.
///
/// Both sides are split on `/`; the segment counts must match exactly and
/// every literal pattern segment must equal its counterpart. Returns the
/// bound variables on success, `None` on any mismatch.
pub fn extract_path_variables(pattern: &str, path: &str) -> Option<BTreeMap<String, String>> {
	let pat_segs: Vec<&str> = pattern.split('/').collect();
	let path_segs: Vec<&str> = path.split('/').collect();
	if pat_segs.len() != path_segs.len() {
		return None;
	}

	let mut vars = BTreeMap::new();
	for (p, s) in pat_segs.iter().zip(path_segs.iter()) {
		if p.len() >= 2 && p.starts_with('{') && p.ends_with('}') {
			vars.insert(p[1..p.len() - 1].to_string(), (*s).to_string());
		} else if p != s {
			return None;
		}
	}
	Some(vars)
}

/// A compiled ant-style glob used as a path prefix matcher.
///
/// `?` matches one character other than `/`, `*` any run of characters
/// other than `/`, and `**` any run including `/`. The glob matches a
/// prefix of the request path; its specificity for longest-prefix-wins
/// selection is the length of the glob's literal prefix (everything
/// before the first wildcard), so `/api/**` outranks a `/**` catch-all
/// even though both wildcards can swallow the whole path.
#[derive(Debug, Clone)]
pub struct PrefixGlob {
	pattern: String,
	regex: Regex,
	literal_len: usize,
}

impl PrefixGlob {
	pub fn compile(pattern: &str) -> Result<Self> {
		let mut re = String::with_capacity(pattern.len() * 2 + 2);
		re.push('^');
		let mut literal_len = pattern.len();
		let mut chars = pattern.char_indices().peekable();
		while let Some((i, c)) = chars.next() {
			match c {
				'*' | '?' => {
					literal_len = literal_len.min(i);
					if c == '?' {
						re.push_str("[^/]");
					} else if matches!(chars.peek(), Some((_, '*'))) {
						chars.next();
						re.push_str(".*");
					} else {
						re.push_str("[^/]*");
					}
				}
				// Escape everything else that regex treats specially.
				'.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
					re.push('\\');
					re.push(c);
				}
				other => re.push(other),
			}
		}
		let regex = Regex::new(&re)
			.map_err(|e| Error::Parse(format!("invalid prefix glob '{}': {}", pattern, e)))?;
		Ok(Self {
			pattern: pattern.to_string(),
			regex,
			literal_len,
		})
	}

	pub fn pattern(&self) -> &str {
		&self.pattern
	}

	/// Specificity of this glob against `path`: the length of its literal
	/// prefix when the glob matches, `None` otherwise.
	pub fn match_score(&self, path: &str) -> Option<usize> {
		self.regex.find(path).map(|_| self.literal_len)
	}
}

/// Best specificity score for a rule's glob set.
pub fn best_score(globs: &[PrefixGlob], path: &str) -> Option<usize> {
	globs.iter().filter_map(|g| g.match_score(path)).max()
}

/// Split a raw query string into name/value pairs. Values are taken
/// verbatim; a bare `name` yields an empty value.
pub fn query_pairs(query: &str) -> Vec<(String, String)> {
	query
		.split('&')
		.filter(|p| !p.is_empty())
		.map(|p| match p.split_once('=') {
			Some((k, v)) => (k.to_string(), v.to_string()),
			None => (p.to_string(), String::new()),
		})
		.collect()
}

/// Evaluate an expectation's request matcher against an incoming request.
///
/// Method, path, and the optional header/query/body predicates must all
/// hold. Returns the path variables bound by the path pattern on success.
pub fn request_matches(
	spec: &RequestSpec,
	method: &Method,
	path: &str,
	query: Option<&str>,
	headers: &HeaderMap,
	body: &[u8],
) -> Option<BTreeMap<String, String>> {
	if let Some(m) = &spec.method {
		if !m.eq_ignore_ascii_case(method.as_str()) {
			return None;
		}
	}

	let vars = extract_path_variables(&spec.path, path)?;

	if let Some(expected) = &spec.headers {
		for (name, value) in expected {
			let got = headers.get(name.as_str()).and_then(|v| v.to_str().ok());
			if got != Some(value.as_str()) {
				return None;
			}
		}
	}

	if let Some(expected) = &spec.query_parameters {
		let pairs = query_pairs(query.unwrap_or(""));
		for (name, value) in expected {
			if !pairs.iter().any(|(k, v)| k == name && v == value) {
				return None;
			}
		}
	}

	if let Some(expected) = &spec.body {
		match expected {
			serde_json::Value::String(s) => {
				if s.as_bytes() != body {
					return None;
				}
			}
			other => match serde_json::from_slice::<serde_json::Value>(body) {
				Ok(got) if &got == other => {}
				_ => return None,
			},
		}
	}

	Some(vars)
}
