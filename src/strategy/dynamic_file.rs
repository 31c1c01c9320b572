use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::body::Bytes;
use log::debug;

use crate::config::model::Expectation;
use crate::error::{Error, Result};
use crate::template::{self, RequestContext};

use super::{HttpResponse, InboundRequest, ResponseStrategy};

/// Serves file downloads resolved from a rendered path prefix, and
/// template-rendered response bodies.
pub struct FileTemplateStrategy;

#[async_trait]
impl ResponseStrategy for FileTemplateStrategy {
	fn name(&self) -> &'static str {
		"dynamic-file"
	}

	fn priority(&self) -> i32 {
		10
	}

	fn supports(&self, expectation: &Expectation) -> bool {
		let spec = &expectation.http_response;
		spec.file.is_some()
			|| spec
				.body_text()
				.is_some_and(|b| template::looks_like_template(&b))
	}

	async fn handle(
		&self,
		_request: &InboundRequest,
		expectation: &Expectation,
		ctx: &RequestContext,
	) -> Result<HttpResponse> {
		let spec = &expectation.http_response;
		if let Some(file_template) = &spec.file {
			let prefix = match template::render(file_template, ctx) {
				Ok(p) => p.trim().to_string(),
				Err(Error::Template(msg)) => {
					return Ok(HttpResponse::text(500, format!("Error processing template: {}", msg)));
				}
				Err(e) => return Err(e),
			};
			return serve_by_prefix(&prefix).await;
		}

		// Template body path: the expectation's status and headers are
		// kept, only the body is replaced by the rendered text.
		let source = spec.body_text().unwrap_or_default();
		match template::render(&source, ctx) {
			Ok(rendered) => {
				let mut response = HttpResponse::new(spec.status());
				if let Some(headers) = &spec.headers {
					for (name, value) in headers {
						response.headers.push((name.clone(), value.clone()));
					}
				}
				response.body = Bytes::from(rendered);
				Ok(response)
			}
			Err(Error::Template(msg)) => {
				Ok(HttpResponse::text(500, format!("Error processing template: {}", msg)))
			}
			Err(e) => Err(e),
		}
	}
}

/// Walk the prefix's directory and serve the first regular file whose
/// name starts with the prefix's basename. Entries are sorted by name so
/// "first" is deterministic.
async fn serve_by_prefix(prefix: &str) -> Result<HttpResponse> {
	let prefix_path = PathBuf::from(prefix);
	let dir = match prefix_path.parent() {
		Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
		_ => PathBuf::from("."),
	};
	let basename = prefix_path
		.file_name()
		.map(|n| n.to_string_lossy().to_string())
		.unwrap_or_default();

	let not_found = || HttpResponse::text(404, format!("File not found: {}", prefix));

	let mut entries = match tokio::fs::read_dir(&dir).await {
		Ok(e) => e,
		Err(_) => return Ok(not_found()),
	};

	let mut names: Vec<String> = Vec::new();
	while let Ok(Some(entry)) = entries.next_entry().await {
		let name = entry.file_name().to_string_lossy().to_string();
		if name.starts_with(&basename) {
			names.push(name);
		}
	}
	names.sort_unstable();

	let Some(file_name) = names.into_iter().next() else {
		return Ok(not_found());
	};
	let path = dir.join(&file_name);

	match tokio::fs::metadata(&path).await {
		Ok(meta) if meta.is_file() => {}
		Ok(_) => {
			return Ok(HttpResponse::text(
				400,
				format!("Not a regular file: {}", path.display()),
			));
		}
		Err(_) => return Ok(not_found()),
	}

	let bytes = match tokio::fs::read(&path).await {
		Ok(b) => b,
		Err(e) => {
			return Ok(HttpResponse::text(
				500,
				format!("Error reading file {}: {}", path.display(), e),
			));
		}
	};

	debug!("serving {} ({} bytes) for prefix {}", path.display(), bytes.len(), prefix);

	Ok(HttpResponse {
		status: 200,
		headers: vec![
			("Content-Type".to_string(), content_type_for(&path).to_string()),
			(
				"Content-Disposition".to_string(),
				format!("attachment; filename=\"{}\"", file_name),
			),
		],
		body: Bytes::from(bytes),
	})
}

fn content_type_for(path: &Path) -> &'static str {
	let ext = path
		.extension()
		.map(|e| e.to_string_lossy().to_ascii_lowercase())
		.unwrap_or_default();
	match ext.as_str() {
		"pdf" => "application/pdf",
		"zip" => "application/zip",
		"json" => "application/json",
		"xml" => "application/xml",
		"txt" => "text/plain",
		"csv" => "text/csv",
		"jpg" | "jpeg" => "image/jpeg",
		"png" => "image/png",
		"gif" => "image/gif",
		_ => "application/octet-stream",
	}
}
