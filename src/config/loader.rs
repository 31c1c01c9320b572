use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{error, info, warn};

use crate::config::model::ServerEntry;
use crate::config::{Settings, jsonc, vars};
use crate::error::{Error, Result};
use crate::listener::ListenerManager;

/// Probed when no config file is named explicitly; the conventional
/// mount point in container images.
pub const WELL_KNOWN_CONFIG_PATH: &str = "/server.jsonmc";

/// What boot loading did; one entry failing never aborts the others.
#[derive(Debug, Default)]
pub struct LoadReport {
	pub created: Vec<String>,
	pub failed: Vec<(String, String)>,
}

/// Turn raw config text into server entries: strip comments when the
/// name or content says so, expand variables in all cases, then parse
/// strict JSON.
pub fn parse_entries(name: Option<&str>, raw: &str) -> Result<Vec<ServerEntry>> {
	parse_entries_with(name, raw, |n| std::env::var(n).ok())
}

pub fn parse_entries_with<F>(name: Option<&str>, raw: &str, lookup: F) -> Result<Vec<ServerEntry>>
where
	F: Fn(&str) -> Option<String>,
{
	let stripped = if jsonc::is_comment_tolerant(name, raw) {
		jsonc::strip(raw)?
	} else {
		raw.to_string()
	};
	let expanded = vars::expand(&stripped, lookup)?;
	serde_json::from_str(&expanded).map_err(|e| Error::Parse(format!("config is not valid JSON: {}", e)))
}

/// Resolve the config source by precedence: explicit file, well-known
/// container path, base64 blob, nothing.
fn resolve_source(settings: &Settings) -> Result<Option<(Option<String>, String)>> {
	if let Some(path) = &settings.config_file {
		let raw = std::fs::read_to_string(path)
			.map_err(|e| Error::Parse(format!("failed to read config file {}: {}", path, e)))?;
		return Ok(Some((Some(path.clone()), raw)));
	}
	if Path::new(WELL_KNOWN_CONFIG_PATH).exists() {
		let raw = std::fs::read_to_string(WELL_KNOWN_CONFIG_PATH).map_err(|e| {
			Error::Parse(format!("failed to read {}: {}", WELL_KNOWN_CONFIG_PATH, e))
		})?;
		return Ok(Some((Some(WELL_KNOWN_CONFIG_PATH.to_string()), raw)));
	}
	if let Some(blob) = &settings.config_b64 {
		let bytes = BASE64
			.decode(blob.trim())
			.map_err(|e| Error::Parse(format!("config blob is not valid base64: {}", e)))?;
		let raw = String::from_utf8(bytes)
			.map_err(|e| Error::Parse(format!("config blob is not UTF-8: {}", e)))?;
		return Ok(Some((None, raw)));
	}
	Ok(None)
}

/// Boot-time loading: read, parse and instantiate every configured
/// listener, seeding its expectations through the same path the runtime
/// expectation endpoint uses.
pub async fn load_and_apply(settings: &Settings, manager: &ListenerManager) -> Result<LoadReport> {
	let Some((name, raw)) = resolve_source(settings)? else {
		info!("no listener configuration found; starting empty");
		return Ok(LoadReport::default());
	};

	let entries = parse_entries(name.as_deref(), &raw)?;
	info!(
		"loaded {} listener definition(s) from {}",
		entries.len(),
		name.as_deref().unwrap_or("base64 blob")
	);

	let mut report = LoadReport::default();
	for entry in entries {
		let id = entry.server.server_id.clone();
		match apply_entry(manager, entry).await {
			Ok(()) => report.created.push(id),
			Err(e) => {
				error!("failed to create listener '{}': {}", id, e);
				report.failed.push((id, e.to_string()));
			}
		}
	}
	Ok(report)
}

async fn apply_entry(manager: &ListenerManager, entry: ServerEntry) -> Result<()> {
	let id = entry.server.server_id.clone();
	manager.create_listener(entry.server).await?;
	for expectation in entry.expectations {
		if let Err(e) = manager.add_expectation(&id, expectation).await {
			warn!("listener '{}': skipping bad expectation: {}", id, e);
		}
	}
	Ok(())
}

/// Offline validation used by the `check` subcommand: every entry's
/// listener config and expectations are checked, nothing is bound.
pub fn validate_entries(entries: &[ServerEntry]) -> Vec<String> {
	let mut problems = Vec::new();
	for entry in entries {
		if let Err(e) = entry.server.validate() {
			problems.push(format!("server '{}': {}", entry.server.server_id, e));
		}
		for (i, exp) in entry.expectations.iter().enumerate() {
			if let Err(e) = exp.validate() {
				problems.push(format!(
					"server '{}', expectation {}: {}",
					entry.server.server_id, i, e
				));
			}
		}
	}
	problems
}
