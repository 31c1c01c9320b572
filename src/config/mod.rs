pub mod jsonc;
pub mod loader;
pub mod model;
pub mod vars;

use anyhow::Result;
use serde::Deserialize;

/// Process-level settings for Loki.
///
/// Values are loaded from (in order): `config` file (optional) and
/// environment variables prefixed with `LOKI_` (e.g. `LOKI_CONFIG_FILE`).
/// Listener definitions themselves live in the file named by
/// `config_file`, not here.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
pub struct Settings {
	pub config_file: Option<String>,
	pub config_b64: Option<String>,
	pub scratch_dir: String,
	pub cleanup_on_shutdown: bool,
	pub kubectl_path: String,
	pub log_level: Option<String>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			config_file: None,
			config_b64: None,
			scratch_dir: std::env::temp_dir()
				.join("loki-tls")
				.to_string_lossy()
				.to_string(),
			cleanup_on_shutdown: true,
			kubectl_path: "kubectl".to_string(),
			log_level: Some("info".to_string()),
		}
	}
}

/// Partial settings used to overlay environment/file values on top of defaults.
#[derive(Debug, Deserialize)]
struct PartialSettings {
	config_file: Option<String>,
	config_b64: Option<String>,
	scratch_dir: Option<String>,
	cleanup_on_shutdown: Option<bool>,
	kubectl_path: Option<String>,
	log_level: Option<String>,
}

/// Load settings from config file (optional) and environment variables.
pub fn load() -> Result<Settings> {
	let builder = config::Config::builder()
		.add_source(config::File::with_name("config").required(false))
		// Double-underscore separator so names like `LOKI_CONFIG_FILE`
		// map to `config_file` instead of nested `config.file`.
		.add_source(config::Environment::with_prefix("LOKI").separator("__"));

	let cfg = builder.build()?;
	let partial: PartialSettings = cfg.try_deserialize()?;

	let mut s = Settings::default();
	if let Some(f) = partial.config_file {
		s.config_file = Some(f);
	}
	if let Some(b) = partial.config_b64 {
		s.config_b64 = Some(b);
	}
	if let Some(d) = partial.scratch_dir {
		s.scratch_dir = d;
	}
	if let Some(c) = partial.cleanup_on_shutdown {
		s.cleanup_on_shutdown = c;
	}
	if let Some(k) = partial.kubectl_path {
		s.kubectl_path = k;
	}
	if let Some(l) = partial.log_level {
		s.log_level = Some(l);
	}

	// Direct environment variables win over everything; some CI
	// environments set them in ways the `config` crate does not map.
	if let Ok(f) = std::env::var("LOKI_CONFIG_FILE") {
		if !f.is_empty() {
			s.config_file = Some(f);
		}
	}
	if let Ok(b) = std::env::var("LOKI_CONFIG_B64") {
		if !b.is_empty() {
			s.config_b64 = Some(b);
		}
	}
	if let Ok(d) = std::env::var("LOKI_SCRATCH_DIR") {
		if !d.is_empty() {
			s.scratch_dir = d;
		}
	}
	if let Ok(c) = std::env::var("LOKI_CLEANUP_ON_SHUTDOWN") {
		if let Ok(flag) = c.parse::<bool>() {
			s.cleanup_on_shutdown = flag;
		}
	}
	if let Ok(k) = std::env::var("LOKI_KUBECTL_PATH") {
		if !k.is_empty() {
			s.kubectl_path = k;
		}
	}
	if let Ok(l) = std::env::var("LOKI_LOG_LEVEL") {
		if !l.is_empty() {
			s.log_level = Some(l);
		}
	}

	Ok(s)
}
