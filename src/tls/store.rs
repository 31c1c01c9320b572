use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};

use crate::error::{Error, Result};

/// What a scratch file holds; drives the file-name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
	Cert,
	Key,
	Ca,
}

impl MaterialKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			MaterialKind::Cert => "cert",
			MaterialKind::Key => "key",
			MaterialKind::Ca => "ca",
		}
	}
}

/// Owns the per-listener TLS scratch files.
///
/// Files are created under the scratch directory with a
/// `<listenerId>-<kind>-` prefix and 0600 permissions, tracked per
/// listener so they can be removed on release and again at shutdown.
pub struct MaterialStore {
	scratch_dir: PathBuf,
	cleanup_on_shutdown: bool,
	tracked: Mutex<HashMap<String, Vec<PathBuf>>>,
}

impl MaterialStore {
	pub fn new(scratch_dir: impl Into<PathBuf>, cleanup_on_shutdown: bool) -> Self {
		Self {
			scratch_dir: scratch_dir.into(),
			cleanup_on_shutdown,
			tracked: Mutex::new(HashMap::new()),
		}
	}

	pub fn scratch_dir(&self) -> &Path {
		&self.scratch_dir
	}

	/// Atomically create a scratch file holding `pem` and track it under
	/// `listener_id`. Returns the final path.
	pub fn write_material(
		&self,
		listener_id: &str,
		pem: &str,
		kind: MaterialKind,
	) -> Result<PathBuf> {
		std::fs::create_dir_all(&self.scratch_dir).map_err(|e| {
			Error::ListenerCreation(format!(
				"failed to create TLS scratch directory {}: {}",
				self.scratch_dir.display(),
				e
			))
		})?;

		let mut file = tempfile::Builder::new()
			.prefix(&format!("{}-{}-", listener_id, kind.as_str()))
			.suffix(".pem")
			.tempfile_in(&self.scratch_dir)
			.map_err(|e| Error::ListenerCreation(format!("failed to create TLS scratch file: {}", e)))?;

		file.write_all(pem.as_bytes())
			.map_err(|e| Error::ListenerCreation(format!("failed to write TLS scratch file: {}", e)))?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			let perms = std::fs::Permissions::from_mode(0o600);
			std::fs::set_permissions(file.path(), perms).map_err(|e| {
				Error::ListenerCreation(format!("failed to restrict TLS scratch file mode: {}", e))
			})?;
		}

		let (_, path) = file
			.keep()
			.map_err(|e| Error::ListenerCreation(format!("failed to persist TLS scratch file: {}", e)))?;

		debug!("wrote {} material for listener {} at {}", kind.as_str(), listener_id, path.display());

		let mut tracked = self.tracked.lock().expect("material store lock poisoned");
		tracked
			.entry(listener_id.to_string())
			.or_default()
			.push(path.clone());
		Ok(path)
	}

	/// Best-effort removal of every tracked file for `listener_id`.
	pub fn release_listener(&self, listener_id: &str) {
		let paths = {
			let mut tracked = self.tracked.lock().expect("material store lock poisoned");
			tracked.remove(listener_id).unwrap_or_default()
		};
		for path in paths {
			if let Err(e) = std::fs::remove_file(&path) {
				warn!(
					"failed to remove TLS scratch file {} for listener {}: {}",
					path.display(),
					listener_id,
					e
				);
			}
		}
	}

	/// Release every listener's files, honoring the cleanup flag.
	pub fn shutdown(&self) {
		if !self.cleanup_on_shutdown {
			return;
		}
		let ids: Vec<String> = {
			let tracked = self.tracked.lock().expect("material store lock poisoned");
			tracked.keys().cloned().collect()
		};
		for id in ids {
			self.release_listener(&id);
		}
	}

	#[cfg(test)]
	pub fn tracked_files(&self, listener_id: &str) -> Vec<PathBuf> {
		self.tracked
			.lock()
			.unwrap()
			.get(listener_id)
			.cloned()
			.unwrap_or_default()
	}
}
