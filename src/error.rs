use thiserror::Error;

/// Error taxonomy shared across the crate.
///
/// Per-request failures never travel further than the dispatch callback,
/// which turns them into 5xx responses; the remaining variants surface
/// through listener creation and config loading.
#[derive(Debug, Error)]
pub enum Error {
	#[error("parse error: {0}")]
	Parse(String),

	#[error("variable not found: {0}")]
	VariableNotFound(String),

	#[error("invalid certificate: {0}")]
	InvalidCertificate(String),

	#[error("listener already exists: {0}")]
	ListenerAlreadyExists(String),

	#[error("listener not found: {0}")]
	ListenerNotFound(String),

	#[error("listener creation failed: {0}")]
	ListenerCreation(String),

	#[error("invalid expectation: {0}")]
	InvalidExpectation(String),

	#[error("token acquisition failed: {0}")]
	TokenAcquisition(String),

	#[error("tunnel startup failed: {0}")]
	TunnelStartup(String),

	#[error("template error: {0}")]
	Template(String),

	#[error("relay transport error: {0}")]
	RelayTransport(String),
}

impl Error {
	/// Stable machine-readable code, used in JSON error envelopes.
	pub fn code(&self) -> &'static str {
		match self {
			Error::Parse(_) => "PARSE_ERROR",
			Error::VariableNotFound(_) => "VARIABLE_NOT_FOUND",
			Error::InvalidCertificate(_) => "INVALID_CERTIFICATE",
			Error::ListenerAlreadyExists(_) => "LISTENER_ALREADY_EXISTS",
			Error::ListenerNotFound(_) => "LISTENER_NOT_FOUND",
			Error::ListenerCreation(_) => "LISTENER_CREATION_FAILED",
			Error::InvalidExpectation(_) => "INVALID_EXPECTATION",
			Error::TokenAcquisition(_) => "TOKEN_ACQUISITION_FAILED",
			Error::TunnelStartup(_) => "TUNNEL_STARTUP_FAILED",
			Error::Template(_) => "TEMPLATE_ERROR",
			Error::RelayTransport(_) => "RELAY_TRANSPORT_ERROR",
		}
	}
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn codes_are_stable() {
		assert_eq!(Error::Parse("x".into()).code(), "PARSE_ERROR");
		assert_eq!(
			Error::ListenerAlreadyExists("a".into()).code(),
			"LISTENER_ALREADY_EXISTS"
		);
		assert_eq!(
			Error::TunnelStartup("no pod".into()).code(),
			"TUNNEL_STARTUP_FAILED"
		);
	}

	#[test]
	fn display_includes_detail() {
		let e = Error::TokenAcquisition("status 403".into());
		assert!(e.to_string().contains("status 403"));
	}
}
