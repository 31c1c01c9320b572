pub mod store;
pub mod validate;

use std::sync::Arc;

use tokio_rustls::rustls::server::{
	AllowAnyAnonymousOrAuthenticatedClient, AllowAnyAuthenticatedClient, ServerConfig,
};
use tokio_rustls::rustls::RootCertStore;

pub use store::{MaterialKind, MaterialStore};

use crate::config::model::TlsConfig;
use crate::error::{Error, Result};

/// Validate the listener's PEM material and build its rustls server
/// config. TLS state is scoped to the listener; nothing here is
/// process-wide.
pub fn build_server_config(tls: &TlsConfig) -> Result<Arc<ServerConfig>> {
	let certs = validate::validate_certificate(&tls.certificate)?;
	let key = validate::validate_private_key(&tls.private_key, &certs)?;

	let builder = ServerConfig::builder().with_safe_defaults();

	let cfg = match &tls.mtls_config {
		Some(mtls) => {
			let ca_certs = validate::validate_ca(&mtls.ca_certificate)?;
			let mut roots = RootCertStore::empty();
			for ca in &ca_certs {
				roots
					.add(ca)
					.map_err(|e| Error::InvalidCertificate(format!("unusable CA certificate: {}", e)))?;
			}
			let verifier = if mtls.require_client_auth {
				AllowAnyAuthenticatedClient::new(roots).boxed()
			} else {
				AllowAnyAnonymousOrAuthenticatedClient::new(roots).boxed()
			};
			builder
				.with_client_cert_verifier(verifier)
				.with_single_cert(certs, key)
		}
		None => builder.with_no_client_auth().with_single_cert(certs, key),
	}
	.map_err(|e| Error::InvalidCertificate(format!("failed to build TLS server config: {}", e)))?;

	Ok(Arc::new(cfg))
}
