//! Boot-loading tests: comment-tolerant config files, variable
//! expansion, base64 blobs and per-entry failure tolerance.

mod common;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use common::{free_port, http_client, manager_in};
use vanopticon_loki::config::Settings;
use vanopticon_loki::config::loader;

fn settings_with_file(path: &std::path::Path, scratch: &std::path::Path) -> Settings {
	Settings {
		config_file: Some(path.to_string_lossy().to_string()),
		config_b64: None,
		scratch_dir: scratch.to_string_lossy().to_string(),
		cleanup_on_shutdown: true,
		kubectl_path: "kubectl".to_string(),
		log_level: None,
	}
}

#[tokio::test]
async fn comment_tolerant_config_boots_listener() {
	let dir = tempfile::tempdir().unwrap();
	let port = free_port();

	// Line comments, a block comment and a backtick multi-line string.
	let config_text = format!(
		"// hi\n[\n  {{\n    \"server\": {{\n      /* block */\n      \"serverId\": \"from-file\",\n      \"port\": {port},\n      \"description\": `line1\nline2`\n    }},\n    \"expectations\": [\n      {{ \"httpRequest\": {{ \"method\": \"GET\", \"path\": \"/hello\" }},\n         \"httpResponse\": {{ \"body\": \"hi\" }} }}\n    ]\n  }}\n]\n"
	);
	let config_path = dir.path().join("server.jsonmc");
	std::fs::write(&config_path, config_text).unwrap();

	let mgr = manager_in(dir.path());
	let report = loader::load_and_apply(&settings_with_file(&config_path, dir.path()), &mgr)
		.await
		.unwrap();
	assert_eq!(report.created, vec!["from-file".to_string()]);
	assert!(report.failed.is_empty());

	let snap = mgr.get("from-file").await.unwrap();
	assert_eq!(snap.description.as_deref(), Some("line1\nline2"));
	assert_eq!(snap.expectation_count, 1);

	let resp = http_client()
		.get(format!("http://127.0.0.1:{}/hello", port))
		.send()
		.await
		.unwrap();
	assert_eq!(resp.text().await.unwrap(), "hi");

	mgr.shutdown().await;
}

#[tokio::test]
async fn variables_expand_with_defaults() {
	let dir = tempfile::tempdir().unwrap();
	let port = free_port();

	let config_text = format!(
		"[ {{ \"server\": {{ \"serverId\": \"@{{LOKI_TEST_UNSET_ID:-defaulted}}\", \"port\": {port} }} }} ]"
	);
	let config_path = dir.path().join("server.json");
	std::fs::write(&config_path, config_text).unwrap();

	let mgr = manager_in(dir.path());
	let report = loader::load_and_apply(&settings_with_file(&config_path, dir.path()), &mgr)
		.await
		.unwrap();
	assert_eq!(report.created, vec!["defaulted".to_string()]);

	mgr.shutdown().await;
}

#[tokio::test]
async fn base64_blob_is_a_config_source() {
	let dir = tempfile::tempdir().unwrap();
	let port = free_port();

	let raw = format!("[ {{ \"server\": {{ \"serverId\": \"from-blob\", \"port\": {port} }} }} ]");
	let settings = Settings {
		config_file: None,
		config_b64: Some(BASE64.encode(raw)),
		scratch_dir: dir.path().to_string_lossy().to_string(),
		cleanup_on_shutdown: true,
		kubectl_path: "kubectl".to_string(),
		log_level: None,
	};

	let mgr = manager_in(dir.path());
	let report = loader::load_and_apply(&settings, &mgr).await.unwrap();
	assert_eq!(report.created, vec!["from-blob".to_string()]);

	mgr.shutdown().await;
}

#[tokio::test]
async fn one_bad_entry_does_not_abort_the_rest() {
	let dir = tempfile::tempdir().unwrap();
	let port = free_port();

	// Both entries claim the same port; the second fails, the first
	// stays up.
	let config_text = format!(
		"[ {{ \"server\": {{ \"serverId\": \"good\", \"port\": {port} }} }},\n  {{ \"server\": {{ \"serverId\": \"clash\", \"port\": {port} }} }} ]"
	);
	let config_path = dir.path().join("server.json");
	std::fs::write(&config_path, config_text).unwrap();

	let mgr = manager_in(dir.path());
	let report = loader::load_and_apply(&settings_with_file(&config_path, dir.path()), &mgr)
		.await
		.unwrap();
	assert_eq!(report.created, vec!["good".to_string()]);
	assert_eq!(report.failed.len(), 1);
	assert_eq!(report.failed[0].0, "clash");
	assert_eq!(mgr.list().await.len(), 1);

	mgr.shutdown().await;
}

#[tokio::test]
async fn broken_document_is_fatal() {
	let dir = tempfile::tempdir().unwrap();
	let config_path = dir.path().join("server.json");
	std::fs::write(&config_path, "[ { not json").unwrap();

	let mgr = manager_in(dir.path());
	let err = loader::load_and_apply(&settings_with_file(&config_path, dir.path()), &mgr).await;
	assert!(err.is_err());
	assert!(mgr.list().await.is_empty());
}

#[tokio::test]
async fn no_config_starts_empty() {
	let dir = tempfile::tempdir().unwrap();
	let settings = Settings {
		config_file: None,
		config_b64: None,
		scratch_dir: dir.path().to_string_lossy().to_string(),
		cleanup_on_shutdown: true,
		kubectl_path: "kubectl".to_string(),
		log_level: None,
	};
	let mgr = manager_in(dir.path());
	let report = loader::load_and_apply(&settings, &mgr).await.unwrap();
	assert!(report.created.is_empty());
	assert!(mgr.list().await.is_empty());
}
