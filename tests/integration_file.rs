//! File-prefix retrieval over a live listener: content-type mapping,
//! attachment disposition, templated prefixes and the 404 path.

mod common;

use common::{expectation, free_port, http_client, listener_config, manager_in};

#[tokio::test]
async fn prefix_resolves_to_first_matching_file() {
	let files = tempfile::tempdir().unwrap();
	std::fs::write(files.path().join("q1.pdf"), b"%PDF quarterly").unwrap();
	std::fs::write(files.path().join("other.pdf"), b"%PDF other").unwrap();

	let scratch = tempfile::tempdir().unwrap();
	let mgr = manager_in(scratch.path());
	let port = free_port();
	let prefix = files.path().join("q").to_string_lossy().to_string();

	mgr.create_listener(listener_config(serde_json::json!({
		"serverId": "files",
		"port": port,
	})))
	.await
	.unwrap();
	mgr.add_expectation(
		"files",
		expectation(serde_json::json!({
			"httpRequest": { "method": "GET", "path": "/dl" },
			"httpResponse": { "file": prefix }
		})),
	)
	.await
	.unwrap();

	let resp = http_client()
		.get(format!("http://127.0.0.1:{}/dl", port))
		.send()
		.await
		.unwrap();
	assert_eq!(resp.status().as_u16(), 200);
	assert_eq!(resp.headers()["Content-Type"], "application/pdf");
	assert_eq!(
		resp.headers()["Content-Disposition"],
		"attachment; filename=\"q1.pdf\""
	);
	assert_eq!(resp.bytes().await.unwrap().as_ref(), b"%PDF quarterly");

	mgr.shutdown().await;
}

#[tokio::test]
async fn unmatched_prefix_is_404_with_prefix_named() {
	let files = tempfile::tempdir().unwrap();
	let scratch = tempfile::tempdir().unwrap();
	let mgr = manager_in(scratch.path());
	let port = free_port();
	let prefix = files.path().join("q").to_string_lossy().to_string();

	mgr.create_listener(listener_config(serde_json::json!({
		"serverId": "files-miss",
		"port": port,
	})))
	.await
	.unwrap();
	mgr.add_expectation(
		"files-miss",
		expectation(serde_json::json!({
			"httpRequest": { "method": "GET", "path": "/dl" },
			"httpResponse": { "file": prefix }
		})),
	)
	.await
	.unwrap();

	let resp = http_client()
		.get(format!("http://127.0.0.1:{}/dl", port))
		.send()
		.await
		.unwrap();
	assert_eq!(resp.status().as_u16(), 404);
	assert_eq!(
		resp.text().await.unwrap(),
		format!("File not found: {}", prefix)
	);

	mgr.shutdown().await;
}

#[tokio::test]
async fn templated_prefix_selects_per_request() {
	let files = tempfile::tempdir().unwrap();
	std::fs::write(files.path().join("report-7.csv"), b"a,b\n1,2\n").unwrap();
	std::fs::write(files.path().join("report-8.csv"), b"c,d\n3,4\n").unwrap();

	let scratch = tempfile::tempdir().unwrap();
	let mgr = manager_in(scratch.path());
	let port = free_port();
	let file_template = format!("{}/report-${{pathVariables.id}}", files.path().display());

	mgr.create_listener(listener_config(serde_json::json!({
		"serverId": "files-tpl",
		"port": port,
	})))
	.await
	.unwrap();
	mgr.add_expectation(
		"files-tpl",
		expectation(serde_json::json!({
			"httpRequest": { "method": "GET", "path": "/reports/{id}" },
			"httpResponse": { "file": file_template }
		})),
	)
	.await
	.unwrap();

	let resp = http_client()
		.get(format!("http://127.0.0.1:{}/reports/8", port))
		.send()
		.await
		.unwrap();
	assert_eq!(resp.status().as_u16(), 200);
	assert_eq!(resp.headers()["Content-Type"], "text/csv");
	assert_eq!(
		resp.headers()["Content-Disposition"],
		"attachment; filename=\"report-8.csv\""
	);
	assert_eq!(resp.bytes().await.unwrap().as_ref(), b"c,d\n3,4\n");

	mgr.shutdown().await;
}
