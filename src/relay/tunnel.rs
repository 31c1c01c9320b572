use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};

use crate::config::model::TunnelConfig;
use crate::error::{Error, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const KILL_WAIT: Duration = Duration::from_secs(5);
const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

const PORT_RANGE_START: u16 = 9000;
const PORT_RANGE_END: u16 = 11000;
const PORT_ATTEMPTS: u32 = 100;

/// A live `kubectl port-forward` subprocess bridging a local port to a
/// pod. The child is spawned with `kill_on_drop`, so a dropped handle can
/// not leak the subprocess.
pub struct TunnelHandle {
	pub key: String,
	pub pod: String,
	pub host_port: u16,
	child: Child,
}

impl TunnelHandle {
	/// Force-kill the subprocess and wait up to five seconds for it to
	/// reap.
	pub async fn kill(mut self) {
		if let Err(e) = self.child.start_kill() {
			warn!("failed to signal tunnel {}: {}", self.key, e);
		}
		match timeout(KILL_WAIT, self.child.wait()).await {
			Ok(Ok(status)) => debug!("tunnel {} exited with {}", self.key, status),
			Ok(Err(e)) => warn!("failed to reap tunnel {}: {}", self.key, e),
			Err(_) => warn!("tunnel {} did not exit within {:?}", self.key, KILL_WAIT),
		}
	}
}

/// Starts and supervises port-forward tunnels through the external
/// `kubectl` binary.
pub struct TunnelSupervisor {
	kubectl: String,
}

impl TunnelSupervisor {
	pub fn new(kubectl: impl Into<String>) -> Self {
		Self {
			kubectl: kubectl.into(),
		}
	}

	/// Bring up one tunnel: probe the tool, discover the pod, allocate a
	/// local port and wait until the forwarder binds it.
	pub async fn start(&self, tunnel: &TunnelConfig) -> Result<TunnelHandle> {
		let key = tunnel_key(tunnel);
		self.probe().await?;
		let pod = self.discover_pod(&tunnel.namespace, &tunnel.pod_prefix).await?;
		let host_port = pick_free_port()?;

		info!(
			"starting tunnel {}: pod {} {}:{}",
			key, pod, host_port, tunnel.pod_port
		);

		let mut child = Command::new(&self.kubectl)
			.arg("port-forward")
			.arg(format!("pod/{}", pod))
			.arg(format!("{}:{}", host_port, tunnel.pod_port))
			.arg("-n")
			.arg(&tunnel.namespace)
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| Error::TunnelStartup(format!("failed to spawn {}: {}", self.kubectl, e)))?;

		// Both output streams drain into the log under the tunnel key.
		if let Some(stdout) = child.stdout.take() {
			spawn_output_reader(key.clone(), stdout);
		}
		if let Some(stderr) = child.stderr.take() {
			spawn_output_reader(key.clone(), stderr);
		}

		let polls = (STARTUP_TIMEOUT.as_millis() / POLL_INTERVAL.as_millis()) as u32;
		for _ in 0..polls {
			if let Ok(Some(status)) = child.try_wait() {
				return Err(Error::TunnelStartup(format!(
					"port-forward for {} exited during startup with {}",
					key, status
				)));
			}
			if port_is_bound(host_port).await {
				info!("tunnel {} is up on local port {}", key, host_port);
				return Ok(TunnelHandle {
					key,
					pod,
					host_port,
					child,
				});
			}
			sleep(POLL_INTERVAL).await;
		}

		let _ = child.start_kill();
		let _ = timeout(KILL_WAIT, child.wait()).await;
		Err(Error::TunnelStartup(format!(
			"port-forward for {} did not bind port {} within {:?}",
			key, host_port, STARTUP_TIMEOUT
		)))
	}

	/// The tool must answer a version probe before anything else is tried.
	async fn probe(&self) -> Result<()> {
		let mut cmd = Command::new(&self.kubectl);
		cmd.arg("version").arg("--client=true");
		cmd.stdout(Stdio::null()).stderr(Stdio::null());
		match timeout(PROBE_TIMEOUT, cmd.status()).await {
			Ok(Ok(status)) if status.success() => Ok(()),
			Ok(Ok(status)) => Err(Error::TunnelStartup(format!(
				"{} version probe exited with {}",
				self.kubectl, status
			))),
			Ok(Err(e)) => Err(Error::TunnelStartup(format!(
				"{} is not runnable: {}",
				self.kubectl, e
			))),
			Err(_) => Err(Error::TunnelStartup(format!(
				"{} version probe timed out after {:?}",
				self.kubectl, PROBE_TIMEOUT
			))),
		}
	}

	async fn discover_pod(&self, namespace: &str, pod_prefix: &str) -> Result<String> {
		let mut cmd = Command::new(&self.kubectl);
		cmd.arg("get")
			.arg("pods")
			.arg("-n")
			.arg(namespace)
			.arg("-o")
			.arg("name");
		let out = timeout(PROBE_TIMEOUT, cmd.output())
			.await
			.map_err(|_| Error::TunnelStartup("pod listing timed out".to_string()))?
			.map_err(|e| Error::TunnelStartup(format!("pod listing failed to run: {}", e)))?;
		if !out.status.success() {
			return Err(Error::TunnelStartup(format!(
				"pod listing in namespace {} exited with {}",
				namespace, out.status
			)));
		}
		let stdout = String::from_utf8_lossy(&out.stdout);
		first_matching_pod(&stdout, pod_prefix).ok_or_else(|| {
			Error::TunnelStartup(format!(
				"no pod with prefix '{}' in namespace {}",
				pod_prefix, namespace
			))
		})
	}
}

pub fn tunnel_key(tunnel: &TunnelConfig) -> String {
	format!("{}:{}", tunnel.namespace, tunnel.pod_prefix)
}

/// First pod name (lexicographic) starting with the prefix. The listing
/// format is one `pod/<name>` per line.
fn first_matching_pod(listing: &str, prefix: &str) -> Option<String> {
	let mut names: Vec<&str> = listing
		.lines()
		.map(|l| l.trim().trim_start_matches("pod/"))
		.filter(|l| !l.is_empty())
		.collect();
	names.sort_unstable();
	names
		.into_iter()
		.find(|n| n.starts_with(prefix))
		.map(str::to_string)
}

/// Pick a free local TCP port uniformly at random in [9000, 11000],
/// probing by briefly binding a listener.
fn pick_free_port() -> Result<u16> {
	let mut rng = rand::thread_rng();
	for _ in 0..PORT_ATTEMPTS {
		let candidate = rng.gen_range(PORT_RANGE_START..=PORT_RANGE_END);
		if std::net::TcpListener::bind(("127.0.0.1", candidate)).is_ok() {
			return Ok(candidate);
		}
	}
	Err(Error::TunnelStartup(format!(
		"no free local port found in [{}, {}] after {} attempts",
		PORT_RANGE_START, PORT_RANGE_END, PORT_ATTEMPTS
	)))
}

async fn port_is_bound(port: u16) -> bool {
	matches!(
		timeout(CONNECT_PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
		Ok(Ok(_))
	)
}

fn spawn_output_reader(key: String, stream: impl tokio::io::AsyncRead + Unpin + Send + 'static) {
	tokio::spawn(async move {
		let mut lines = BufReader::new(stream).lines();
		while let Ok(Some(line)) = lines.next_line().await {
			debug!("tunnel {}: {}", key, line);
		}
	});
}
