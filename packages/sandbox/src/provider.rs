// ABOUTME: Docker runtime adapter: translates sandbox operations into bollard calls
// ABOUTME: Owns the registry and enforces the container security posture on create

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SandboxError};
use crate::exec::{drain_demuxed, ExecLimits, ExecOutcome};
use crate::registry::{Sandbox, SandboxRegistry};
use crate::sink::LimitedSink;
use crate::templates::Template;

/// Labels applied to every capsule container so leaked containers can be
/// found (and reaped) by label after a process crash.
const MANAGED_LABEL: &str = "capsule.managed";
const SANDBOX_ID_LABEL: &str = "capsule.sandbox_id";

const WORKSPACE_DIR: &str = "/workspace";

// Resource and security limits applied to every sandbox container
const MEMORY_BYTES: i64 = 512 * 1024 * 1024;
const CPU_PERIOD: i64 = 100_000;
const CPU_QUOTA: i64 = 50_000;
const PIDS_LIMIT: i64 = 100;

/// Default timeout for image pull operations
const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// One directory entry from `list_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: i64,
}

/// Output of a fully drained, uncapped exec (file operations).
struct CapturedCommand {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: i64,
}

/// Typed facade over the Docker daemon plus the sandbox registry.
///
/// The registry entry is the source of truth for sandbox lifetime: a record
/// exists only for a container that started successfully, and `delete`
/// removes the record before the container so concurrent deleters observe
/// not-found instead of racing the removal.
pub struct DockerProvider {
    docker: Docker,
    registry: SandboxRegistry,
    pull_timeout: Duration,
}

impl DockerProvider {
    /// Connect to the Docker daemon and verify it responds.
    pub async fn new() -> Result<Self> {
        Self::with_pull_timeout(DEFAULT_PULL_TIMEOUT).await
    }

    /// Connect with a custom image pull timeout.
    pub async fn with_pull_timeout(pull_timeout: Duration) -> Result<Self> {
        let docker = Docker::connect_with_defaults()?;

        docker.ping().await.map_err(|e| {
            error!("failed to connect to docker daemon: {}", e);
            SandboxError::Docker(e)
        })?;

        info!("connected to docker daemon");
        Ok(Self {
            docker,
            registry: SandboxRegistry::new(),
            pull_timeout,
        })
    }

    /// Wrap an existing client without pinging the daemon. Used by tests and
    /// callers that manage their own connection.
    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            registry: SandboxRegistry::new(),
            pull_timeout: DEFAULT_PULL_TIMEOUT,
        }
    }

    /// Create, start, and register a sandbox. All-or-nothing: any failure
    /// after container create force-removes the container before returning.
    pub async fn create_sandbox(&self, template: Template, ttl: Duration) -> Result<Sandbox> {
        let image = template.image();
        self.ensure_image(image).await?;

        let id = short_id();

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(SANDBOX_ID_LABEL.to_string(), id.clone());

        let host_config = HostConfig {
            cap_drop: Some(vec!["ALL".to_string()]),
            network_mode: Some("none".to_string()),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            memory: Some(MEMORY_BYTES),
            // swap equal to memory: no swap headroom
            memory_swap: Some(MEMORY_BYTES),
            cpu_period: Some(CPU_PERIOD),
            cpu_quota: Some(CPU_QUOTA),
            pids_limit: Some(PIDS_LIMIT),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.to_string()),
            // long-lived idle process so exec can attach
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some(WORKSPACE_DIR.to_string()),
            tty: Some(false),
            open_stdin: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: format!("capsule-{id}"),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| {
                error!("failed to create container: {}", e);
                SandboxError::ContainerCreateFailed(e.to_string())
            })?;

        if let Err(e) = self
            .docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
        {
            self.force_remove(&container.id).await;
            return Err(SandboxError::ContainerCreateFailed(e.to_string()));
        }

        let now = Utc::now();
        let record = Sandbox {
            id: id.clone(),
            container_id: container.id.clone(),
            template,
            created_at: now,
            expires_at: now + chrono::Duration::milliseconds(ttl.as_millis() as i64),
        };

        if !self.registry.insert(record.clone()).await {
            self.force_remove(&container.id).await;
            return Err(SandboxError::ContainerCreateFailed(format!(
                "sandbox id collision: {id}"
            )));
        }

        info!("created sandbox {} ({} -> {})", id, template, image);
        Ok(record)
    }

    /// Run one command to completion with bounded capture of both streams.
    ///
    /// A fired deadline is not an error: the outcome carries `timed_out` and
    /// whatever output was captured, with exit code -1 when the exec is
    /// still running or cannot be inspected.
    pub async fn exec(
        &self,
        id: &str,
        cmd: Vec<String>,
        cwd: Option<String>,
        env: HashMap<String, String>,
        limits: ExecLimits,
    ) -> Result<ExecOutcome> {
        let start = Instant::now();
        let sandbox = self
            .registry
            .lookup(id)
            .await
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))?;

        let deadline = tokio::time::Instant::now() + limits.timeout;

        let working_dir = match cwd {
            Some(dir) if !dir.is_empty() => dir,
            _ => WORKSPACE_DIR.to_string(),
        };
        let env: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        debug!("exec in sandbox {}: {:?}", id, cmd);

        let options = CreateExecOptions {
            cmd: Some(cmd),
            working_dir: Some(working_dir),
            env: Some(env),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = tokio::time::timeout_at(deadline, self.docker.create_exec(&sandbox.container_id, options))
            .await
            .map_err(|_| SandboxError::ExecTimeout {
                timeout_ms: limits.timeout_ms(),
            })?
            .map_err(|e| SandboxError::ExecFailed(format!("exec create failed: {e}")))?;

        let started = tokio::time::timeout_at(deadline, self.docker.start_exec(&exec.id, None))
            .await
            .map_err(|_| SandboxError::ExecTimeout {
                timeout_ms: limits.timeout_ms(),
            })?
            .map_err(|e| SandboxError::ExecFailed(format!("exec attach failed: {e}")))?;

        let mut stdout = LimitedSink::new(limits.max_stdout);
        let mut stderr = LimitedSink::new(limits.max_stderr);

        let timed_out = match started {
            StartExecResults::Attached { output, .. } => {
                drain_demuxed(output, &mut stdout, &mut stderr, deadline).await
            }
            StartExecResults::Detached => {
                return Err(SandboxError::ExecFailed(
                    "exec was detached unexpectedly".to_string(),
                ))
            }
        };

        // Partial results are always returned: an inspect failure (or an exec
        // still running after the deadline) reports exit code -1.
        let exit_code = match self.docker.inspect_exec(&exec.id).await {
            Ok(inspect) => inspect.exit_code.unwrap_or(-1),
            Err(e) => {
                debug!("exec inspect failed for {}: {}", exec.id, e);
                -1
            }
        };

        let stdout_truncated = stdout.truncated();
        let stderr_truncated = stderr.truncated();
        Ok(ExecOutcome {
            stdout: stdout.into_bytes(),
            stderr: stderr.into_bytes(),
            exit_code,
            timed_out,
            stdout_truncated,
            stderr_truncated,
            duration: start.elapsed(),
        })
    }

    /// Write `content` to `path` inside the sandbox, creating parent
    /// directories. The payload travels base64-encoded over the exec's
    /// stdin; the path is passed as an argv word, never spliced into shell
    /// text.
    pub async fn write_file(&self, id: &str, path: &str, content: &[u8]) -> Result<()> {
        let sandbox = self
            .registry
            .lookup(id)
            .await
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))?;

        let encoded = STANDARD.encode(content);
        let cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"mkdir -p "$(dirname "$1")" && base64 -d > "$1""#.to_string(),
            "sh".to_string(),
            path.to_string(),
        ];

        let out = self
            .run_captured(&sandbox.container_id, cmd, Some(encoded.into_bytes()))
            .await?;
        if out.exit_code != 0 {
            return Err(SandboxError::IoFailed {
                message: format!("write {} failed with exit code {}", path, out.exit_code),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }

        debug!("wrote {} bytes to {}:{}", content.len(), id, path);
        Ok(())
    }

    /// Read a file from the sandbox, returning its bytes verbatim.
    pub async fn read_file(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let sandbox = self
            .registry
            .lookup(id)
            .await
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))?;

        let cmd = vec!["cat".to_string(), path.to_string()];
        let out = self.run_captured(&sandbox.container_id, cmd, None).await?;
        if out.exit_code != 0 {
            return Err(SandboxError::IoFailed {
                message: format!("read {} failed with exit code {}", path, out.exit_code),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }

        Ok(out.stdout)
    }

    /// List the first-level children of `path` inside the sandbox.
    ///
    /// A failed listing yields an empty set and stderr from the find
    /// pipeline is discarded; existing clients depend on both.
    pub async fn list_dir(&self, id: &str, path: &str) -> Result<Vec<FileEntry>> {
        let sandbox = self
            .registry
            .lookup(id)
            .await
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))?;

        let cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"find "$1" -maxdepth 1 -printf '%f\t%s\t%Y\t%T@\n' 2>/dev/null | tail -n +2"#
                .to_string(),
            "sh".to_string(),
            path.to_string(),
        ];

        let out = self.run_captured(&sandbox.container_id, cmd, None).await?;
        Ok(parse_listing(path, &out.stdout))
    }

    /// Remove the sandbox: registry first, then the container. A concurrent
    /// second delete observes not-found rather than re-entering removal.
    pub async fn delete_sandbox(&self, id: &str) -> Result<()> {
        let sandbox = self
            .registry
            .remove(id)
            .await
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))?;

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self
            .docker
            .remove_container(&sandbox.container_id, Some(options))
            .await
        {
            Ok(()) => {
                info!("deleted sandbox {}", id);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("container for sandbox {} already removed", id);
                Ok(())
            }
            Err(e) => Err(SandboxError::DeleteFailed(e.to_string())),
        }
    }

    pub async fn lookup(&self, id: &str) -> Option<Sandbox> {
        self.registry.lookup(id).await
    }

    /// Snapshot of sandbox ids past their expiry.
    pub async fn expired_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        self.registry.expired_ids(now).await
    }

    /// Container handle for `id`. Terminal-bridge accessor: the bridge takes
    /// the handle once and then talks to the runtime client directly.
    pub async fn get_handle(&self, id: &str) -> Result<String> {
        self.registry
            .lookup(id)
            .await
            .map(|sb| sb.container_id)
            .ok_or_else(|| SandboxError::NotFound(id.to_string()))
    }

    /// The underlying runtime client, for streaming paths that bypass the
    /// adapter (terminal bridge).
    pub fn raw_client(&self) -> &Docker {
        &self.docker
    }

    /// Pull the image unless it is already present locally. Blocks until the
    /// pull stream completes; a transient pull failure fails the call.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!("image {} already present", image);
            return Ok(());
        }

        info!("pulling image {}", image);
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut pull = self.docker.create_image(Some(options), None, None);

        let pulled = tokio::time::timeout(self.pull_timeout, async {
            while let Some(progress) = pull.next().await {
                let info = progress.map_err(|e| {
                    SandboxError::ContainerCreateFailed(format!(
                        "failed to pull image {image}: {e}"
                    ))
                })?;
                if let Some(error) = info.error {
                    return Err(SandboxError::ContainerCreateFailed(format!(
                        "failed to pull image {image}: {error}"
                    )));
                }
            }
            Ok(())
        })
        .await;

        match pulled {
            Ok(result) => result,
            Err(_) => Err(SandboxError::ContainerCreateFailed(format!(
                "timed out pulling image {image} after {:?}",
                self.pull_timeout
            ))),
        }
    }

    /// Run a command to completion, optionally feeding bytes to its stdin,
    /// and collect both output streams without caps.
    async fn run_captured(
        &self,
        container_id: &str,
        cmd: Vec<String>,
        stdin: Option<Vec<u8>>,
    ) -> Result<CapturedCommand> {
        let options = CreateExecOptions {
            cmd: Some(cmd),
            attach_stdin: Some(stdin.is_some()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, options)
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("exec create failed: {e}")))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("exec attach failed: {e}")))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match started {
            StartExecResults::Attached {
                mut output,
                mut input,
            } => {
                if let Some(payload) = stdin {
                    input
                        .write_all(&payload)
                        .await
                        .map_err(|e| SandboxError::ExecFailed(format!("exec stdin write failed: {e}")))?;
                    // half-close so the container side sees EOF
                    input
                        .shutdown()
                        .await
                        .map_err(|e| SandboxError::ExecFailed(format!("exec stdin close failed: {e}")))?;
                }

                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                        Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                        Ok(LogOutput::Console { message }) => stdout.extend_from_slice(&message),
                        Ok(_) => {}
                        Err(e) => {
                            warn!("exec output stream error: {}", e);
                            break;
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(SandboxError::ExecFailed(
                    "exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::ExecFailed(format!("exec inspect failed: {e}")))?;

        Ok(CapturedCommand {
            stdout,
            stderr,
            exit_code: inspect.exit_code.unwrap_or(-1),
        })
    }

    /// Best-effort removal of a container that never became a sandbox.
    async fn force_remove(&self, container_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(container_id, Some(options)).await {
            warn!("failed to remove container {}: {}", container_id, e);
        }
    }
}

/// Short opaque sandbox id: 8 hex chars, unique within the process.
fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn parse_listing(path: &str, raw: &[u8]) -> Vec<FileEntry> {
    let text = String::from_utf8_lossy(raw);
    let mut files = Vec::new();
    for line in text.lines() {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 4 {
            continue;
        }
        let name = parts[0];
        if name.is_empty() {
            continue;
        }
        files.push(FileEntry {
            name: name.to_string(),
            path: format!("{path}/{name}"),
            is_dir: parts[2] == "d",
            size: parts[1].parse().unwrap_or(0),
        });
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_shape() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(short_id(), short_id());
    }

    #[test]
    fn test_parse_listing() {
        let raw = b"b.txt\t5\tf\t1700000000.0\nsub\t4096\td\t1700000000.0\n";
        let files = parse_listing("/workspace/a", raw);
        assert_eq!(
            files,
            vec![
                FileEntry {
                    name: "b.txt".to_string(),
                    path: "/workspace/a/b.txt".to_string(),
                    is_dir: false,
                    size: 5,
                },
                FileEntry {
                    name: "sub".to_string(),
                    path: "/workspace/a/sub".to_string(),
                    is_dir: true,
                    size: 4096,
                },
            ]
        );
    }

    #[test]
    fn test_parse_listing_skips_short_lines() {
        let raw = b"only\ttwo\n\nc.txt\t12\tf\t1700000000.0\n";
        let files = parse_listing("/tmp", raw);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "c.txt");
        assert_eq!(files[0].size, 12);
    }

    #[test]
    fn test_parse_listing_empty_output() {
        assert!(parse_listing("/tmp", b"").is_empty());
    }

    #[test]
    fn test_parse_listing_bad_size_defaults_to_zero() {
        let raw = b"weird\tnot-a-number\tf\t1700000000.0\n";
        let files = parse_listing("/tmp", raw);
        assert_eq!(files[0].size, 0);
    }
}
