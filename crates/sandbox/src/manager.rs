//! Sandbox session manager — one long-lived container per conversation.
//!
//! Sessions are named `{dd-mm-yyyy}-{session_id}` so leftovers from prior
//! days are visibly distinct, share a single rw bind mount with the host
//! data directory, and are created lazily on first use. `release` is the
//! only teardown point and is idempotent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use hermes_domain::config::{PathsConfig, SandboxConfig};
use hermes_domain::{Error, Result};

/// One chunk of streamed command output.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub text: String,
    pub is_error: bool,
}

pub struct SandboxManager {
    config: SandboxConfig,
    /// Host side of the bind mount, resolved once at startup.
    host_data_dir: String,
    /// Daemon connection, established on first use.
    client: tokio::sync::OnceCell<Docker>,
    /// Per-session creation locks: `acquire` must be idempotent under
    /// concurrent callers.
    session_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SandboxManager {
    pub fn new(config: SandboxConfig, paths: &PathsConfig) -> Self {
        let host_data_dir = config
            .host_data_dir(paths)
            .to_string_lossy()
            .into_owned();
        Self {
            config,
            host_data_dir,
            client: tokio::sync::OnceCell::new(),
            session_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Container name for a session: `{dd-mm-yyyy}-{session_id}`.
    pub fn container_name(session_id: &str) -> String {
        let date = chrono::Local::now().format("%d-%m-%Y");
        format!("{date}-{session_id}")
    }

    // ── Daemon connection ─────────────────────────────────────────

    /// Probe the daemon: local socket (or named pipe) first, then TCP
    /// (`DOCKER_HOST`).
    async fn docker(&self) -> Result<&Docker> {
        self.client
            .get_or_try_init(|| async {
                if let Ok(docker) = Docker::connect_with_local_defaults() {
                    if docker.ping().await.is_ok() {
                        tracing::info!("sandbox runtime reachable over local socket");
                        return Ok(docker);
                    }
                }
                match Docker::connect_with_http_defaults() {
                    Ok(docker) => match docker.ping().await {
                        Ok(_) => {
                            tracing::info!("sandbox runtime reachable over TCP");
                            Ok(docker)
                        }
                        Err(e) => Err(Error::SandboxUnavailable(e.to_string())),
                    },
                    Err(e) => Err(Error::SandboxUnavailable(e.to_string())),
                }
            })
            .await
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.session_locks
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Get or create the running session container. Idempotent; safe to
    /// call concurrently. First creation may block on an image pull.
    pub async fn acquire(&self, session_id: &str) -> Result<String> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let docker = self.docker().await?;
        let name = Self::container_name(session_id);

        match docker.inspect_container(&name, None).await {
            Ok(inspect) => {
                let running = inspect
                    .state
                    .and_then(|s| s.running)
                    .unwrap_or(false);
                if !running {
                    tracing::info!(session_id, container = %name, "restarting stopped session");
                    docker
                        .start_container(&name, None::<StartContainerOptions<String>>)
                        .await
                        .map_err(sandbox_err)?;
                }
                Ok(name)
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => self.create_session(docker, session_id, &name).await,
            Err(e) => Err(sandbox_err(e)),
        }
    }

    async fn create_session(
        &self,
        docker: &Docker,
        session_id: &str,
        name: &str,
    ) -> Result<String> {
        let image = self.ensure_image(docker).await?;
        tracing::info!(session_id, container = %name, image = %image, "creating session container");

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}:rw",
                self.host_data_dir, self.config.data_mount
            )]),
            shm_size: Some((self.config.shm_size_mb * 1024 * 1024) as i64),
            ..Default::default()
        };

        docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    platform: None,
                }),
                Config {
                    image: Some(image),
                    // Keep the container alive between exec calls.
                    cmd: Some(vec!["tail".into(), "-f".into(), "/dev/null".into()]),
                    working_dir: Some(self.config.data_mount.clone()),
                    host_config: Some(host_config),
                    ..Default::default()
                },
            )
            .await
            .map_err(sandbox_err)?;

        docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(sandbox_err)?;

        tracing::info!(session_id, container = %name, "session container running");
        Ok(name.to_string())
    }

    /// Make sure an image is locally available, preferring the configured
    /// sandbox image and falling back to the plain interpreter base image.
    async fn ensure_image(&self, docker: &Docker) -> Result<String> {
        for candidate in [&self.config.image, &self.config.fallback_image] {
            if docker.inspect_image(candidate).await.is_ok() {
                return Ok(candidate.clone());
            }
            if self.pull_image(docker, candidate).await {
                return Ok(candidate.clone());
            }
            tracing::warn!(image = %candidate, "image unavailable, trying fallback");
        }
        Err(Error::Sandbox(format!(
            "neither {} nor {} could be obtained",
            self.config.image, self.config.fallback_image
        )))
    }

    async fn pull_image(&self, docker: &Docker, image: &str) -> bool {
        tracing::info!(image, "pulling sandbox image");
        let mut stream = docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            if let Err(e) = progress {
                tracing::warn!(image, error = %e, "image pull failed");
                return false;
            }
        }
        true
    }

    /// Force-destroy the session. Idempotent; an absent container is success.
    pub async fn release(&self, session_id: &str) -> Result<()> {
        let docker = self.docker().await?;
        let name = Self::container_name(session_id);
        match docker
            .remove_container(
                &name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {
                tracing::info!(session_id, container = %name, "session released");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(sandbox_err(e)),
        }
    }

    // ── Execution ─────────────────────────────────────────────────

    /// Run a command in the session working directory, capturing stdout and
    /// stderr separately. On timeout the partial output is returned with
    /// exit code `None`.
    pub async fn run_command(
        &self,
        session_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<(Option<i64>, String, String)> {
        let name = self.acquire(session_id).await?;
        let docker = self.docker().await?;

        let exec = docker
            .create_exec(
                &name,
                CreateExecOptions {
                    cmd: Some(vec!["bash", "-lc", command]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(self.config.data_mount.as_str()),
                    ..Default::default()
                },
            )
            .await
            .map_err(sandbox_err)?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut timed_out = false;

        if let StartExecResults::Attached { mut output, .. } = docker
            .start_exec(&exec.id, None)
            .await
            .map_err(sandbox_err)?
        {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let item = tokio::select! {
                    item = output.next() => item,
                    _ = tokio::time::sleep_until(deadline) => {
                        timed_out = true;
                        break;
                    }
                };
                match item {
                    Some(Ok(LogOutput::StdOut { message })) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Some(Ok(LogOutput::StdErr { message })) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(sandbox_err(e)),
                    None => break,
                }
            }
        }

        if timed_out {
            // The exec stream is abandoned; the process is reaped when the
            // session is released.
            stderr.push_str("\n[tempo limite excedido]");
            return Ok((None, stdout, stderr));
        }

        let inspect = docker.inspect_exec(&exec.id).await.map_err(sandbox_err)?;
        Ok((inspect.exit_code, stdout, stderr))
    }

    /// Run a command delivering output incrementally through `chunks`.
    ///
    /// Cancellation is observed between chunks via `cancelled`; the combined
    /// output is also accumulated and returned. Exit code is `None` on
    /// timeout or cancellation.
    pub async fn run_streaming(
        &self,
        session_id: &str,
        command: &str,
        timeout: Duration,
        chunks: mpsc::Sender<OutputChunk>,
        cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<(Option<i64>, String)> {
        let name = self.acquire(session_id).await?;
        let docker = self.docker().await?;

        let exec = docker
            .create_exec(
                &name,
                CreateExecOptions {
                    cmd: Some(vec!["bash", "-lc", command]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(self.config.data_mount.as_str()),
                    ..Default::default()
                },
            )
            .await
            .map_err(sandbox_err)?;

        let mut combined = String::new();
        let mut finished = false;

        if let StartExecResults::Attached { mut output, .. } = docker
            .start_exec(&exec.id, None)
            .await
            .map_err(sandbox_err)?
        {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                if cancelled() {
                    combined.push_str("\n[cancelado]");
                    break;
                }
                let item = tokio::select! {
                    item = output.next() => item,
                    _ = tokio::time::sleep_until(deadline) => {
                        combined.push_str("\n[tempo limite excedido]");
                        break;
                    }
                };
                let (text, is_error) = match item {
                    Some(Ok(LogOutput::StdOut { message })) => {
                        (String::from_utf8_lossy(&message).into_owned(), false)
                    }
                    Some(Ok(LogOutput::StdErr { message })) => {
                        (String::from_utf8_lossy(&message).into_owned(), true)
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(sandbox_err(e)),
                    None => {
                        finished = true;
                        break;
                    }
                };
                combined.push_str(&text);
                // A closed receiver only stops the live feed, not the run.
                let _ = chunks.send(OutputChunk { text, is_error }).await;
            }
        } else {
            finished = true;
        }

        if !finished {
            return Ok((None, combined));
        }
        let inspect = docker.inspect_exec(&exec.id).await.map_err(sandbox_err)?;
        Ok((inspect.exit_code, combined))
    }

    /// Materialize `source` as a script inside the session, execute the
    /// interpreter streaming its output, and remove the file afterwards.
    pub async fn run_script(
        &self,
        session_id: &str,
        source: &str,
        timeout: Duration,
        chunks: mpsc::Sender<OutputChunk>,
        cancelled: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<(bool, String)> {
        let script_name = format!("script_{}.py", short_hex());

        // Hex transfer avoids every quoting and escaping pitfall of passing
        // arbitrary source through a shell argument.
        let encoded = hex::encode(source.as_bytes());
        let setup = format!(
            "if ! command -v xxd >/dev/null 2>&1; then \
             apt-get update >/dev/null 2>&1 && apt-get install -y xxd >/dev/null 2>&1; fi; \
             echo {encoded} | xxd -r -p > {script_name}"
        );
        let (code, _out, err) = self
            .run_command(session_id, &setup, Duration::from_secs(60))
            .await?;
        if code != Some(0) {
            return Ok((false, format!("Erro ao preparar script: {err}")));
        }

        let result = self
            .run_streaming(
                session_id,
                &format!("python3 {script_name}"),
                timeout,
                chunks,
                cancelled,
            )
            .await;

        // Best-effort cleanup regardless of how the run ended.
        let _ = self
            .run_command(
                session_id,
                &format!("rm -f {script_name}"),
                Duration::from_secs(10),
            )
            .await;

        let (exit_code, output) = result?;
        Ok((exit_code == Some(0), output))
    }
}

fn sandbox_err(e: bollard::errors::Error) -> Error {
    Error::Sandbox(e.to_string())
}

fn short_hex() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_is_date_prefixed() {
        let name = SandboxManager::container_name("conv-123");
        let date = chrono::Local::now().format("%d-%m-%Y").to_string();
        assert_eq!(name, format!("{date}-conv-123"));
    }

    #[test]
    fn host_data_dir_prefers_env_override() {
        let config = SandboxConfig {
            host_data_env: "HERMES_TEST_HOST_DATA".into(),
            ..Default::default()
        };
        let paths = PathsConfig::default();

        std::env::set_var("HERMES_TEST_HOST_DATA", "/srv/hermes/data");
        let manager = SandboxManager::new(config.clone(), &paths);
        assert_eq!(manager.host_data_dir, "/srv/hermes/data");
        std::env::remove_var("HERMES_TEST_HOST_DATA");

        let manager = SandboxManager::new(config, &paths);
        assert_eq!(
            manager.host_data_dir,
            paths.data_dir.to_string_lossy().as_ref()
        );
    }

    #[test]
    fn short_hex_is_eight_chars() {
        let a = short_hex();
        let b = short_hex();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn session_locks_are_per_session() {
        let manager =
            SandboxManager::new(SandboxConfig::default(), &PathsConfig::default());
        let a = manager.session_lock("a");
        let a2 = manager.session_lock("a");
        let b = manager.session_lock("b");
        assert!(Arc::ptr_eq(&a, &a2));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
