//! Worker process launcher.
//!
//! Spawns the compiler worker as a child OS process with the fixed
//! environment and argument contract, relays its merged output to the
//! supervisor, and watches for process exit.

use std::net::TcpListener;
use std::process::Stdio;

use bytes::BytesMut;
use ractor::ActorRef;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{error, info};

use quarry_proto::ParentIdentity;

use crate::config::RuntimeConfig;
use crate::error::LaunchError;
use crate::supervisor::RuntimeMsg;

/// A spawned worker. The `Child` itself lives in the exit-watcher task;
/// this handle keeps what the supervisor needs: addressing data and the
/// kill signal used at shutdown.
#[derive(Debug)]
pub struct WorkerProcess {
    pub instance: String,
    pub port: u16,
    pub pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
}

impl WorkerProcess {
    /// Terminate the worker. Idempotent; the actual kill happens in the
    /// exit-watcher task that owns the `Child`.
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// Unique instance name for addressing one worker, derived from a
/// monotonic timestamp so two launches never collide.
pub fn generate_instance_name(product: &str) -> String {
    format!("{product}-{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

/// Reserve an ephemeral localhost port for the worker's RPC endpoint. The
/// listener is dropped immediately; the worker binds the port itself after
/// reading it from the environment.
pub fn reserve_rpc_port(host: &str) -> Result<u16, LaunchError> {
    let listener = TcpListener::bind((host, 0)).map_err(LaunchError::PortReservation)?;
    let port = listener
        .local_addr()
        .map_err(LaunchError::PortReservation)?
        .port();
    Ok(port)
}

/// Spawn the worker for `config`, wiring stdout/stderr relays and the
/// exit watcher back into the supervisor's mailbox.
pub fn spawn_worker(
    config: &RuntimeConfig,
    parent: &ParentIdentity,
    instance: &str,
    port: u16,
    supervisor: ActorRef<RuntimeMsg>,
) -> Result<WorkerProcess, LaunchError> {
    let mut child = Command::new(&config.worker_executable)
        .current_dir(&config.working_dir)
        .env("LSP", &config.product)
        .env(config.parent_env_var(), parent.encode())
        .env(config.env_profile_var(), &config.env_profile)
        .env(config.build_root_var(), &config.build_root)
        .env(config.rpc_port_var(), port.to_string())
        .arg("--no-halt")
        .arg("--sname")
        .arg(instance)
        .arg("-S")
        .arg(&config.build_tool)
        .arg("loadpaths")
        .arg("--no-compile")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            error!(
                executable = %config.worker_executable.display(),
                instance,
                "failed to spawn worker: {e}"
            );
            LaunchError::Spawn {
                executable: config.worker_executable.clone(),
                source: e,
            }
        })?;

    let stdout = child.stdout.take().ok_or(LaunchError::MissingPipes)?;
    let stderr = child.stderr.take().ok_or(LaunchError::MissingPipes)?;
    tokio::spawn(relay_output(stdout, supervisor.clone()));
    tokio::spawn(relay_output(stderr, supervisor.clone()));

    let pid = child.id();
    let (kill_tx, kill_rx) = oneshot::channel();
    tokio::spawn(async move {
        let exited = tokio::select! {
            status = child.wait() => Some(status.ok().and_then(|s| s.code())),
            _ = kill_rx => None,
        };
        match exited {
            Some(status) => {
                let _ = supervisor.cast(RuntimeMsg::WorkerExited { status });
            }
            None => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    });

    info!(instance, port, pid, "worker spawned");
    Ok(WorkerProcess {
        instance: instance.to_string(),
        port,
        pid,
        kill: Some(kill_tx),
    })
}

/// Forward every chunk read from a worker output pipe to the supervisor,
/// verbatim. Runs until the pipe closes.
pub(crate) async fn relay_output<R>(mut pipe: R, supervisor: ActorRef<RuntimeMsg>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        buf.clear();
        match pipe.read_buf(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let chunk = String::from_utf8_lossy(&buf).into_owned();
                if supervisor.cast(RuntimeMsg::WorkerOutput { chunk }).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_names_are_unique_and_prefixed() {
        let a = generate_instance_name("quarry");
        let b = generate_instance_name("quarry");
        assert!(a.starts_with("quarry-"));
        assert!(b.starts_with("quarry-"));
        assert_ne!(a, b);
    }

    #[test]
    fn reserved_ports_are_nonzero() {
        let port = reserve_rpc_port("127.0.0.1").unwrap();
        assert_ne!(port, 0);
    }
}
