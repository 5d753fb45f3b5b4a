use std::path::PathBuf;

/// Errors surfaced to callers of the runtime's public operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The worker connection has not been established (or has been lost).
    /// Recoverable: poll readiness and retry.
    #[error("worker runtime is not ready")]
    NotReady,

    /// A compile is already outstanding; only one may be in flight.
    #[error("a compile is already in flight")]
    CompileInFlight,

    /// The worker process terminated while the operation was outstanding.
    #[error("worker process terminated{}", exit_suffix(.status))]
    WorkerCrashed { status: Option<i32> },

    /// The compile task's execution unit died before reporting a result.
    #[error("compile task aborted before reporting: {0}")]
    CompileTaskFailed(String),

    /// The channel to the worker failed at the transport level.
    #[error("worker channel transport error: {0}")]
    Transport(String),

    /// The worker executed the call and reported an error payload.
    #[error("remote call failed: {0}")]
    Remote(String),

    /// The supervisor actor itself is unreachable or stopped.
    #[error("runtime supervisor unavailable: {0}")]
    Supervisor(String),

    /// A worker reply could not be decoded into the expected shape.
    #[error("malformed worker reply: {0}")]
    Decode(#[from] serde_json::Error),
}

fn exit_suffix(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!(" with exit status {code}"),
        None => String::new(),
    }
}

/// Startup failures from the process launcher. These abort `pre_start`, so
/// they surface directly out of `Actor::spawn` to whoever starts the
/// supervisor.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn worker executable {executable}: {source}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to reserve an RPC port for the worker: {0}")]
    PortReservation(std::io::Error),

    #[error("worker process has no accessible stdio pipes")]
    MissingPipes,
}
