use std::path::PathBuf;
use std::time::Duration;

/// How the supervisor obtains its worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// Spawn the worker executable as a child process (the normal mode).
    Spawn,
    /// Attach to a worker that is already running and listening on `port`.
    /// The supervisor runs the full handshake but owns no OS process.
    Attach { port: u16 },
}

/// Configuration for one worker runtime.
///
/// The executable path is an explicit value resolved once by the owning
/// process; the runtime never derives it from its own install location or
/// other ambient state.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Product name, used for the embedded-server env selector and as the
    /// instance-name prefix.
    pub product: String,
    /// Path to the worker executable (the host-language runtime).
    pub worker_executable: PathBuf,
    /// Build tool driven through the worker's interactive session.
    pub build_tool: String,
    /// Working directory the worker is spawned in (the project root).
    pub working_dir: PathBuf,
    /// Install directory holding bundled worker-side sources (the compiler
    /// shim lives under `shims/` here).
    pub install_dir: PathBuf,
    /// Host the worker's RPC endpoint resolves on.
    pub host: String,
    /// Environment profile the worker builds under.
    pub env_profile: String,
    /// Build/output directory pinned for the worker, relative to its
    /// working directory.
    pub build_root: PathBuf,
    /// Subscriber-registry topic compiler diagnostics are fanned out to.
    pub registry_topic: String,
    /// Maximum connection attempts before the handshake gives up.
    pub handshake_attempts: u32,
    /// Fixed delay between connection attempts.
    pub handshake_interval: Duration,
    pub launch: LaunchMode,
}

impl RuntimeConfig {
    /// A runtime for the project at `working_dir`, spawning `worker_executable`.
    pub fn new(worker_executable: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            product: "quarry".to_string(),
            worker_executable: worker_executable.into(),
            build_tool: "mill".to_string(),
            working_dir: working_dir.into(),
            install_dir: PathBuf::from("."),
            host: "127.0.0.1".to_string(),
            env_profile: "dev".to_string(),
            build_root: PathBuf::from(".quarry/_build"),
            registry_topic: "extension".to_string(),
            handshake_attempts: 120,
            handshake_interval: Duration::from_secs(1),
            launch: LaunchMode::Spawn,
        }
    }

    pub fn with_install_dir(mut self, install_dir: impl Into<PathBuf>) -> Self {
        self.install_dir = install_dir.into();
        self
    }

    pub fn with_registry_topic(mut self, topic: impl Into<String>) -> Self {
        self.registry_topic = topic.into();
        self
    }

    pub fn with_launch(mut self, launch: LaunchMode) -> Self {
        self.launch = launch;
        self
    }

    pub fn with_handshake(mut self, attempts: u32, interval: Duration) -> Self {
        self.handshake_attempts = attempts;
        self.handshake_interval = interval;
        self
    }

    /// The bundled worker-side source whose sole export is the zero-argument
    /// `compile` entry point.
    pub fn compiler_shim_path(&self) -> PathBuf {
        self.install_dir.join("shims").join("compiler_shim")
    }

    /// Env var carrying the encoded parent identity, e.g. `QUARRY_PARENT_PID`.
    pub fn parent_env_var(&self) -> String {
        format!("{}_PARENT_PID", self.product.to_uppercase())
    }

    pub fn env_profile_var(&self) -> String {
        format!("{}_ENV", self.product.to_uppercase())
    }

    pub fn build_root_var(&self) -> String {
        format!("{}_BUILD_ROOT", self.product.to_uppercase())
    }

    pub fn rpc_port_var(&self) -> String {
        format!("{}_RPC_PORT", self.product.to_uppercase())
    }
}
