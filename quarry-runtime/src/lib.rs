//! # quarry-runtime
//!
//! Worker runtime supervisor for the Quarry extension host.
//!
//! The runtime launches the external compiler worker as a child process,
//! establishes a remote-call channel to it through a retrying handshake,
//! and then exposes two operations on top of that channel: a synchronous
//! remote call, and a single-flight `compile` whose diagnostics are fanned
//! out to every subscriber registered on the extension topic.
//!
//! ## Architecture
//! ```text
//!   caller ──call/compile──▶ RuntimeActor (one mailbox, all state)
//!                               │   ▲
//!              spawns           │   │ Connected / WorkerExited /
//!              ┌────────────────┤   │ CompileFinished / output chunks
//!              ▼                ▼   │
//!       worker process    establisher + compile task (tokio tasks)
//!              │                │
//!              └── stdout/err ──┘        diagnostics ──▶ registry topic
//! ```
//!
//! All mutable state (process handle, channel, the one pending compile) is
//! owned by [`supervisor::RuntimeActor`] and mutated only inside its
//! message loop. Background tasks never touch state; they report back with
//! messages.
//!
//! ## Example
//! ```no_run
//! use quarry_proto::CallRequest;
//! use quarry_runtime::{Runtime, RuntimeConfig};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), quarry_runtime::RuntimeError> {
//! let config = RuntimeConfig::new("/opt/quarry/worker", "/tmp/proj")
//!     .with_install_dir("/opt/quarry");
//! let runtime = Runtime::start(config).await?;
//!
//! runtime.await_ready(50).await;
//! let len = runtime
//!     .call(CallRequest::new("kernel", "length", vec![json!([1, 2, 3])]))
//!     .await?;
//! let diagnostics = runtime.compile().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod launcher;
pub mod output;
pub mod registry;
pub mod rpc;
pub mod runtime;
pub mod supervisor;

mod compile;
mod handshake;

pub use config::{LaunchMode, RuntimeConfig};
pub use error::{LaunchError, RuntimeError};
pub use output::{OutputSink, SharedSink, TracingSink};
pub use registry::{ExtensionEvent, RuntimeNotice};
pub use rpc::{RpcChannel, WorkerAddress};
pub use runtime::{ReadyWait, Runtime, DEFAULT_READY_ATTEMPTS};
pub use supervisor::{Phase, RuntimeActor, RuntimeArguments, RuntimeMsg};
