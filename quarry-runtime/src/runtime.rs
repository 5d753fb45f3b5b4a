//! Public handle for embedders.
//!
//! Wraps the supervisor's `ActorRef` behind blocking-call ergonomics: the
//! readiness poll, the synchronous remote call, and the compile request
//! that looks synchronous to its caller but runs as a correlated task
//! inside the runtime.

use std::time::Duration;

use ractor::{Actor, ActorRef};
use tokio::task::JoinHandle;

use quarry_proto::{CallRequest, Diagnostic};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::output::{SharedSink, TracingSink};
use crate::supervisor::{RuntimeActor, RuntimeArguments, RuntimeMsg};

/// Outcome of [`Runtime::await_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyWait {
    Ready,
    Timeout,
}

const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_READY_ATTEMPTS: u32 = 50;

/// A running worker runtime.
#[derive(Debug)]
pub struct Runtime {
    actor: ActorRef<RuntimeMsg>,
    handle: JoinHandle<()>,
}

impl Runtime {
    /// Launch the runtime with the default tracing log sink. Fails if the
    /// worker executable cannot be spawned.
    pub async fn start(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Self::start_with_sink(config, std::sync::Arc::new(TracingSink)).await
    }

    pub async fn start_with_sink(
        config: RuntimeConfig,
        sink: SharedSink,
    ) -> Result<Self, RuntimeError> {
        let (actor, handle) = Actor::spawn(None, RuntimeActor, RuntimeArguments { config, sink })
            .await
            .map_err(|e| RuntimeError::Supervisor(e.to_string()))?;
        Ok(Self { actor, handle })
    }

    /// True iff the handshake has completed and the runtime accepts calls.
    pub async fn ready(&self) -> bool {
        ractor::call!(self.actor, RuntimeMsg::IsReady).unwrap_or(false)
    }

    /// Poll readiness with a fixed 500 ms sleep between checks, up to
    /// `max_attempts` checks. Returns as soon as readiness is observed;
    /// never sleeps after the final check.
    pub async fn await_ready(&self, max_attempts: u32) -> ReadyWait {
        for attempt in 1..=max_attempts.max(1) {
            if self.ready().await {
                return ReadyWait::Ready;
            }
            if attempt < max_attempts {
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        }
        ReadyWait::Timeout
    }

    /// Forward `request` to the worker and block until it replies. Fails
    /// immediately with `NotReady` before the handshake completes.
    pub async fn call(&self, request: CallRequest) -> Result<serde_json::Value, RuntimeError> {
        ractor::call!(self.actor, |reply| RuntimeMsg::Call { request, reply })
            .map_err(|e| RuntimeError::Supervisor(e.to_string()))?
    }

    /// Compile the project in the worker and return the diagnostics. The
    /// same diagnostics are fanned out to every registry subscriber. At
    /// most one compile runs at a time; concurrent requests fail with
    /// `CompileInFlight`.
    pub async fn compile(&self) -> Result<Vec<Diagnostic>, RuntimeError> {
        ractor::call!(self.actor, |reply| RuntimeMsg::Compile { reply })
            .map_err(|e| RuntimeError::Supervisor(e.to_string()))?
    }

    /// The raw actor reference, for embedders that speak messages directly.
    pub fn actor(&self) -> &ActorRef<RuntimeMsg> {
        &self.actor
    }

    /// Stop the supervisor; the worker process is terminated on the way
    /// down.
    pub async fn shutdown(self) {
        self.actor.stop(Some("runtime shutdown".to_string()));
        let _ = self.handle.await;
    }
}
