//! RuntimeActor - supervises one compiler worker.
//!
//! Owns all mutable runtime state: the worker process handle, the RPC
//! channel once the handshake lands, and the single in-flight compile
//! entry. Every state transition funnels through this actor's mailbox, so
//! no other synchronization exists anywhere in the crate.
//!
//! Work that would block the mailbox runs elsewhere and reports back as
//! messages: the connection establisher (one detached task per launch) and
//! at most one compile task at a time.

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tracing::{info, warn};

use quarry_proto::{CallRequest, Diagnostic, ParentIdentity};

use crate::compile;
use crate::config::{LaunchMode, RuntimeConfig};
use crate::error::RuntimeError;
use crate::handshake::{self, HandshakePlan};
use crate::launcher::{self, WorkerProcess};
use crate::output::SharedSink;
use crate::registry::{self, ExtensionEvent, RuntimeNotice};
use crate::rpc::RpcChannel;

/// Connection phase. There is no automatic path out of `Down`; recovery is
/// a higher layer's decision, taken on the published lifecycle notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Initial state; the establisher is still retrying.
    Connecting,
    /// Handshake succeeded; calls are accepted.
    Ready,
    /// Worker died, channel lost, or handshake budget exhausted.
    Down,
}

/// Messages handled by RuntimeActor.
#[derive(Debug)]
pub enum RuntimeMsg {
    /// Non-blocking readiness query.
    IsReady(RpcReplyPort<bool>),

    /// Synchronous remote call; the caller blocks on the reply port.
    Call {
        request: CallRequest,
        reply: RpcReplyPort<Result<serde_json::Value, RuntimeError>>,
    },

    /// Drive one compile in the worker and fan out its diagnostics.
    Compile {
        reply: RpcReplyPort<Result<Vec<Diagnostic>, RuntimeError>>,
    },

    /// From the establisher: the handshake landed.
    Connected { channel: RpcChannel },

    /// From the establisher: the attempt budget ran out (or the worker
    /// rejected the parent identity).
    HandshakeFailed { attempts: u32 },

    /// From the compile task watcher: the task reported its result.
    CompileFinished {
        task_id: String,
        result: Result<Vec<Diagnostic>, RuntimeError>,
    },

    /// From the compile task watcher: the task died before reporting.
    CompileAborted { task_id: String, reason: String },

    /// Raw chunk from the worker's stdout/stderr relay.
    WorkerOutput { chunk: String },

    /// From the exit watcher: the worker process terminated.
    WorkerExited { status: Option<i32> },

    /// From the channel watch: the established connection dropped.
    ConnectionClosed { reason: String },
}

/// Arguments for spawning RuntimeActor.
pub struct RuntimeArguments {
    pub config: RuntimeConfig,
    pub sink: SharedSink,
}

pub struct RuntimeState {
    config: RuntimeConfig,
    instance: String,
    #[allow(dead_code)]
    parent: ParentIdentity,
    phase: Phase,
    worker: Option<WorkerProcess>,
    channel: Option<RpcChannel>,
    pending_compile: Option<PendingCompile>,
    sink: SharedSink,
}

/// The single in-flight compile: task id mapped to the waiting caller.
struct PendingCompile {
    task_id: String,
    reply: RpcReplyPort<Result<Vec<Diagnostic>, RuntimeError>>,
}

#[derive(Debug, Default)]
pub struct RuntimeActor;

#[async_trait]
impl Actor for RuntimeActor {
    type Msg = RuntimeMsg;
    type State = RuntimeState;
    type Arguments = RuntimeArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let RuntimeArguments { config, sink } = args;

        let instance = launcher::generate_instance_name(&config.product);
        let parent = ParentIdentity::new(instance.clone(), std::process::id());

        let (worker, port) = match config.launch {
            LaunchMode::Spawn => {
                let port = launcher::reserve_rpc_port(&config.host)?;
                let worker =
                    launcher::spawn_worker(&config, &parent, &instance, port, myself.clone())?;
                (Some(worker), port)
            }
            LaunchMode::Attach { port } => {
                info!(%instance, port, "attaching to externally managed worker");
                (None, port)
            }
        };

        let plan = HandshakePlan::for_config(&config, instance.clone(), port, parent.clone());
        tokio::spawn(handshake::establish(plan, myself.clone()));

        Ok(RuntimeState {
            config,
            instance,
            parent,
            phase: Phase::Connecting,
            worker,
            channel: None,
            pending_compile: None,
            sink,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RuntimeMsg::IsReady(reply) => {
                let _ = reply.send(state.phase == Phase::Ready);
            }
            RuntimeMsg::Call { request, reply } => self.handle_call(request, reply, state).await,
            RuntimeMsg::Compile { reply } => self.handle_compile(myself, reply, state),
            RuntimeMsg::Connected { channel } => self.handle_connected(channel, state),
            RuntimeMsg::HandshakeFailed { attempts } => {
                self.handle_handshake_failed(attempts, state)
            }
            RuntimeMsg::CompileFinished { task_id, result } => {
                self.handle_compile_finished(task_id, result, state)
            }
            RuntimeMsg::CompileAborted { task_id, reason } => self.handle_compile_finished(
                task_id,
                Err(RuntimeError::CompileTaskFailed(reason)),
                state,
            ),
            RuntimeMsg::WorkerOutput { chunk } => state.sink.output(&chunk),
            RuntimeMsg::WorkerExited { status } => self.handle_worker_exited(status, state),
            RuntimeMsg::ConnectionClosed { reason } => {
                self.handle_connection_closed(reason, state)
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(worker) = state.worker.as_mut() {
            worker.kill();
        }
        info!(instance = %state.instance, "worker runtime stopped");
        Ok(())
    }
}

impl RuntimeActor {
    /// Forward a remote call over the established channel, blocking the
    /// caller (not the runtime's other operations) until the worker
    /// replies. Before readiness this fails immediately; it never waits.
    async fn handle_call(
        &self,
        request: CallRequest,
        reply: RpcReplyPort<Result<serde_json::Value, RuntimeError>>,
        state: &mut RuntimeState,
    ) {
        let channel = match (&state.phase, &state.channel) {
            (Phase::Ready, Some(channel)) => channel.clone(),
            _ => {
                let _ = reply.send(Err(RuntimeError::NotReady));
                return;
            }
        };

        let result = channel.call(request).await;
        let _ = reply.send(result);
    }

    /// Schedule the compile task and record the caller's reply slot before
    /// the mailbox is released, so the completion message matches exactly
    /// one caller. Only one compile may be in flight.
    fn handle_compile(
        &self,
        myself: ActorRef<RuntimeMsg>,
        reply: RpcReplyPort<Result<Vec<Diagnostic>, RuntimeError>>,
        state: &mut RuntimeState,
    ) {
        let channel = match (&state.phase, &state.channel) {
            (Phase::Ready, Some(channel)) => channel.clone(),
            _ => {
                let _ = reply.send(Err(RuntimeError::NotReady));
                return;
            }
        };

        if let Some(pending) = &state.pending_compile {
            warn!(
                instance = %state.instance,
                in_flight = %pending.task_id,
                "compile requested while one is in flight"
            );
            let _ = reply.send(Err(RuntimeError::CompileInFlight));
            return;
        }

        let task_id = ulid::Ulid::new().to_string();
        let topic = state.config.registry_topic.clone();
        let task = tokio::spawn(compile::run(channel, topic));

        let watcher_id = task_id.clone();
        tokio::spawn(async move {
            match task.await {
                Ok(result) => {
                    let _ = myself.cast(RuntimeMsg::CompileFinished {
                        task_id: watcher_id,
                        result,
                    });
                }
                Err(e) => {
                    let _ = myself.cast(RuntimeMsg::CompileAborted {
                        task_id: watcher_id,
                        reason: e.to_string(),
                    });
                }
            }
        });

        info!(instance = %state.instance, task_id = %task_id, "compile task scheduled");
        state.pending_compile = Some(PendingCompile { task_id, reply });
    }

    fn handle_connected(&self, channel: RpcChannel, state: &mut RuntimeState) {
        let address = channel.address().to_string();
        if state.phase == Phase::Ready {
            warn!(instance = %state.instance, %address, "duplicate connection report; replacing channel");
        }

        info!(instance = %state.instance, %address, "worker runtime ready");
        state.sink.control(&format!("connected to worker at {address}"));
        state.channel = Some(channel);
        state.phase = Phase::Ready;

        registry::publish(
            &state.config.registry_topic,
            ExtensionEvent::Notice(RuntimeNotice::Ready { address }),
        );
    }

    fn handle_handshake_failed(&self, attempts: u32, state: &mut RuntimeState) {
        state.sink.control(&format!(
            "handshake with worker failed after {attempts} attempts"
        ));
        state.phase = Phase::Down;

        registry::publish(
            &state.config.registry_topic,
            ExtensionEvent::Notice(RuntimeNotice::HandshakeFailed { attempts }),
        );
    }

    /// Match a compile outcome back to the recorded caller. A stale id
    /// means the bookkeeping was already cleared (worker death beat the
    /// task's own failure report); the outcome is dropped.
    fn handle_compile_finished(
        &self,
        task_id: String,
        result: Result<Vec<Diagnostic>, RuntimeError>,
        state: &mut RuntimeState,
    ) {
        match state.pending_compile.take() {
            Some(pending) if pending.task_id == task_id => {
                let _ = pending.reply.send(result);
            }
            Some(pending) => {
                warn!(
                    instance = %state.instance,
                    expected = %pending.task_id,
                    got = %task_id,
                    "compile report for unknown task id"
                );
                state.pending_compile = Some(pending);
            }
            None => {
                tracing::debug!(instance = %state.instance, task_id = %task_id, "late compile report dropped");
            }
        }
    }

    fn handle_worker_exited(&self, status: Option<i32>, state: &mut RuntimeState) {
        warn!(instance = %state.instance, ?status, "worker process terminated");
        state.sink.control(&match status {
            Some(code) => format!("worker process exited with status {code}"),
            None => "worker process terminated by signal".to_string(),
        });

        if let Some(pending) = state.pending_compile.take() {
            let _ = pending.reply.send(Err(RuntimeError::WorkerCrashed { status }));
        }
        state.worker = None;
        state.channel = None;
        state.phase = Phase::Down;

        registry::publish(
            &state.config.registry_topic,
            ExtensionEvent::Notice(RuntimeNotice::WorkerTerminated { status }),
        );
    }

    fn handle_connection_closed(&self, reason: String, state: &mut RuntimeState) {
        // Already cleaned up by a worker-exit notification, or the notice
        // belongs to a channel this runtime no longer holds.
        match &state.channel {
            None => return,
            Some(channel) if !channel.is_closed() => {
                tracing::debug!(instance = %state.instance, "stale connection-closed notice ignored");
                return;
            }
            Some(_) => {}
        }

        warn!(instance = %state.instance, reason = %reason, "worker channel lost");
        state.sink.control(&format!("worker channel lost: {reason}"));

        if let Some(pending) = state.pending_compile.take() {
            let _ = pending
                .reply
                .send(Err(RuntimeError::Transport(reason.clone())));
        }
        state.channel = None;
        state.phase = Phase::Down;

        registry::publish(
            &state.config.registry_topic,
            ExtensionEvent::Notice(RuntimeNotice::ConnectionLost { reason }),
        );
    }
}
