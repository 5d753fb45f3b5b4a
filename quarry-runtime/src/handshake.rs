//! Connection establisher.
//!
//! Turns a freshly spawned worker into a usable remote-call endpoint
//! without blocking the supervisor's mailbox: a detached task retries the
//! connection at a fixed interval, runs the bootstrap sequence, then hands
//! the channel to the supervisor and keeps watching it for loss.

use std::time::Duration;

use ractor::ActorRef;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use quarry_proto::{CallRequest, ParentIdentity};

use crate::config::RuntimeConfig;
use crate::rpc::{RpcChannel, WorkerAddress};
use crate::supervisor::RuntimeMsg;

pub(crate) struct HandshakePlan {
    pub address: WorkerAddress,
    pub parent: ParentIdentity,
    pub compiler_shim: std::path::PathBuf,
    pub attempts: u32,
    pub interval: Duration,
}

impl HandshakePlan {
    pub fn for_config(config: &RuntimeConfig, instance: String, port: u16, parent: ParentIdentity) -> Self {
        Self {
            address: WorkerAddress {
                instance,
                host: config.host.clone(),
                port,
            },
            parent,
            compiler_shim: config.compiler_shim_path(),
            attempts: config.handshake_attempts,
            interval: config.handshake_interval,
        }
    }
}

/// Run the retrying handshake against `plan.address`, reporting the outcome
/// to the supervisor. Spawned with `tokio::spawn`; never blocks the actor.
pub(crate) async fn establish(plan: HandshakePlan, supervisor: ActorRef<RuntimeMsg>) {
    let address = plan.address.clone();

    for attempt in 1..=plan.attempts {
        match RpcChannel::connect(address.clone()).await {
            Ok(channel) => {
                info!(address = %address, attempt, "worker channel established");
                if !bootstrap(&channel, &plan).await {
                    let _ = supervisor.cast(RuntimeMsg::HandshakeFailed {
                        attempts: attempt,
                    });
                    return;
                }

                let close_channel = channel.clone();
                let close_supervisor = supervisor.clone();
                let close_address = address.clone();
                tokio::spawn(async move {
                    close_channel.closed().await;
                    debug!(address = %close_address, "worker channel closed");
                    let _ = close_supervisor.cast(RuntimeMsg::ConnectionClosed {
                        reason: "worker channel closed".to_string(),
                    });
                });

                let _ = supervisor.cast(RuntimeMsg::Connected { channel });
                return;
            }
            Err(e) => {
                debug!(address = %address, attempt, error = %e, "worker not reachable yet");
                if attempt < plan.attempts {
                    sleep(plan.interval).await;
                }
            }
        }
    }

    error!(
        address = %address,
        attempts = plan.attempts,
        "handshake attempt budget exhausted; worker never became reachable"
    );
    let _ = supervisor.cast(RuntimeMsg::HandshakeFailed {
        attempts: plan.attempts,
    });
}

/// Bootstrap calls performed once per connection, in order. Returns false
/// only when the connection cannot be used at all (identity rejected).
async fn bootstrap(channel: &RpcChannel, plan: &HandshakePlan) -> bool {
    // The worker validates the parent identity before accepting any other
    // call; a rejection here never heals on retry.
    if let Err(e) = channel
        .call(CallRequest::new(
            "runtime",
            "attach",
            vec![plan.parent.to_value()],
        ))
        .await
    {
        error!(address = %channel.address(), error = %e, "worker rejected parent identity");
        return false;
    }

    // Load the private compiler shim; its sole export is the zero-argument
    // `compile` entry point. Absence surfaces later as a failed compile.
    if let Err(e) = channel
        .call(CallRequest::new(
            "code",
            "compile_file",
            vec![json!(plan.compiler_shim.to_string_lossy())],
        ))
        .await
    {
        error!(address = %channel.address(), error = %e, "failed to load compiler shim in worker");
    }

    // Downstream tooling needs column and token-position metadata.
    if let Err(e) = channel
        .call(CallRequest::new(
            "parser",
            "set_options",
            vec![json!({"columns": true, "token_metadata": true})],
        ))
        .await
    {
        warn!(address = %channel.address(), error = %e, "failed to set worker parser options");
    }

    true
}
