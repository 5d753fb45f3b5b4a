//! Compile task runner.
//!
//! Stateless execution unit for one compile request: invoke the worker's
//! compile entry point, fan the resulting diagnostics out to the registry
//! topic, and return them for the supervisor to match back to the caller.

use quarry_proto::{CallRequest, CompileReport, Diagnostic};

use crate::error::RuntimeError;
use crate::registry::{self, ExtensionEvent};
use crate::rpc::RpcChannel;

/// Namespace the compiler shim registers under in the worker.
pub(crate) const COMPILER_SHIM_NS: &str = "compiler_shim";

pub(crate) async fn run(
    channel: RpcChannel,
    topic: String,
) -> Result<Vec<Diagnostic>, RuntimeError> {
    let value = channel
        .call(CallRequest::new(COMPILER_SHIM_NS, "compile", vec![]))
        .await?;

    // The worker returns (artifacts, diagnostics); the artifacts are the
    // worker's concern and are dropped here.
    let report: CompileReport = serde_json::from_value(value)?;
    let diagnostics = report.diagnostics;

    tracing::debug!(
        topic,
        diagnostics = diagnostics.len(),
        subscribers = registry::member_count(&topic),
        "compile finished, fanning out diagnostics"
    );
    registry::publish(
        &topic,
        ExtensionEvent::Compiler {
            diagnostics: diagnostics.clone(),
        },
    );

    Ok(diagnostics)
}
