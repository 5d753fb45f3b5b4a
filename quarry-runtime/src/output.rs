use std::sync::Arc;

/// Log-sink collaborator. The supervisor relays every byte chunk received
/// from the worker's merged output stream verbatim, plus control events
/// (spawn, exit, connection transitions) as separate notes.
pub trait OutputSink: Send + Sync {
    /// Raw worker output, exactly as read from the pipe.
    fn output(&self, chunk: &str);

    /// Control events from the process channel (exit notices and the like).
    fn control(&self, note: &str) {
        let _ = note;
    }
}

/// Default sink: structured log lines via `tracing`.
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn output(&self, chunk: &str) {
        tracing::info!(target: "quarry::worker", "{}", chunk.trim_end());
    }

    fn control(&self, note: &str) {
        tracing::info!(target: "quarry::worker", note, "worker control event");
    }
}

pub type SharedSink = Arc<dyn OutputSink>;
