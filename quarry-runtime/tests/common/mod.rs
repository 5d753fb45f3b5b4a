//! Shared test fixtures: a scripted fake worker speaking the line-JSON
//! protocol, a recording log sink, and a subscriber probe actor.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde_json::json;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use quarry_proto::{Diagnostic, Position, RequestFrame, ResponseFrame, Severity};
use quarry_runtime::registry::ExtensionEvent;
use quarry_runtime::{LaunchMode, OutputSink, RuntimeConfig};

/// Best-effort tracing init so failing tests come with context.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("quarry_runtime=debug")
        .try_init();
}

#[derive(Debug, Clone)]
pub struct FakeWorkerOptions {
    /// Diagnostics returned by the compile entry point.
    pub diagnostics: Vec<Diagnostic>,
    /// Hold the compile response for this long.
    pub compile_delay: Duration,
    /// Refuse the `runtime/attach` bootstrap call.
    pub reject_attach: bool,
    /// Fail the compiler-shim load (non-fatal on the supervisor side).
    pub fail_shim_load: bool,
    /// Close the connection instead of answering a compile call.
    pub drop_on_compile: bool,
}

impl Default for FakeWorkerOptions {
    fn default() -> Self {
        Self {
            diagnostics: sample_diagnostics(),
            compile_delay: Duration::ZERO,
            reject_attach: false,
            fail_shim_load: false,
            drop_on_compile: false,
        }
    }
}

pub fn sample_diagnostics() -> Vec<Diagnostic> {
    vec![
        Diagnostic {
            file: "lib/app.qy".to_string(),
            severity: Severity::Error,
            message: "undefined function frob/1".to_string(),
            position: Position { line: 3, column: 9 },
        },
        Diagnostic {
            file: "lib/util.qy".to_string(),
            severity: Severity::Warning,
            message: "unused variable `x`".to_string(),
            position: Position { line: 12, column: 5 },
        },
    ]
}

/// A worker stand-in: accepts connections on a local port and answers the
/// supervisor's RPC frames according to its options.
pub struct FakeWorker {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<RequestFrame>>>,
}

impl FakeWorker {
    pub async fn start(options: FakeWorkerOptions) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(Self::serve(listener, options, requests.clone()));
        Self { port, requests }
    }

    /// Reserve a port now but only start listening after `delay`, so the
    /// supervisor's handshake has to retry.
    pub fn start_delayed(options: FakeWorkerOptions, delay: Duration) -> Self {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let requests = Arc::new(Mutex::new(Vec::new()));
        let serve_requests = requests.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
                .await
                .unwrap();
            Self::serve(listener, options, serve_requests).await;
        });
        Self { port, requests }
    }

    /// Operations seen so far, as `ns/op` strings.
    pub fn seen_ops(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|frame| format!("{}/{}", frame.ns, frame.op))
            .collect()
    }

    async fn serve(
        listener: tokio::net::TcpListener,
        options: FakeWorkerOptions,
        requests: Arc<Mutex<Vec<RequestFrame>>>,
    ) {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let options = options.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                let (read_half, write_half) = stream.into_split();
                let mut reader = FramedRead::new(read_half, LinesCodec::new());
                let mut writer = FramedWrite::new(write_half, LinesCodec::new());

                while let Some(Ok(line)) = reader.next().await {
                    let frame: RequestFrame = match serde_json::from_str(&line) {
                        Ok(frame) => frame,
                        Err(_) => continue,
                    };
                    requests.lock().unwrap().push(frame.clone());

                    let response = match (frame.ns.as_str(), frame.op.as_str()) {
                        ("runtime", "attach") => {
                            if options.reject_attach {
                                ResponseFrame::error(frame.id, "parent identity mismatch")
                            } else {
                                ResponseFrame::ok(frame.id, json!("attached"))
                            }
                        }
                        ("code", "compile_file") => {
                            if options.fail_shim_load {
                                ResponseFrame::error(frame.id, "shim failed to compile")
                            } else {
                                ResponseFrame::ok(frame.id, json!("loaded"))
                            }
                        }
                        ("parser", "set_options") => ResponseFrame::ok(frame.id, json!("ok")),
                        ("kernel", "length") => {
                            let len = frame
                                .args
                                .first()
                                .and_then(|v| v.as_array())
                                .map(|list| list.len())
                                .unwrap_or(0);
                            ResponseFrame::ok(frame.id, json!(len))
                        }
                        ("compiler_shim", "compile") => {
                            if options.compile_delay > Duration::ZERO {
                                tokio::time::sleep(options.compile_delay).await;
                            }
                            if options.drop_on_compile {
                                return;
                            }
                            ResponseFrame::ok(
                                frame.id,
                                json!({
                                    "artifacts": ["app.qar"],
                                    "diagnostics": options.diagnostics,
                                }),
                            )
                        }
                        _ => ResponseFrame::error(
                            frame.id,
                            format!("no such operation {}/{}", frame.ns, frame.op),
                        ),
                    };

                    let line = serde_json::to_string(&response).unwrap();
                    if writer.send(line).await.is_err() {
                        return;
                    }
                }
            });
        }
    }
}

/// Log sink that records everything it is handed.
#[derive(Default)]
pub struct RecordingSink {
    pub chunks: Mutex<Vec<String>>,
    pub controls: Mutex<Vec<String>>,
}

impl OutputSink for RecordingSink {
    fn output(&self, chunk: &str) {
        self.chunks.lock().unwrap().push(chunk.to_string());
    }

    fn control(&self, note: &str) {
        self.controls.lock().unwrap().push(note.to_string());
    }
}

/// Subscriber probe: joins a registry topic and stores every event it
/// receives into a shared vec the test can inspect.
pub struct EventProbe;

#[ractor::async_trait]
impl Actor for EventProbe {
    type Msg = ExtensionEvent;
    type State = Arc<Mutex<Vec<ExtensionEvent>>>;
    type Arguments = Arc<Mutex<Vec<ExtensionEvent>>>;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        Ok(args)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.lock().unwrap().push(message);
        Ok(())
    }
}

pub async fn spawn_probe() -> (ActorRef<ExtensionEvent>, Arc<Mutex<Vec<ExtensionEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let (probe, _) = Actor::spawn(None, EventProbe, events.clone()).await.unwrap();
    (probe, events)
}

pub fn compiler_events(events: &Arc<Mutex<Vec<ExtensionEvent>>>) -> Vec<Vec<Diagnostic>> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            ExtensionEvent::Compiler { diagnostics } => Some(diagnostics.clone()),
            _ => None,
        })
        .collect()
}

/// An attach-mode config pointed at `port`, with a fast handshake cadence
/// and a unique registry topic so parallel tests stay isolated.
pub fn attach_config(port: u16) -> RuntimeConfig {
    RuntimeConfig::new("/opt/quarry/worker", std::env::temp_dir())
        .with_install_dir("/opt/quarry")
        .with_launch(LaunchMode::Attach { port })
        .with_handshake(40, Duration::from_millis(100))
        .with_registry_topic(format!("extension-{}", ulid::Ulid::new()))
}

/// Reserve a port that nothing will ever listen on.
pub fn dead_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
