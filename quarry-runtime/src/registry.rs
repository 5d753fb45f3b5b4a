//! Subscriber registry facade.
//!
//! Extension subscribers register under a topic and receive fan-out
//! messages. Backed by ractor Process Groups, so membership is dynamic and
//! the runtime never tracks subscribers itself.

use ractor::ActorRef;
use quarry_proto::Diagnostic;

/// Events delivered to every member of the runtime's registry topic.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionEvent {
    /// A compile finished; carries the full diagnostic set.
    Compiler { diagnostics: Vec<Diagnostic> },
    /// Runtime lifecycle notice, for layers that supervise the supervisor.
    Notice(RuntimeNotice),
}

/// Lifecycle transitions a higher layer may want to react to, e.g. by
/// relaunching the runtime after a worker crash. The runtime itself never
/// relaunches.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeNotice {
    /// Handshake succeeded; the runtime accepts calls.
    Ready { address: String },
    /// The worker process exited.
    WorkerTerminated { status: Option<i32> },
    /// The established channel closed without the process exiting first.
    ConnectionLost { reason: String },
    /// The connection attempt budget ran out before the worker answered.
    HandshakeFailed { attempts: u32 },
}

/// Register an actor for fan-out on `topic`.
pub fn subscribe(topic: &str, subscriber: &ActorRef<ExtensionEvent>) {
    ractor::pg::join(topic.to_string(), vec![subscriber.get_cell()]);
    tracing::debug!(topic, subscriber = %subscriber.get_id(), "extension subscriber joined");
}

/// Remove an actor from `topic`.
pub fn unsubscribe(topic: &str, subscriber: &ActorRef<ExtensionEvent>) {
    ractor::pg::leave(topic.to_string(), vec![subscriber.get_cell()]);
    tracing::debug!(topic, subscriber = %subscriber.get_id(), "extension subscriber left");
}

/// Number of current members, for diagnostics.
pub fn member_count(topic: &str) -> usize {
    ractor::pg::get_members(&topic.to_string()).len()
}

/// Dispatch `event` to every current member of `topic`, one message per
/// subscriber. Delivery failures are logged and skipped; a dead subscriber
/// must not fail the publish.
pub fn publish(topic: &str, event: ExtensionEvent) {
    let members = ractor::pg::get_members(&topic.to_string());
    tracing::debug!(topic, subscribers = members.len(), "publishing extension event");

    for member in members {
        let actor_id = member.get_id();
        let subscriber: ActorRef<ExtensionEvent> = member.into();
        if let Err(e) = subscriber.cast(event.clone()) {
            tracing::warn!(
                topic,
                subscriber = %actor_id,
                error = %e,
                "failed to deliver extension event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_proto::{Position, Severity};
    use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};

    struct Probe;

    enum ProbeMsg {
        Event(ExtensionEvent),
        Drain(RpcReplyPort<Vec<ExtensionEvent>>),
    }

    #[ractor::async_trait]
    impl Actor for Probe {
        type Msg = ProbeMsg;
        type State = Vec<ExtensionEvent>;
        type Arguments = ();

        async fn pre_start(
            &self,
            _myself: ActorRef<Self::Msg>,
            _args: Self::Arguments,
        ) -> Result<Self::State, ActorProcessingErr> {
            Ok(Vec::new())
        }

        async fn handle(
            &self,
            _myself: ActorRef<Self::Msg>,
            message: Self::Msg,
            state: &mut Self::State,
        ) -> Result<(), ActorProcessingErr> {
            match message {
                ProbeMsg::Event(event) => state.push(event),
                ProbeMsg::Drain(reply) => {
                    let _ = reply.send(std::mem::take(state));
                }
            }
            Ok(())
        }
    }

    /// Adapter so a `ProbeMsg` actor can join a topic of `ExtensionEvent`s.
    struct Relay;

    #[ractor::async_trait]
    impl Actor for Relay {
        type Msg = ExtensionEvent;
        type State = ActorRef<ProbeMsg>;
        type Arguments = ActorRef<ProbeMsg>;

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
            let _ = state.cast(ProbeMsg::Event(message));
            Ok(())
        }
    }

    fn sample_diagnostics() -> Vec<Diagnostic> {
        vec![Diagnostic {
            file: "lib/app.qy".to_string(),
            severity: Severity::Error,
            message: "undefined function frob/1".to_string(),
            position: Position { line: 3, column: 9 },
        }]
    }

    #[tokio::test]
    async fn publish_reaches_every_member_exactly_once() {
        let topic = format!("registry-test-{}", ulid::Ulid::new());

        let (probe_a, _) = Actor::spawn(None, Probe, ()).await.unwrap();
        let (probe_b, _) = Actor::spawn(None, Probe, ()).await.unwrap();
        let (relay_a, _) = Actor::spawn(None, Relay, probe_a.clone()).await.unwrap();
        let (relay_b, _) = Actor::spawn(None, Relay, probe_b.clone()).await.unwrap();

        subscribe(&topic, &relay_a);
        subscribe(&topic, &relay_b);
        assert_eq!(member_count(&topic), 2);

        publish(
            &topic,
            ExtensionEvent::Compiler {
                diagnostics: sample_diagnostics(),
            },
        );

        // Let casts drain through both mailboxes.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        for probe in [&probe_a, &probe_b] {
            let events = ractor::call!(probe, ProbeMsg::Drain).unwrap();
            assert_eq!(
                events,
                vec![ExtensionEvent::Compiler {
                    diagnostics: sample_diagnostics(),
                }]
            );
        }
    }

    #[tokio::test]
    async fn unsubscribed_members_stop_receiving() {
        let topic = format!("registry-test-{}", ulid::Ulid::new());

        let (probe, _) = Actor::spawn(None, Probe, ()).await.unwrap();
        let (relay, _) = Actor::spawn(None, Relay, probe.clone()).await.unwrap();

        subscribe(&topic, &relay);
        unsubscribe(&topic, &relay);
        assert_eq!(member_count(&topic), 0);

        publish(
            &topic,
            ExtensionEvent::Notice(RuntimeNotice::ConnectionLost {
                reason: "peer closed".to_string(),
            }),
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let events = ractor::call!(probe, ProbeMsg::Drain).unwrap();
        assert!(events.is_empty());
    }
}
