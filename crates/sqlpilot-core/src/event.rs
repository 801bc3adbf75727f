use crate::traits::EventSink;
use crate::types::RunEvent;

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events, from every run.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: RunEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: RunEvent) {
        self.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StepId;
    use crate::types::RunId;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(RunEvent::StepProgress {
            run_id: RunId::from_str("r1"),
            step: StepId::ScopeCheck,
            message: "classifying".into(),
        });

        assert_eq!(a.recv().await.unwrap().kind(), "step_progress");
        assert_eq!(b.recv().await.unwrap().run_id().0, "r1");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(RunEvent::StepProgress {
            run_id: RunId::new(),
            step: StepId::Execution,
            message: "nobody listens".into(),
        });
    }
}
