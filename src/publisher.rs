//! Domain event fan-out: every event is logged, and published to NATS when a
//! client is configured. Publishing never fails the request that raised it.

use tracing::{info, warn};

use crate::domain::events::DomainEvent;

#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub async fn publish(&self, event: DomainEvent) {
        let subject = event.subject();
        info!(subject, ?event, "domain event");
        let Some(nats) = &self.nats else { return };
        let payload = match serde_json::to_vec(&event) {
            Ok(p) => p,
            Err(e) => { warn!(subject, error = %e, "event serialization failed"); return; }
        };
        if let Err(e) = nats.publish(subject.to_string(), payload.into()).await {
            warn!(subject, error = %e, "event publish failed");
        }
    }
}
