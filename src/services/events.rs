//! Domain event publishing.

use tracing::{debug, warn};

use crate::domain::events::DomainEvent;

pub const SUBJECT_PREFIX: &str = "ecommerce.events";

/// Publishes to NATS when connected, otherwise only logs.
#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self { Self { nats } }

    pub fn disabled() -> Self { Self::default() }

    pub fn subject(event: &DomainEvent) -> String { format!("{SUBJECT_PREFIX}.{}", event.kind()) }

    /// Delivery problems are logged; events never fail the caller.
    pub async fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in events {
            self.publish(&event).await;
        }
    }

    pub async fn publish(&self, event: &DomainEvent) {
        let subject = Self::subject(event);
        let Some(client) = &self.nats else {
            debug!(subject = %subject, "Domain event (not published)");
            return;
        };
        let payload = match serde_json::to_vec(event) {
            Ok(p) => p,
            Err(e) => {
                warn!(subject = %subject, error = %e, "Event serialization failed");
                return;
            }
        };
        if let Err(e) = client.publish(subject.clone(), payload.into()).await {
            warn!(subject = %subject, error = %e, "Event publish failed");
        }
    }
}
