//! Event system for mapping operations
//!
//! Services publish an event after each write so listeners can follow the
//! mapping tables without polling. Useful for:
//! - Audit logging
//! - Reconciliation jobs watching for rejected duplicates
//! - Downstream sync triggers

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::mapping::{EntityKind, MappingSnapshot};

/// Mapping events emitted by services
#[derive(Debug, Clone)]
pub enum MappingEvent {
    Created {
        kind: EntityKind,
        local_key: String,
        remote_key: String,
    },
    /// A create that matched an identical stored row
    Replayed {
        kind: EntityKind,
        local_key: String,
        remote_key: String,
    },
    DuplicateRejected {
        incoming: MappingSnapshot,
        existing: MappingSnapshot,
    },
    Deleted {
        kind: EntityKind,
        count: usize,
    },
    Replaced {
        kind: EntityKind,
        owner_key: String,
        removed: usize,
        inserted: usize,
    },
    OwnerReassigned {
        kind: EntityKind,
        old_owner_key: String,
        new_owner_key: String,
        count: usize,
    },
    RelationClash {
        remote_key: String,
        reason: String,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &MappingEvent);
}

/// Event bus for broadcasting mapping events
pub struct EventBus {
    sender: broadcast::Sender<MappingEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: MappingEvent) {
        trace!(event = ?event, "Emitting mapping event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MappingEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &MappingEvent) {
        match event {
            MappingEvent::Created {
                kind,
                local_key,
                remote_key,
            } => {
                debug!(kind = %kind, local = %local_key, remote = %remote_key, "Mapping created");
            }
            MappingEvent::DuplicateRejected { incoming, existing } => {
                warn!(incoming = %incoming, existing = %existing, "Duplicate mapping rejected");
            }
            MappingEvent::Replaced {
                kind,
                owner_key,
                removed,
                inserted,
            } => {
                debug!(kind = %kind, owner = %owner_key, removed, inserted, "Owner mappings replaced");
            }
            MappingEvent::OwnerReassigned {
                kind,
                old_owner_key,
                new_owner_key,
                count,
            } => {
                debug!(kind = %kind, old = %old_owner_key, new = %new_owner_key, count, "Owner reassigned");
            }
            _ => {
                trace!(event = ?event, "Mapping event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(MappingEvent::Created {
            kind: EntityKind::CaseNote,
            local_key: "12345".into(),
            remote_key: "uuid-A".into(),
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            MappingEvent::Created {
                kind, remote_key, ..
            } => {
                assert_eq!(kind, EntityKind::CaseNote);
                assert_eq!(remote_key, "uuid-A");
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn test_event_bus_no_subscribers() {
        let bus = EventBus::new();
        bus.emit(MappingEvent::Deleted {
            kind: EntityKind::Location,
            count: 0,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
