//! Diagnostic audit trail for registry mutations.

use std::collections::VecDeque;

use anchor_core_types::{AnchorId, ApplicationId};
use anchor_policy::AuditPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    Optimized,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub anchor_id: AnchorId,
    pub application_id: ApplicationId,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, anchor_id: AnchorId, application_id: ApplicationId) -> Self {
        Self {
            action,
            anchor_id,
            application_id,
            note: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Ring that, once it outgrows `capacity`, keeps only the newest `retain` events.
#[derive(Debug, Clone)]
pub struct AuditLog {
    capacity: usize,
    retain: usize,
    events: VecDeque<AuditEvent>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(&AuditPolicy::default())
    }
}

impl AuditLog {
    pub fn new(policy: &AuditPolicy) -> Self {
        let capacity = policy.capacity.max(1);
        Self {
            capacity,
            retain: policy.retain.clamp(1, capacity),
            events: VecDeque::new(),
        }
    }

    pub fn push(&mut self, event: AuditEvent) {
        self.events.push_back(event);
        if self.events.len() > self.capacity {
            let overflow = self.events.len() - self.retain;
            self.events.drain(..overflow);
            tracing::debug!(retained = self.events.len(), "audit log truncated");
        }
    }

    pub fn snapshot(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: usize) -> AuditEvent {
        AuditEvent::new(
            AuditAction::Updated,
            AnchorId(format!("a-{n}")),
            ApplicationId::from("app"),
        )
    }

    #[test]
    fn overflow_keeps_most_recent_half() {
        let mut log = AuditLog::default();
        for n in 0..10_000 {
            log.push(event(n));
        }
        assert_eq!(log.len(), 10_000);

        log.push(event(10_000));
        assert_eq!(log.len(), 5_000);
        let events = log.snapshot();
        assert_eq!(events.first().unwrap().anchor_id, AnchorId("a-5001".into()));
        assert_eq!(events.last().unwrap().anchor_id, AnchorId("a-10000".into()));
    }

    #[test]
    fn small_policy_is_honoured() {
        let mut log = AuditLog::new(&AuditPolicy {
            capacity: 4,
            retain: 2,
        });
        for n in 0..5 {
            log.push(event(n));
        }
        let ids: Vec<_> = log.snapshot().into_iter().map(|e| e.anchor_id.0).collect();
        assert_eq!(ids, vec!["a-3", "a-4"]);
    }
}
