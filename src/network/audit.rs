use std::sync::Mutex;

use crate::agreement::{Envelope, MessageKind, NodeId, Round, Value};

/// One delivered envelope, as seen by its destination.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AuditRecord {
    pub source: NodeId,
    pub kind: MessageKind,
    pub value: Value,
    /// Signer ids of the attached chain, flooding mode only.
    pub chain: Option<Vec<NodeId>>,
    pub destination: NodeId,
    pub round: Round,
}

impl From<&Envelope> for AuditRecord {
    fn from(envelope: &Envelope) -> Self {
        AuditRecord {
            source: envelope.from,
            kind: envelope.message.kind(),
            value: envelope.message.value(),
            chain: envelope.message.chain().map(|chain| chain.signer_ids()),
            destination: envelope.to,
            round: envelope.message.round(),
        }
    }
}

/// Observer of deliveries. Sinks must not influence the protocol.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Emits each record as a `trace` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, record: AuditRecord) {
        tracing::trace!(
            source = record.source,
            destination = record.destination,
            kind = %record.kind,
            value = %record.value,
            chain = ?record.chain,
            round = record.round,
            "delivered"
        );
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        MemoryAudit::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, record: AuditRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }
}
