use chrono::{DateTime, Utc};
use lockbox_types::{EscrowError, EscrowEvent, EscrowResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Receiver of committed ledger events.
///
/// Delivery is fire-and-forget: a sink cannot fail the operation that
/// produced the event.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EscrowEvent);
}

/// Hash-chained journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub entry_id: String,
    pub index: u64,
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

impl JournalEntry {
    pub fn event(&self) -> EscrowResult<EscrowEvent> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Append-only event journal with hash-chain proofs.
///
/// There is no in-place mutation API; every ledger change adds an entry.
#[derive(Debug, Default, Clone)]
pub struct EventJournal {
    entries: Vec<JournalEntry>,
}

impl EventJournal {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Rebuild a journal from persisted entries and verify hash-chain integrity.
    pub fn from_entries(entries: Vec<JournalEntry>) -> EscrowResult<Self> {
        let journal = Self { entries };

        for (expected_index, entry) in journal.entries.iter().enumerate() {
            if entry.index != expected_index as u64 {
                return Err(EscrowError::Corrupt(format!(
                    "journal index gap detected at position {} (found {})",
                    expected_index, entry.index
                )));
            }
        }

        if !journal.verify_chain() {
            return Err(EscrowError::Corrupt(
                "journal hash-chain verification failed".to_string(),
            ));
        }

        Ok(journal)
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, event: &EscrowEvent) -> EscrowResult<JournalEntry> {
        let payload = serde_json::to_value(event)?;
        let index = self.entries.len() as u64;
        let timestamp = Utc::now();
        let kind = event.label().to_string();
        let previous_hash = self.entries.last().map(|entry| entry.entry_hash.clone());
        let entry_hash = compute_entry_hash(
            index,
            &kind,
            timestamp,
            &payload,
            previous_hash.as_deref(),
        );

        let entry = JournalEntry {
            entry_id: Uuid::new_v4().to_string(),
            index,
            kind,
            timestamp,
            payload,
            previous_hash,
            entry_hash,
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn verify_chain(&self) -> bool {
        let mut previous_hash: Option<String> = None;
        for entry in &self.entries {
            let expected_hash = compute_entry_hash(
                entry.index,
                &entry.kind,
                entry.timestamp,
                &entry.payload,
                previous_hash.as_deref(),
            );
            if entry.entry_hash != expected_hash {
                return false;
            }
            if entry.previous_hash != previous_hash {
                return false;
            }
            previous_hash = Some(entry.entry_hash.clone());
        }
        true
    }
}

fn compute_entry_hash(
    index: u64,
    kind: &str,
    timestamp: DateTime<Utc>,
    payload: &Value,
    previous_hash: Option<&str>,
) -> String {
    let material = serde_json::json!({
        "index": index,
        "kind": kind,
        "timestamp": timestamp,
        "payload": payload,
        "previous_hash": previous_hash,
    });

    let bytes = serde_json::to_vec(&material).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// [`EventSink`] that appends every event to a shared [`EventJournal`].
#[derive(Debug, Default)]
pub struct JournalSink {
    journal: Mutex<EventJournal>,
}

impl JournalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_journal(journal: EventJournal) -> Self {
        Self {
            journal: Mutex::new(journal),
        }
    }

    pub fn snapshot(&self) -> EscrowResult<EventJournal> {
        self.journal
            .lock()
            .map(|journal| journal.clone())
            .map_err(|_| EscrowError::LockPoisoned)
    }
}

impl EventSink for JournalSink {
    fn emit(&self, event: &EscrowEvent) {
        let appended = self
            .journal
            .lock()
            .map_err(|_| EscrowError::LockPoisoned)
            .and_then(|mut journal| journal.append(event));
        if let Err(err) = appended {
            warn!(kind = event.label(), error = %err, "Journal append failed");
        }
    }
}
