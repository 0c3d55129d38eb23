// Contact directory
// Keeps one presence record per identity, merged in place on every sighting

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::models::{ContactRecord, ContactStatus};

/// Fields to merge into a record; `None` leaves the stored value alone
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactPatch {
    pub client_id: Option<String>,
    pub display_name: Option<String>,
    pub status: Option<ContactStatus>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl ContactPatch {
    pub fn status(status: ContactStatus) -> Self {
        ContactPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Status change observed right now
    pub fn sighting(status: ContactStatus) -> Self {
        ContactPatch {
            status: Some(status),
            last_seen: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn seen_now() -> Self {
        ContactPatch {
            last_seen: Some(Utc::now()),
            ..Default::default()
        }
    }
}

/// Outcome of an upsert, so callers can tell a first sighting from a refresh
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    Created(ContactRecord),
    Updated(ContactRecord),
}

impl Upsert {
    pub fn is_created(&self) -> bool {
        matches!(self, Upsert::Created(_))
    }

    pub fn record(&self) -> &ContactRecord {
        match self {
            Upsert::Created(record) | Upsert::Updated(record) => record,
        }
    }

    pub fn into_record(self) -> ContactRecord {
        match self {
            Upsert::Created(record) | Upsert::Updated(record) => record,
        }
    }
}

#[derive(Debug, Default)]
pub struct ContactDirectory {
    records: HashMap<String, ContactRecord>,
}

impl ContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `patch` into the record for `user_id`, creating it on first sighting.
    /// `last_updated` is refreshed on every call.
    pub fn upsert(&mut self, user_id: &str, patch: ContactPatch) -> Upsert {
        let created = !self.records.contains_key(user_id);
        let record = self
            .records
            .entry(user_id.to_string())
            .or_insert_with(|| ContactRecord::new(user_id));

        if let Some(client_id) = patch.client_id {
            record.client_id = client_id;
        }
        if let Some(display_name) = patch.display_name {
            record.display_name = display_name;
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(last_seen) = patch.last_seen {
            record.last_seen = Some(last_seen);
        }
        record.last_updated = Utc::now();

        if created {
            Upsert::Created(record.clone())
        } else {
            Upsert::Updated(record.clone())
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&ContactRecord> {
        self.records.get(user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.records.contains_key(user_id)
    }

    /// Snapshot of every record, keyed by identity
    pub fn all(&self) -> HashMap<String, ContactRecord> {
        self.records.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record; used on logout and before reconnecting
    pub fn reset(&mut self) {
        self.records.clear();
    }
}
