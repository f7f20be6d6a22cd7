//! A single table: rows, indexes, and subscriptions.
//!
//! A `Table` is owned exclusively by its actor task; nothing here locks.
//! Mutations publish pubsub events to matching subscriptions as part of the
//! same call, so causal order per row is a direct consequence of the
//! single-writer discipline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::column::{Columns, IndexKind};
use crate::error::{EngineError, Result};
use crate::record::Record;
use crate::response::Response;
use crate::subscription::{next_pubsubid, EventPush, EventSender, Subscription};
use pubsub_parser::{ColumnValue, Filter};

/// A filtered snapshot of the table, ordered by ascending row id.
#[derive(Clone, Debug)]
pub struct SelectResult {
    pub columns: Arc<Vec<String>>,
    pub rows: Vec<Vec<String>>,
}

/// In-memory table state.
pub struct Table {
    name: String,
    columns: Columns,
    /// Slot index is the row id; freed slots hold `None`.
    rows: Vec<Option<Record>>,
    free_slots: Vec<usize>,
    /// KEY column ordinal -> value -> row id.
    key_indexes: HashMap<usize, HashMap<String, usize>>,
    /// TAG column ordinal -> value -> row ids.
    tag_indexes: HashMap<usize, HashMap<String, HashSet<usize>>>,
    /// Insertion-ordered; events are delivered in this order.
    subscriptions: Vec<Subscription>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Columns::new(),
            rows: Vec::new(),
            free_slots: Vec::new(),
            key_indexes: HashMap::new(),
            tag_indexes: HashMap::new(),
            subscriptions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live rows.
    pub fn row_count(&self) -> usize {
        self.rows.len() - self.free_slots.len()
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Evaluates a filter against one record; an absent column matches
    /// nothing.
    fn filter_matches(&self, filter: &Option<Filter>, record: &Record) -> bool {
        match filter {
            None => true,
            Some(filter) => self
                .columns
                .ordinal_of(&filter.column)
                .is_some_and(|ordinal| record.value(ordinal) == filter.value),
        }
    }

    fn live_ids(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id))
            .collect()
    }

    /// Row ids matching the filter, ascending. KEY and TAG indexes answer
    /// directly; everything else scans.
    fn match_ids(&self, filter: &Option<Filter>) -> Vec<usize> {
        let Some(filter) = filter else {
            return self.live_ids();
        };
        let Some(ordinal) = self.columns.ordinal_of(&filter.column) else {
            return Vec::new();
        };
        if let Some(index) = self.key_indexes.get(&ordinal) {
            return index.get(&filter.value).copied().into_iter().collect();
        }
        if let Some(index) = self.tag_indexes.get(&ordinal) {
            let mut ids: Vec<usize> = index
                .get(&filter.value)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            ids.sort_unstable();
            return ids;
        }
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| {
                slot.as_ref()
                    .filter(|record| record.value(ordinal) == filter.value)
                    .map(|_| id)
            })
            .collect()
    }

    fn alloc_slot(&mut self, record: Record) -> usize {
        if let Some(id) = self.free_slots.pop() {
            self.rows[id] = Some(record);
            id
        } else {
            self.rows.push(Some(record));
            self.rows.len() - 1
        }
    }

    /// Writes one cell, keeping any index on its column in sync.
    fn set_cell(&mut self, id: usize, ordinal: usize, value: &str) {
        let Some(record) = self.rows.get_mut(id).and_then(Option::as_mut) else {
            error!(table = %self.name, id, "set_cell on a dead slot");
            return;
        };
        let old = record.value(ordinal).to_string();
        record.set_value(ordinal, value);

        match self.columns.index_kind(ordinal) {
            IndexKind::None => {},
            IndexKind::Key => {
                if let Some(index) = self.key_indexes.get_mut(&ordinal) {
                    index.remove(&old);
                    index.insert(value.to_string(), id);
                }
            },
            IndexKind::Tag => {
                if let Some(index) = self.tag_indexes.get_mut(&ordinal) {
                    if let Some(ids) = index.get_mut(&old) {
                        ids.remove(&id);
                        if ids.is_empty() {
                            index.remove(&old);
                        }
                    }
                    index.entry(value.to_string()).or_default().insert(id);
                }
            },
        }
    }

    fn remove_from_indexes(&mut self, id: usize, record: &Record) {
        for (ordinal, index) in &mut self.key_indexes {
            index.remove(record.value(*ordinal));
        }
        for (ordinal, index) in &mut self.tag_indexes {
            let value = record.value(*ordinal);
            if let Some(ids) = index.get_mut(value) {
                ids.remove(&id);
                if ids.is_empty() {
                    index.remove(value);
                }
            }
        }
    }

    /// Inserts one row. Unknown columns are created; unset columns are `""`.
    ///
    /// All KEY columns are validated before anything is written, so a
    /// uniqueness failure leaves no trace of the row.
    pub fn insert(&mut self, column_values: &[ColumnValue]) -> Result<usize> {
        let mut record = Record::new(self.columns.len());
        for cv in column_values {
            let ordinal = self.columns.get_or_add(&cv.column);
            record.set_value(ordinal, cv.value.clone());
        }

        for (ordinal, index) in &self.key_indexes {
            if index.contains_key(record.value(*ordinal)) {
                let column = self
                    .columns
                    .get(*ordinal)
                    .map_or_else(String::new, |c| c.name.clone());
                return Err(EngineError::NotUnique(column));
            }
        }

        let id = self.alloc_slot(record.clone());
        for (ordinal, index) in &mut self.key_indexes {
            index.insert(record.value(*ordinal).to_string(), id);
        }
        for (ordinal, index) in &mut self.tag_indexes {
            index
                .entry(record.value(*ordinal).to_string())
                .or_default()
                .insert(id);
        }

        if !self.subscriptions.is_empty() {
            let columns = Arc::new(self.columns.names());
            let row = record.padded(columns.len());
            let mut events = Vec::new();
            for sub in &self.subscriptions {
                if self.filter_matches(&sub.filter, &record) {
                    events.push((
                        sub.pubsubid,
                        Response::EventInsert {
                            pubsubid: sub.pubsubid,
                            columns: Arc::clone(&columns),
                            row: row.clone(),
                        },
                    ));
                }
            }
            self.deliver(events);
        }

        Ok(id)
    }

    /// Snapshot of all rows matching the filter.
    pub fn select(&self, filter: &Option<Filter>) -> SelectResult {
        let ids = self.match_ids(filter);
        let width = self.columns.len();
        let columns = Arc::new(self.columns.names());
        let rows = ids
            .iter()
            .filter_map(|&id| {
                self.rows
                    .get(id)
                    .and_then(Option::as_ref)
                    .map(|record| record.padded(width))
            })
            .collect();
        SelectResult { columns, rows }
    }

    /// Applies assignments to every matching row.
    ///
    /// A KEY assignment is validated against the proposed post-state first:
    /// it fails when more than one row matches or when a different row
    /// already holds the value.
    pub fn update(
        &mut self,
        column_values: &[ColumnValue],
        filter: &Option<Filter>,
    ) -> Result<usize> {
        let ids = self.match_ids(filter);
        if ids.is_empty() {
            return Ok(0);
        }

        let assignments: Vec<(usize, String)> = column_values
            .iter()
            .map(|cv| (self.columns.get_or_add(&cv.column), cv.value.clone()))
            .collect();

        for (ordinal, value) in &assignments {
            if self.columns.index_kind(*ordinal) != IndexKind::Key {
                continue;
            }
            let column = self
                .columns
                .get(*ordinal)
                .map_or_else(String::new, |c| c.name.clone());
            if ids.len() > 1 {
                return Err(EngineError::NotUnique(column));
            }
            if let Some(index) = self.key_indexes.get(ordinal) {
                if let Some(&holder) = index.get(value) {
                    if holder != ids[0] {
                        return Err(EngineError::NotUnique(column));
                    }
                }
            }
        }

        let columns = Arc::new(self.columns.names());
        let width = columns.len();
        let mut events = Vec::new();

        for &id in &ids {
            let Some(old) = self.rows.get(id).and_then(Option::as_ref).cloned() else {
                error!(table = %self.name, id, "matched row vanished during update");
                continue;
            };
            for (ordinal, value) in &assignments {
                self.set_cell(id, *ordinal, value);
            }
            let Some(new) = self.rows.get(id).and_then(Option::as_ref) else {
                continue;
            };

            for sub in &self.subscriptions {
                let before = self.filter_matches(&sub.filter, &old);
                let after = self.filter_matches(&sub.filter, new);
                let response = match (before, after) {
                    (true, true) => Response::EventUpdate {
                        pubsubid: sub.pubsubid,
                        columns: Arc::clone(&columns),
                        row: new.padded(width),
                    },
                    (false, true) => Response::EventAdd {
                        pubsubid: sub.pubsubid,
                        columns: Arc::clone(&columns),
                        row: new.padded(width),
                    },
                    (true, false) => Response::EventRemove {
                        pubsubid: sub.pubsubid,
                        id,
                    },
                    (false, false) => continue,
                };
                events.push((sub.pubsubid, response));
            }
        }

        self.deliver(events);
        Ok(ids.len())
    }

    /// Deletes every matching row, freeing its slot for reuse.
    pub fn delete(&mut self, filter: &Option<Filter>) -> usize {
        let ids = self.match_ids(filter);
        let mut events = Vec::new();
        let mut deleted = 0;

        for &id in &ids {
            let Some(record) = self.rows.get_mut(id).and_then(Option::take) else {
                error!(table = %self.name, id, "matched row vanished during delete");
                continue;
            };
            self.remove_from_indexes(id, &record);
            self.free_slots.push(id);
            deleted += 1;

            for sub in &self.subscriptions {
                if self.filter_matches(&sub.filter, &record) {
                    events.push((
                        sub.pubsubid,
                        Response::EventRemove {
                            pubsubid: sub.pubsubid,
                            id,
                        },
                    ));
                }
            }
        }

        self.deliver(events);
        deleted
    }

    /// Designates a KEY column; every existing value must be unique.
    pub fn key(&mut self, column: &str) -> Result<()> {
        let ordinal = self.columns.get_or_add(column);
        if self.columns.index_kind(ordinal) != IndexKind::None {
            return Err(EngineError::AlreadyIndexed(column.to_string()));
        }

        let mut index = HashMap::new();
        for (id, slot) in self.rows.iter().enumerate() {
            if let Some(record) = slot {
                if index.insert(record.value(ordinal).to_string(), id).is_some() {
                    return Err(EngineError::NotUnique(column.to_string()));
                }
            }
        }

        self.columns.set_index(ordinal, IndexKind::Key);
        self.key_indexes.insert(ordinal, index);
        Ok(())
    }

    /// Designates a TAG column; values are multi-indexed, no constraint.
    pub fn tag(&mut self, column: &str) -> Result<()> {
        let ordinal = self.columns.get_or_add(column);
        if self.columns.index_kind(ordinal) != IndexKind::None {
            return Err(EngineError::AlreadyIndexed(column.to_string()));
        }

        let mut index: HashMap<String, HashSet<usize>> = HashMap::new();
        for (id, slot) in self.rows.iter().enumerate() {
            if let Some(record) = slot {
                index
                    .entry(record.value(ordinal).to_string())
                    .or_default()
                    .insert(id);
            }
        }

        self.columns.set_index(ordinal, IndexKind::Tag);
        self.tag_indexes.insert(ordinal, index);
        Ok(())
    }

    /// Registers a subscription and returns its pubsubid. The caller sends
    /// the subscribe response first, then runs [`publish_initial`].
    ///
    /// [`publish_initial`]: Self::publish_initial
    pub fn subscribe(&mut self, filter: Option<Filter>, sender: EventSender) -> u64 {
        let pubsubid = next_pubsubid();
        self.subscriptions.push(Subscription {
            pubsubid,
            filter,
            sender,
        });
        pubsubid
    }

    /// Emits the initial-load `add` events for a fresh subscription.
    ///
    /// The actor calls this before taking the next request, so a subscriber
    /// observes every pre-existing match exactly once, before any live
    /// event.
    pub fn publish_initial(&mut self, pubsubid: u64) {
        let Some(sub) = self
            .subscriptions
            .iter()
            .find(|s| s.pubsubid == pubsubid)
        else {
            return;
        };
        let filter = sub.filter.clone();
        let ids = self.match_ids(&filter);
        if ids.is_empty() {
            return;
        }

        let columns = Arc::new(self.columns.names());
        let width = columns.len();
        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.rows.get(id).and_then(Option::as_ref) {
                events.push((
                    pubsubid,
                    Response::EventAdd {
                        pubsubid,
                        columns: Arc::clone(&columns),
                        row: record.padded(width),
                    },
                ));
            }
        }
        self.deliver(events);
    }

    /// Removes all subscriptions whose filter equals the given filter.
    pub fn unsubscribe_filter(&mut self, filter: &Option<Filter>) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| &s.filter != filter);
        before - self.subscriptions.len()
    }

    /// Removes the subscription with this pubsubid, if this table holds it.
    pub fn unsubscribe_id(&mut self, pubsubid: u64) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.pubsubid != pubsubid);
        before - self.subscriptions.len()
    }

    /// Drops subscriptions whose connection is gone.
    pub fn prune_closed(&mut self) {
        self.subscriptions.retain(|s| {
            if s.sender.is_closed() {
                debug!(table = %self.name, pubsubid = s.pubsubid, "pruning closed subscription");
                false
            } else {
                true
            }
        });
    }

    /// Pushes events in order; a full or closed queue drops the
    /// subscription.
    fn deliver(&mut self, events: Vec<(u64, Response)>) {
        if events.is_empty() {
            return;
        }
        let mut dead: Vec<u64> = Vec::new();
        for (pubsubid, response) in events {
            if dead.contains(&pubsubid) {
                continue;
            }
            let Some(sub) = self
                .subscriptions
                .iter()
                .find(|s| s.pubsubid == pubsubid)
            else {
                continue;
            };
            match sub.sender.try_send(response) {
                EventPush::Sent => {},
                EventPush::Full => {
                    warn!(
                        table = %self.name,
                        pubsubid,
                        "dropping subscription: outbound queue full"
                    );
                    // Best effort; the queue that was just full may reject
                    // this too.
                    let _ = sub.sender.try_send(Response::error(format!(
                        "subscription {} dropped: outbound queue full",
                        pubsubid
                    )));
                    dead.push(pubsubid);
                },
                EventPush::Closed => {
                    debug!(table = %self.name, pubsubid, "subscriber connection closed");
                    dead.push(pubsubid);
                },
            }
        }
        if !dead.is_empty() {
            self.subscriptions.retain(|s| !dead.contains(&s.pubsubid));
        }
    }
}
