//! Buffered bulk indexing.
//!
//! A [`BulkSession`] queues operations and sends them as one bulk request
//! when either threshold of its [`BulkConfig`] is reached, on
//! [`flush`](BulkSession::flush) and on [`close`](BulkSession::close).
//! Each item's outcome is handed to the callback it was queued with, in
//! submission order, once the batch response arrives.

use crate::config::BulkConfig;
use crate::document::{Version, WriteAck};
use crate::error::{RepositoryError, Result};
use crate::serializer::{JsonSerializer, Serializer};
use crate::store::{BulkAction, BulkActionKind, Store};
use searchkit_log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed bulk operation.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation<T> {
    /// Create or replace a document.
    Index {
        /// Document ID.
        id: String,
        /// Document data.
        doc: T,
        /// Only write if the stored document still has this version.
        version: Option<Version>,
    },
    /// Create a document, failing if the ID exists.
    Create {
        /// Document ID.
        id: String,
        /// Document data.
        doc: T,
    },
    /// Merge fields into an existing document.
    Update {
        /// Document ID.
        id: String,
        /// Partial document, a JSON object.
        patch: Value,
        /// Only update if the stored document still has this version.
        version: Option<Version>,
    },
    /// Delete a document.
    Delete {
        /// Document ID.
        id: String,
        /// Only delete if the stored document still has this version.
        version: Option<Version>,
    },
}

impl<T> BulkOperation<T> {
    /// Index operation without a version check.
    pub fn index(id: impl Into<String>, doc: T) -> Self {
        Self::Index {
            id: id.into(),
            doc,
            version: None,
        }
    }

    /// Create operation.
    pub fn create(id: impl Into<String>, doc: T) -> Self {
        Self::Create { id: id.into(), doc }
    }

    /// Partial update operation.
    pub fn update(id: impl Into<String>, patch: Value) -> Self {
        Self::Update {
            id: id.into(),
            patch,
            version: None,
        }
    }

    /// Delete operation.
    pub fn delete(id: impl Into<String>) -> Self {
        Self::Delete {
            id: id.into(),
            version: None,
        }
    }

    /// Require the stored document to have `version`. Has no effect on
    /// create operations.
    pub fn if_version(mut self, expected: Version) -> Self {
        match &mut self {
            Self::Index { version, .. }
            | Self::Update { version, .. }
            | Self::Delete { version, .. } => *version = Some(expected),
            Self::Create { .. } => {}
        }
        self
    }

    /// Document ID.
    pub fn id(&self) -> &str {
        match self {
            Self::Index { id, .. }
            | Self::Create { id, .. }
            | Self::Update { id, .. }
            | Self::Delete { id, .. } => id,
        }
    }

    fn into_action<Z: Serializer<T>>(self, serializer: &Z) -> Result<BulkAction> {
        Ok(match self {
            Self::Index { id, doc, version } => BulkAction::Index {
                source: serializer.to_source(&doc)?,
                id,
                if_version: version,
            },
            Self::Create { id, doc } => BulkAction::Create {
                source: serializer.to_source(&doc)?,
                id,
            },
            Self::Update { id, patch, version } => {
                if !patch.is_object() {
                    return Err(RepositoryError::validation(format!(
                        "update patch for {} must be a JSON object",
                        id
                    )));
                }
                BulkAction::Update {
                    id,
                    doc: patch,
                    if_version: version,
                }
            }
            Self::Delete { id, version } => BulkAction::Delete {
                id,
                if_version: version,
            },
        })
    }
}

/// Outcome of one bulk item, as seen by its callback.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemOutcome {
    /// Position of the item in the session, counting from zero.
    pub position: usize,
    /// Kind of operation.
    pub kind: BulkActionKind,
    /// Document ID.
    pub id: String,
    /// Acknowledgement, or why the item failed.
    pub result: Result<WriteAck>,
}

impl BulkItemOutcome {
    /// Whether the item was applied.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Counts of item outcomes over one or more flushes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    /// Bulk requests sent.
    pub batches: usize,
    /// Items applied.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Items whose outcome is unknown: their flush was abandoned or their
    /// session dropped before they were sent.
    pub cancelled: usize,
    /// IDs of failed items, in submission order.
    pub failed_ids: Vec<String>,
}

impl BulkReport {
    /// Total items reported.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    /// Whether every item was applied.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    fn record(&mut self, outcome: &BulkItemOutcome) {
        match &outcome.result {
            Ok(_) => self.succeeded += 1,
            Err(RepositoryError::Cancelled) => self.cancelled += 1,
            Err(_) => {
                self.failed += 1;
                self.failed_ids.push(outcome.id.clone());
            }
        }
    }

    fn merge(&mut self, other: &BulkReport) {
        self.batches += other.batches;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
        self.failed_ids.extend(other.failed_ids.iter().cloned());
    }
}

type ItemCallback = Box<dyn FnOnce(&BulkItemOutcome) + Send>;

/// Queued item waiting for its outcome.
struct Ticket {
    position: usize,
    kind: BulkActionKind,
    id: String,
    callback: Option<ItemCallback>,
}

impl Ticket {
    /// Count the outcome in `report`, then hand it to the callback.
    fn complete(self, result: Result<WriteAck>, report: &mut BulkReport) {
        let outcome = BulkItemOutcome {
            position: self.position,
            kind: self.kind,
            id: self.id,
            result,
        };
        report.record(&outcome);
        if let Some(callback) = self.callback {
            callback(&outcome);
        }
    }
}

/// Tickets of a batch whose response has not arrived yet. Dropping the
/// guard before it is disarmed reports every item as cancelled, both to
/// its callback and in the session report.
struct InFlight<'a> {
    index: &'a str,
    report: &'a mut BulkReport,
    tickets: Vec<Ticket>,
}

impl InFlight<'_> {
    fn disarm(&mut self) -> Vec<Ticket> {
        std::mem::take(&mut self.tickets)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.tickets.is_empty() {
            return;
        }
        warn!(
            target: "searchkit::bulk",
            "Bulk flush on {} abandoned with {} items in flight",
            self.index,
            self.tickets.len()
        );
        for ticket in self.tickets.drain(..) {
            ticket.complete(Err(RepositoryError::Cancelled), &mut *self.report);
        }
    }
}

/// Buffer of bulk operations against one index.
///
/// Every mutating method takes `&mut self`; share a session between tasks
/// only behind a lock.
///
/// Dropping a session with queued items reports each of them as
/// [`RepositoryError::Cancelled`]. Call [`close`](BulkSession::close) or use
/// [`Repository::with_bulk`](crate::Repository::with_bulk) to make sure
/// the last batch is sent.
pub struct BulkSession<T, S: Store, Z = JsonSerializer> {
    store: Arc<S>,
    serializer: Arc<Z>,
    index: String,
    config: BulkConfig,
    refresh: bool,
    actions: Vec<BulkAction>,
    tickets: Vec<Ticket>,
    pending_bytes: usize,
    next_position: usize,
    report: BulkReport,
    _marker: PhantomData<fn(T)>,
}

impl<T, S: Store, Z: Serializer<T>> BulkSession<T, S, Z> {
    pub(crate) fn new(
        store: Arc<S>,
        serializer: Arc<Z>,
        index: impl Into<String>,
        config: BulkConfig,
        refresh: bool,
    ) -> Self {
        Self {
            store,
            serializer,
            index: index.into(),
            config,
            refresh,
            actions: Vec::new(),
            tickets: Vec::new(),
            pending_bytes: 0,
            next_position: 0,
            report: BulkReport::default(),
            _marker: PhantomData,
        }
    }

    /// Queue an operation.
    pub async fn queue(&mut self, operation: BulkOperation<T>) -> Result<()> {
        let action = operation.into_action(self.serializer.as_ref())?;
        self.push(action, None).await
    }

    /// Queue an operation with a callback for its outcome.
    pub async fn queue_with<F>(&mut self, operation: BulkOperation<T>, callback: F) -> Result<()>
    where
        F: FnOnce(&BulkItemOutcome) + Send + 'static,
    {
        let action = operation.into_action(self.serializer.as_ref())?;
        self.push(action, Some(Box::new(callback))).await
    }

    /// Queue an index operation.
    pub async fn index(&mut self, id: impl Into<String>, doc: &T) -> Result<()> {
        let action = BulkAction::Index {
            id: id.into(),
            source: self.serializer.to_source(doc)?,
            if_version: None,
        };
        self.push(action, None).await
    }

    /// Queue a create operation.
    pub async fn create(&mut self, id: impl Into<String>, doc: &T) -> Result<()> {
        let action = BulkAction::Create {
            id: id.into(),
            source: self.serializer.to_source(doc)?,
        };
        self.push(action, None).await
    }

    /// Queue a partial update. `patch` must serialize to a JSON object.
    pub async fn update(&mut self, id: impl Into<String>, patch: &impl Serialize) -> Result<()> {
        let operation = BulkOperation::update(id, serde_json::to_value(patch)?);
        self.queue(operation).await
    }

    /// Queue a delete.
    pub async fn delete(&mut self, id: impl Into<String>) -> Result<()> {
        self.queue(BulkOperation::delete(id)).await
    }

    async fn push(&mut self, action: BulkAction, callback: Option<ItemCallback>) -> Result<()> {
        self.pending_bytes += action.estimated_size(&self.index);
        self.tickets.push(Ticket {
            position: self.next_position,
            kind: action.kind(),
            id: action.id().to_string(),
            callback,
        });
        self.actions.push(action);
        self.next_position += 1;

        if self.actions.len() >= self.config.max_actions
            || self.pending_bytes >= self.config.max_bytes
        {
            self.flush().await?;
        }
        Ok(())
    }
}

impl<T, S: Store, Z> BulkSession<T, S, Z> {
    /// Send every queued operation now.
    ///
    /// Per-item failures are reported to callbacks and counted in the
    /// returned report. If the request itself fails, every item of the
    /// batch is reported with that error and it is returned.
    pub async fn flush(&mut self) -> Result<BulkReport> {
        if self.actions.is_empty() {
            return Ok(BulkReport::default());
        }

        let actions = std::mem::take(&mut self.actions);
        let tickets = std::mem::take(&mut self.tickets);
        self.pending_bytes = 0;

        debug!(
            target: "searchkit::bulk",
            "Flushing {} actions to {}",
            actions.len(),
            self.index
        );
        let (response, tickets) = {
            let mut in_flight = InFlight {
                index: &self.index,
                report: &mut self.report,
                tickets,
            };
            let response = self.store.bulk(&self.index, &actions, self.refresh).await;
            (response, in_flight.disarm())
        };

        let mut report = BulkReport {
            batches: 1,
            ..BulkReport::default()
        };

        let failure = match response {
            Ok(items) if items.len() == tickets.len() => {
                for (ticket, item) in tickets.into_iter().zip(items) {
                    ticket.complete(item.into_result(&self.index), &mut report);
                }
                None
            }
            Ok(items) => {
                let err = RepositoryError::Server {
                    status: 500,
                    reason: format!(
                        "bulk response has {} items for {} actions",
                        items.len(),
                        tickets.len()
                    ),
                };
                for ticket in tickets {
                    ticket.complete(Err(err.clone()), &mut report);
                }
                Some(err)
            }
            Err(err) => {
                for ticket in tickets {
                    ticket.complete(Err(err.clone()), &mut report);
                }
                Some(err)
            }
        };

        if report.is_success() {
            info!(
                target: "searchkit::bulk",
                "Bulk flush on {}: {} items indexed",
                self.index,
                report.succeeded
            );
        } else {
            warn!(
                target: "searchkit::bulk",
                "Bulk flush on {}: {} succeeded, {} failed",
                self.index,
                report.succeeded,
                report.failed
            );
        }
        self.report.merge(&report);

        match failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Flush the remaining operations and return the cumulative report.
    pub async fn close(mut self) -> Result<BulkReport> {
        self.finish().await
    }

    /// Number of queued operations.
    pub fn pending(&self) -> usize {
        self.actions.len()
    }

    /// Estimated size of the queued operations in bytes.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Cumulative report of every flush so far.
    pub fn report(&self) -> &BulkReport {
        &self.report
    }

    /// Index the session writes to.
    pub fn index_name(&self) -> &str {
        &self.index
    }

    pub(crate) async fn finish(&mut self) -> Result<BulkReport> {
        self.flush().await?;
        Ok(self.report.clone())
    }
}

impl<T, S: Store, Z> Drop for BulkSession<T, S, Z> {
    fn drop(&mut self) {
        if self.tickets.is_empty() {
            return;
        }
        warn!(
            target: "searchkit::bulk",
            "Bulk session on {} dropped with {} unsent items",
            self.index,
            self.tickets.len()
        );
        for ticket in self.tickets.drain(..) {
            ticket.complete(Err(RepositoryError::Cancelled), &mut self.report);
        }
    }
}

impl<T, S: Store, Z> std::fmt::Debug for BulkSession<T, S, Z> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkSession")
            .field("index", &self.index)
            .field("pending", &self.actions.len())
            .field("pending_bytes", &self.pending_bytes)
            .field("report", &self.report)
            .finish()
    }
}
