//! Store wrappers used to inject faults around a `MemoryStore`.

#![allow(dead_code)]

use async_trait::async_trait;
use searchkit_repository::{
    BulkAction, BulkItemResponse, DeleteRequest, IndexRequest, MemoryStore, Result,
    SearchResponse, Store, StoredDocument, WriteAck, WriteMode,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Simulates a concurrent writer: before each of the first `times`
/// conditional writes, the same document is rewritten unconditionally, so
/// the conditional write sees a newer sequence number and conflicts.
pub struct InterferingStore {
    pub inner: MemoryStore,
    remaining: AtomicU32,
    interfered: AtomicU32,
}

impl InterferingStore {
    pub fn new(times: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            remaining: AtomicU32::new(times),
            interfered: AtomicU32::new(0),
        }
    }

    pub fn interference_count(&self) -> u32 {
        self.interfered.load(Ordering::SeqCst)
    }

    fn take_turn(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Store for InterferingStore {
    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDocument>> {
        self.inner.get(index, id).await
    }

    async fn index(&self, index: &str, request: IndexRequest) -> Result<WriteAck> {
        if request.if_version.is_some() && self.take_turn() {
            let current = self.inner.get(index, &request.id).await?;
            if let Some(source) = current.and_then(|doc| doc.source) {
                self.inner
                    .index(
                        index,
                        IndexRequest {
                            id: request.id.clone(),
                            source,
                            mode: WriteMode::Index,
                            if_version: None,
                            refresh: false,
                        },
                    )
                    .await?;
                self.interfered.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.inner.index(index, request).await
    }

    async fn delete(&self, index: &str, request: DeleteRequest) -> Result<WriteAck> {
        self.inner.delete(index, request).await
    }

    async fn bulk(
        &self,
        index: &str,
        actions: &[BulkAction],
        refresh: bool,
    ) -> Result<Vec<BulkItemResponse>> {
        self.inner.bulk(index, actions, refresh).await
    }

    async fn search(
        &self,
        index: &str,
        body: Value,
        scroll: Option<Duration>,
    ) -> Result<SearchResponse> {
        self.inner.search(index, body, scroll).await
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<SearchResponse> {
        self.inner.scroll(scroll_id, keep_alive).await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        self.inner.clear_scroll(scroll_id).await
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        self.inner.refresh(index).await
    }

    async fn count(&self, index: &str, query: Value) -> Result<u64> {
        self.inner.count(index, query).await
    }
}

/// Bulk requests never complete; everything else goes to the inner store.
#[derive(Default)]
pub struct StallingStore {
    pub inner: MemoryStore,
}

#[async_trait]
impl Store for StallingStore {
    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDocument>> {
        self.inner.get(index, id).await
    }

    async fn index(&self, index: &str, request: IndexRequest) -> Result<WriteAck> {
        self.inner.index(index, request).await
    }

    async fn delete(&self, index: &str, request: DeleteRequest) -> Result<WriteAck> {
        self.inner.delete(index, request).await
    }

    async fn bulk(
        &self,
        _index: &str,
        _actions: &[BulkAction],
        _refresh: bool,
    ) -> Result<Vec<BulkItemResponse>> {
        futures::future::pending().await
    }

    async fn search(
        &self,
        index: &str,
        body: Value,
        scroll: Option<Duration>,
    ) -> Result<SearchResponse> {
        self.inner.search(index, body, scroll).await
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<SearchResponse> {
        self.inner.scroll(scroll_id, keep_alive).await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        self.inner.clear_scroll(scroll_id).await
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        self.inner.refresh(index).await
    }

    async fn count(&self, index: &str, query: Value) -> Result<u64> {
        self.inner.count(index, query).await
    }
}
