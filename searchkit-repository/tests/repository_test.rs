//! Integration tests for typed repositories

mod common;

use common::InterferingStore;
use searchkit_repository::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Product {
    name: String,
    stock: i64,
    #[serde(default)]
    tags: Vec<String>,
}

impl Document for Product {
    fn index_name() -> &'static str {
        "products"
    }
}

fn product(name: &str, stock: i64) -> Product {
    Product {
        name: name.to_string(),
        stock,
        tags: Vec::new(),
    }
}

fn manual_config() -> RepositoryConfig {
    RepositoryConfig::new("products")
        .with_refresh(RefreshPolicy::Manual)
        .with_retry(RetryPolicy::immediate(3))
}

fn decrement(mut p: Product) -> Product {
    p.stock -= 1;
    p
}

// =============================================================================
// CRUD
// =============================================================================

#[tokio::test]
async fn test_index_then_get() {
    let repo: Repository<Product, _> = Repository::new(MemoryStore::new(), manual_config()).unwrap();

    let ack = repo.index("p-1", &product("lamp", 4), false).await.unwrap();
    assert_eq!(ack.result, WriteResult::Created);
    assert_eq!(ack.doc_version, 1);

    let stored = repo.get("p-1").await.unwrap();
    assert_eq!(stored.id, "p-1");
    assert_eq!(stored.index, "products");
    assert_eq!(stored.version, ack.version);
    assert_eq!(stored.doc, product("lamp", 4));
}

#[tokio::test]
async fn test_reindex_replaces_document() {
    let repo: Repository<Product, _> = Repository::new(MemoryStore::new(), manual_config()).unwrap();

    repo.index("p-1", &product("lamp", 4), false).await.unwrap();
    let ack = repo.index("p-1", &product("lamp", 9), false).await.unwrap();

    assert_eq!(ack.result, WriteResult::Updated);
    assert_eq!(ack.doc_version, 2);
    assert_eq!(repo.get("p-1").await.unwrap().doc.stock, 9);
}

#[tokio::test]
async fn test_create_existing_id_conflicts() {
    let repo: Repository<Product, _> = Repository::new(MemoryStore::new(), manual_config()).unwrap();

    repo.index("p-1", &product("lamp", 4), true).await.unwrap();
    let err = repo.index("p-1", &product("desk", 1), true).await.unwrap_err();

    assert!(matches!(err, RepositoryError::VersionConflict { ref id, .. } if id == "p-1"));
    assert_eq!(repo.get("p-1").await.unwrap().doc.name, "lamp");
}

#[tokio::test]
async fn test_delete_then_get_is_not_found() {
    let repo: Repository<Product, _> = Repository::new(MemoryStore::new(), manual_config()).unwrap();

    repo.index("p-1", &product("lamp", 4), false).await.unwrap();
    let ack = repo.delete("p-1").await.unwrap();
    assert_eq!(ack.result, WriteResult::Deleted);

    assert!(repo.get("p-1").await.unwrap_err().is_not_found());
    assert!(repo.delete("p-1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_read_after_refresh_reflects_last_write() {
    let repo: Repository<Product, _> = Repository::new(MemoryStore::new(), manual_config()).unwrap();

    for stock in 1..=5 {
        repo.index("p-1", &product("lamp", stock), false).await.unwrap();
    }
    repo.refresh().await.unwrap();

    let page = repo.search(SearchRequest::match_all()).await.unwrap();
    let values = page.values();
    assert_eq!(values, vec![product("lamp", 5)]);
    assert_eq!(repo.get("p-1").await.unwrap().doc.stock, 5);
}

#[tokio::test]
async fn test_shared_store_between_repositories() {
    let store = Arc::new(MemoryStore::new());
    let products: Repository<Product, _> = Repository::from_arc(Arc::clone(&store), manual_config()).unwrap();
    let raw: Repository<serde_json::Value, _> =
        Repository::from_arc(Arc::clone(&store), RepositoryConfig::new("products")).unwrap();

    products.index("p-1", &product("lamp", 2), false).await.unwrap();
    let value = raw.get("p-1").await.unwrap().doc;
    assert_eq!(value["name"], "lamp");
    assert_eq!(store.call_count("get"), 1);
}

// =============================================================================
// Optimistic concurrency
// =============================================================================

#[tokio::test]
async fn test_update_succeeds_within_retry_budget() {
    for interference in 0..=3 {
        let repo: Repository<Product, _> =
            Repository::new(InterferingStore::new(interference), manual_config()).unwrap();
        repo.index("p-1", &product("lamp", 10), false).await.unwrap();

        let updated = repo.update("p-1", decrement, 3).await.unwrap();

        assert_eq!(updated.doc.stock, 9);
        assert_eq!(repo.store().interference_count(), interference);
        assert_eq!(repo.get("p-1").await.unwrap().version, updated.version);
    }
}

#[tokio::test]
async fn test_update_exhausts_after_too_many_conflicts() {
    let repo: Repository<Product, _> = Repository::new(InterferingStore::new(4), manual_config()).unwrap();
    repo.index("p-1", &product("lamp", 10), false).await.unwrap();

    let err = repo.update("p-1", decrement, 3).await.unwrap_err();

    assert_eq!(
        err,
        RepositoryError::UpdateConflictExhausted {
            index: "products".to_string(),
            id: "p-1".to_string(),
            attempts: 4,
        }
    );
    assert_eq!(repo.get("p-1").await.unwrap().doc.stock, 10);
}

#[tokio::test]
async fn test_update_with_zero_retries() {
    let repo: Repository<Product, _> = Repository::new(InterferingStore::new(1), manual_config()).unwrap();
    repo.index("p-1", &product("lamp", 10), false).await.unwrap();

    let err = repo.update("p-1", decrement, 0).await.unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::UpdateConflictExhausted { attempts: 1, .. }
    ));
}

#[tokio::test]
async fn test_update_uses_configured_retries() {
    let config = manual_config().with_retry(RetryPolicy::immediate(1));
    let repo: Repository<Product, _> = Repository::new(InterferingStore::new(2), config).unwrap();
    repo.index("p-1", &product("lamp", 10), false).await.unwrap();

    let err = repo.update_with("p-1", decrement).await.unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::UpdateConflictExhausted { attempts: 2, .. }
    ));
}

#[tokio::test]
async fn test_update_waits_between_attempts() {
    let config = manual_config().with_retry(RetryPolicy::constant(2, Duration::from_millis(20)));
    let repo: Repository<Product, _> = Repository::new(InterferingStore::new(2), config).unwrap();
    repo.index("p-1", &product("lamp", 10), false).await.unwrap();

    let started = std::time::Instant::now();
    repo.update_with("p-1", decrement).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(40));
}

#[tokio::test]
async fn test_update_missing_document() {
    let repo: Repository<Product, _> = Repository::new(MemoryStore::new(), manual_config()).unwrap();
    assert!(repo.update("nope", decrement, 3).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_concurrent_updates_all_apply() {
    let config = manual_config().with_retry(RetryPolicy::immediate(50));
    let repo: Repository<Product, _> = Repository::new(MemoryStore::new(), config).unwrap();
    repo.index("p-1", &product("lamp", 20), false).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.update_with("p-1", decrement).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(repo.get("p-1").await.unwrap().doc.stock, 12);
}

// =============================================================================
// Refresh policy
// =============================================================================

#[tokio::test]
async fn test_refresh_disallowed_makes_no_store_call() {
    let config = RepositoryConfig::new("products").with_refresh(RefreshPolicy::Disabled);
    let repo: Repository<Product, _> = Repository::new(MemoryStore::new(), config).unwrap();

    let err = repo.refresh().await.unwrap_err();

    assert_eq!(
        err,
        RepositoryError::RefreshNotAllowed {
            index: "products".to_string()
        }
    );
    assert_eq!(repo.store().call_count("refresh"), 0);
    assert!(repo.store().calls().is_empty());
}

#[tokio::test]
async fn test_manual_refresh_controls_visibility() {
    let repo: Repository<Product, _> = Repository::new(MemoryStore::new(), manual_config()).unwrap();

    repo.index("p-1", &product("lamp", 1), false).await.unwrap();
    assert_eq!(repo.count(Query::MatchAll).await.unwrap(), 0);

    repo.refresh().await.unwrap();
    assert_eq!(repo.count(Query::MatchAll).await.unwrap(), 1);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_mapping_rejection_is_validation_error() {
    let store = MemoryStore::new().with_mapping("products", |source| {
        if source["stock"].is_i64() {
            Ok(())
        } else {
            Err("failed to parse field [stock] of type [long]".to_string())
        }
    });
    let repo: Repository<serde_json::Value, _> = Repository::new(store, manual_config()).unwrap();

    let err = repo
        .index("p-1", &serde_json::json!({ "name": "lamp", "stock": "many" }), false)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Validation(reason) if reason.contains("stock")));
}

#[tokio::test]
async fn test_offline_store_is_transport_failure() {
    let repo: Repository<Product, _> = Repository::new(MemoryStore::new(), manual_config()).unwrap();
    repo.store().set_offline(true);

    let err = repo.get("p-1").await.unwrap_err();
    assert!(matches!(err, RepositoryError::Transport(_)));
    assert!(err.is_transient());
}

// =============================================================================
// Extension fields
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Core {
    name: String,
}

#[tokio::test]
async fn test_extensible_documents_keep_unknown_fields() {
    let store = Arc::new(MemoryStore::new());
    let typed: Repository<Extensible<Core>, _> =
        Repository::from_arc(Arc::clone(&store), manual_config()).unwrap();
    let raw: Repository<serde_json::Value, _> =
        Repository::from_arc(Arc::clone(&store), manual_config()).unwrap();

    raw.index(
        "p-1",
        &serde_json::json!({ "name": "lamp", "legacy_sku": "L-77", "weight": 2.5 }),
        false,
    )
    .await
    .unwrap();

    let updated = typed
        .update(
            "p-1",
            |mut doc| {
                doc.core.name = "desk lamp".to_string();
                doc
            },
            0,
        )
        .await
        .unwrap();
    assert_eq!(updated.doc.extension("legacy_sku"), Some(&serde_json::json!("L-77")));

    let stored = raw.get("p-1").await.unwrap().doc;
    assert_eq!(
        stored,
        serde_json::json!({ "name": "desk lamp", "legacy_sku": "L-77", "weight": 2.5 })
    );
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_for_document_defaults() {
    let repo: Repository<Product, MemoryStore> = Repository::for_document(MemoryStore::new()).unwrap();
    assert_eq!(repo.index_name(), "products");
    assert_eq!(repo.config().refresh, RefreshPolicy::Disabled);
    assert_eq!(repo.config().retry, RetryPolicy::default());
}

#[test]
fn test_invalid_config_is_rejected_at_construction() {
    let invalid = [
        manual_config().with_scroll_page_size(0),
        manual_config().with_bulk(BulkConfig::default().with_max_actions(0)),
        manual_config().with_bulk(BulkConfig::default().with_max_bytes(0)),
        RepositoryConfig::new(" "),
    ];

    for config in invalid {
        let err = Repository::<Product, _>::new(MemoryStore::new(), config).unwrap_err();
        assert!(matches!(err, RepositoryError::Config(_)), "{:?}", err);
    }

    let err = Repository::<Product, _>::with_serializer(
        MemoryStore::new(),
        JsonSerializer,
        manual_config().with_scroll_page_size(0),
    )
    .unwrap_err();
    assert!(matches!(err, RepositoryError::Config(_)));
}

#[test]
fn test_repository_config_from_toml() {
    let config = RepositoryConfig::from_toml(
        r#"
        index = "products"
        refresh = "wait_for"
        scroll_page_size = 250

        [retry]
        max_retries = 5
        backoff = { kind = "constant", delay_ms = 25 }
        "#,
    )
    .unwrap();

    assert_eq!(config.index, "products");
    assert_eq!(config.refresh, RefreshPolicy::WaitFor);
    assert_eq!(config.scroll_page_size, 250);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(
        config.retry.delay_for_retry(3),
        Duration::from_millis(25)
    );
}

// Note: These tests require an OpenSearch node on localhost:9200.
// They are disabled by default but can be run with: cargo test -- --ignored

#[tokio::test]
#[ignore]
async fn test_opensearch_roundtrip() {
    let store = OpenSearchStore::new(OpenSearchConfig::new("http://localhost:9200")).unwrap();
    let config = RepositoryConfig::new("searchkit-it-products").with_refresh(RefreshPolicy::WaitFor);
    let repo: Repository<Product, _> = Repository::new(store, config).unwrap();

    repo.index("p-1", &product("lamp", 3), false).await.unwrap();
    let updated = repo.update("p-1", decrement, 3).await.unwrap();
    assert_eq!(updated.doc.stock, 2);

    let page = repo
        .search(SearchRequest::new(Query::term("_id", "p-1")))
        .await
        .unwrap();
    assert_eq!(page.total, 1);

    repo.delete("p-1").await.unwrap();
}
