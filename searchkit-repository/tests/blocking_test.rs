//! Integration tests for the blocking repository flavor

mod common;

use common::InterferingStore;
use searchkit_repository::blocking::Repository;
use searchkit_repository::{
    BulkItemOutcome, BulkOperation, MemoryStore, Query, RefreshPolicy, RepositoryConfig,
    RepositoryError, RetryPolicy, SearchRequest,
};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    owner: String,
    balance: i64,
}

fn account(owner: &str, balance: i64) -> Account {
    Account {
        owner: owner.to_string(),
        balance,
    }
}

fn config() -> RepositoryConfig {
    RepositoryConfig::new("accounts")
        .with_refresh(RefreshPolicy::Manual)
        .with_retry(RetryPolicy::immediate(3))
}

fn repository() -> Repository<Account, MemoryStore> {
    Repository::new(MemoryStore::new(), config()).unwrap()
}

#[test]
fn test_blocking_crud() {
    let repo = repository();

    repo.index("a-1", &account("ada", 10), true).unwrap();
    assert!(repo.exists("a-1").unwrap());
    assert_eq!(repo.get("a-1").unwrap().doc.balance, 10);

    let stored = repo.get("a-1").unwrap();
    repo.index_versioned("a-1", &account("ada", 20), stored.version)
        .unwrap();
    let err = repo
        .index_versioned("a-1", &account("ada", 30), stored.version)
        .unwrap_err();
    assert!(err.is_conflict());

    repo.delete("a-1").unwrap();
    assert!(repo.find("a-1").unwrap().is_none());
}

#[test]
fn test_blocking_update_retries_conflicts() {
    let repo: Repository<Account, _> = Repository::new(InterferingStore::new(2), config()).unwrap();
    repo.index("a-1", &account("ada", 10), false).unwrap();

    let updated = repo
        .update_with("a-1", |mut a| {
            a.balance += 5;
            a
        })
        .unwrap();

    assert_eq!(updated.doc.balance, 15);
    assert_eq!(repo.store().interference_count(), 2);
}

#[test]
fn test_blocking_update_exhausts() {
    let repo: Repository<Account, _> = Repository::new(InterferingStore::new(5), config()).unwrap();
    repo.index("a-1", &account("ada", 10), false).unwrap();

    let err = repo.update("a-1", |a| a, 2).unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::UpdateConflictExhausted { attempts: 3, .. }
    ));
}

#[test]
fn test_blocking_refresh_policy() {
    let config = RepositoryConfig::new("accounts");
    let repo: Repository<Account, _> = Repository::new(MemoryStore::new(), config).unwrap();

    assert!(matches!(
        repo.refresh(),
        Err(RepositoryError::RefreshNotAllowed { .. })
    ));
    assert_eq!(repo.store().call_count("refresh"), 0);
}

#[test]
fn test_bulk_session_flushes_on_drop() {
    let repo = repository();

    {
        let mut bulk = repo.bulk();
        for n in 0..5 {
            bulk.index(format!("a-{}", n), &account("bob", n)).unwrap();
        }
        assert_eq!(bulk.pending(), 5);
        assert_eq!(repo.store().call_count("bulk"), 0);
    }

    assert_eq!(repo.store().call_count("bulk"), 1);
    assert_eq!(repo.store().document_count("accounts"), 5);
}

#[test]
fn test_bulk_session_flushes_on_panic() {
    let repo = repository();
    let outcomes: Arc<Mutex<Vec<BulkItemOutcome>>> = Arc::default();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut bulk = repo.bulk();
        let sink = Arc::clone(&outcomes);
        bulk.queue_with(
            BulkOperation::index("a-1", account("cy", 1)),
            move |outcome| sink.lock().unwrap().push(outcome.clone()),
        )
        .unwrap();
        panic!("import crashed");
    }));

    assert!(result.is_err());
    assert_eq!(repo.store().document_count("accounts"), 1);
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_success());
}

#[test]
fn test_blocking_with_bulk_error_path() {
    let repo = repository();

    let result: searchkit_repository::Result<()> = repo.with_bulk(|bulk| {
        bulk.index("a-1", &account("dee", 1))?;
        bulk.index("a-2", &account("eve", 2))?;
        Err(RepositoryError::validation("stop"))
    });

    assert_eq!(result, Err(RepositoryError::validation("stop")));
    assert_eq!(repo.store().document_count("accounts"), 2);
}

#[test]
fn test_blocking_bulk_close_report() {
    let repo = repository();

    let mut bulk = repo.bulk();
    bulk.create("a-1", &account("fay", 1)).unwrap();
    bulk.create("a-1", &account("fay", 2)).unwrap();
    bulk.update("a-1", &serde_json::json!({ "balance": 9 })).unwrap();
    let report = bulk.close().unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed_ids, vec!["a-1".to_string()]);
    assert_eq!(repo.get("a-1").unwrap().doc.balance, 9);
}

#[test]
fn test_blocking_scroll_iterator() {
    let repo = repository();
    {
        let mut bulk = repo.bulk();
        for n in 0..12 {
            bulk.index(format!("a-{:02}", n), &account("gus", n)).unwrap();
        }
    }
    repo.refresh().unwrap();

    let scroll = repo.scroll(SearchRequest::match_all().size(5)).unwrap();
    assert_eq!(scroll.total(), 12);
    let balances: i64 = scroll
        .map(|item| item.unwrap().value.unwrap().balance)
        .sum();

    assert_eq!(balances, (0..12).sum::<i64>());
    assert_eq!(repo.store().call_count("scroll"), 2);
    assert_eq!(repo.store().open_scrolls(), 0);
}

#[test]
fn test_blocking_scroll_released_on_drop() {
    let repo = repository();
    {
        let mut bulk = repo.bulk();
        for n in 0..12 {
            bulk.index(format!("a-{:02}", n), &account("hal", n)).unwrap();
        }
    }
    repo.refresh().unwrap();

    {
        let mut scroll = repo.scroll(SearchRequest::match_all().size(5)).unwrap();
        assert!(scroll.next().is_some());
        assert!(scroll.is_open());
        assert_eq!(repo.store().open_scrolls(), 1);
    }

    assert_eq!(repo.store().open_scrolls(), 0);
    assert_eq!(repo.count(Query::MatchAll).unwrap(), 12);
}
