#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use vfs_storage::{
    CancelReason, Condition, Context, MemoryError, MemoryStore, Op, Operation, Pager, SortField,
    StatusId, StorageDatetime, StorageError, StoreError, VfsFile, VfsFileSearch, VfsFolder,
    VfsFolderSearch, VfsRepo,
};

fn ctx() -> Context {
    Context::background()
}

fn folder(title: &str) -> VfsFolder {
    VfsFolder {
        title: title.to_string(),
        ..Default::default()
    }
}

fn file(folder_id: i64, title: &str) -> VfsFile {
    VfsFile {
        folder_id,
        title: title.to_string(),
        path: format!("/{}", title),
        mime_type: "text/plain".to_string(),
        file_exists: true,
        ..Default::default()
    }
}

async fn repo_with_folders(titles: &[&str]) -> VfsRepo<MemoryStore> {
    let repo = VfsRepo::new(MemoryStore::new());
    for title in titles {
        repo.folders().add(&ctx(), &folder(title), &[]).await.unwrap();
    }
    repo
}

#[tokio::test]
async fn one_distinguishes_zero_one_and_many() {
    let repo = repo_with_folders(&["alpha", "beta", "beta"]).await;
    let folders = repo.folders();

    let search = |title: &str| VfsFolderSearch {
        title: Some(title.to_string()),
        ..Default::default()
    };

    assert!(folders.one(&ctx(), &search("gamma"), &[]).await.unwrap().is_none());

    let found = folders.one(&ctx(), &search("alpha"), &[]).await.unwrap().unwrap();
    assert_eq!(found.title, "alpha");

    let err = folders.one(&ctx(), &search("beta"), &[]).await.unwrap_err();
    assert!(err.is_ambiguous());
    assert!(matches!(
        err,
        StorageError::AmbiguousResult {
            entity: "vfs_folders",
            operation: Operation::One
        }
    ));
}

#[tokio::test]
async fn one_stays_ambiguous_when_ops_widen_the_window() {
    let repo = repo_with_folders(&["same", "same", "same"]).await;
    let search = VfsFolderSearch {
        title: Some("same".to_string()),
        ..Default::default()
    };

    let err = repo
        .folders()
        .one(&ctx(), &search, &[Op::Pager(Pager::unbounded())])
        .await
        .unwrap_err();
    assert!(err.is_ambiguous());
}

#[tokio::test]
async fn delete_marks_the_row_and_keeps_it() {
    let repo = repo_with_folders(&["docs"]).await;
    let enabled = repo.with_enabled_only();

    assert!(repo.folders().delete(&ctx(), 1).await.unwrap());

    let rows = repo.executor().rows("vfs_folders").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status_id"], 3);

    assert!(enabled.folders().by_id(&ctx(), 1, &[]).await.unwrap().is_none());
    let deleted = repo.folders().by_id(&ctx(), 1, &[]).await.unwrap().unwrap();
    assert_eq!(deleted.status_id, StatusId::Deleted);
    assert_eq!(deleted.title, "docs");
}

#[tokio::test]
async fn delete_of_missing_id_reports_no_effect() {
    let repo = repo_with_folders(&[]).await;
    assert!(!repo.folders().delete(&ctx(), 99).await.unwrap());
}

#[tokio::test]
async fn enabled_only_never_changes_the_original() {
    let repo = repo_with_folders(&["a", "b"]).await;
    let disabled = VfsFolder {
        id: 2,
        title: "b".to_string(),
        status_id: StatusId::Disabled,
        ..Default::default()
    };
    assert!(repo.folders().update(&ctx(), &disabled, &[]).await.unwrap());

    let enabled = repo.with_enabled_only();
    let all = VfsFolderSearch::default();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let original = repo.clone();
        let derived = enabled.clone();
        let all = all.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = Context::background();
            let unfiltered = original.folders().count(&ctx, &all, &[]).await.unwrap();
            let filtered = derived.folders().count(&ctx, &all, &[]).await.unwrap();
            (unfiltered, filtered)
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), (2, 1));
    }
    assert!(repo.folders().config().filters.is_empty());
}

#[tokio::test]
async fn created_at_is_never_written() {
    let repo = repo_with_folders(&[]).await;
    let requested = StorageDatetime::parse("2001-01-01T00:00:00Z").unwrap();

    let mut item = folder("photos");
    item.created_at = Some(requested.clone());
    let added = repo
        .folders()
        .add(&ctx(), &item, &[Op::columns(["title", "created_at"])])
        .await
        .unwrap();
    let stored_at = added.created_at.clone().unwrap();
    assert_ne!(stored_at, requested);

    let mut changed = added.clone();
    changed.created_at = Some(requested.clone());
    changed.title = "pictures".to_string();
    assert!(repo.folders().update(&ctx(), &changed, &[]).await.unwrap());
    assert!(
        repo.folders()
            .update(&ctx(), &changed, &[Op::columns(["created_at"])])
            .await
            .unwrap()
    );

    let reloaded = repo.folders().by_id(&ctx(), added.id, &[]).await.unwrap().unwrap();
    assert_eq!(reloaded.created_at, Some(stored_at));
    assert_eq!(reloaded.title, "pictures");
}

#[tokio::test]
async fn restricted_update_touches_only_named_columns() {
    let repo = repo_with_folders(&["music"]).await;

    let patch = VfsFolder {
        id: 1,
        title: "ignored".to_string(),
        is_favorite: true,
        ..Default::default()
    };
    assert!(
        repo.folders()
            .update(&ctx(), &patch, &[Op::columns(["is_favorite"])])
            .await
            .unwrap()
    );

    let reloaded = repo.folders().by_id(&ctx(), 1, &[]).await.unwrap().unwrap();
    assert_eq!(reloaded.title, "music");
    assert!(reloaded.is_favorite);
}

#[tokio::test]
async fn update_where_narrows_the_match() {
    let repo = repo_with_folders(&["music"]).await;
    let patch = VfsFolder {
        id: 1,
        title: "tunes".to_string(),
        ..Default::default()
    };

    let updated = repo
        .folders()
        .update(
            &ctx(),
            &patch,
            &[Op::Where(Condition::eq("status_id", StatusId::Disabled))],
        )
        .await
        .unwrap();
    assert!(!updated);
}

#[tokio::test]
async fn count_matches_unbounded_list() {
    let repo = repo_with_folders(&["a1", "a2", "b1", "a3"]).await;
    let searches = [
        VfsFolderSearch::default(),
        VfsFolderSearch {
            title: Some("a".to_string()),
            ..Default::default()
        },
        VfsFolderSearch {
            ids: Some(vec![1, 3, 42]),
            ..Default::default()
        },
        VfsFolderSearch {
            status_id: Some(StatusId::Disabled),
            ..Default::default()
        },
    ];

    for search in &searches {
        let count = repo.folders().count(&ctx(), search, &[]).await.unwrap();
        let listed = repo
            .folders()
            .list(&ctx(), search, Pager::unbounded(), &[])
            .await
            .unwrap();
        assert_eq!(count, listed.len() as u64);
    }

    let windowed = repo
        .folders()
        .count(&ctx(), &VfsFolderSearch::default(), &[Op::Pager(Pager::new(3, 1))])
        .await
        .unwrap();
    assert_eq!(windowed, 4);
}

#[tokio::test]
async fn pagination_follows_default_sort() {
    let titles: Vec<String> = (1..=7).map(|i| format!("f{}", i)).collect();
    let refs: Vec<&str> = titles.iter().map(String::as_str).collect();
    let repo = repo_with_folders(&refs).await;
    let all = VfsFolderSearch::default();

    let full: Vec<i64> = repo
        .folders()
        .list(&ctx(), &all, Pager::unbounded(), &[])
        .await
        .unwrap()
        .iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(full, vec![7, 6, 5, 4, 3, 2, 1]);

    let limited = repo
        .folders()
        .list(&ctx(), &all, Pager::new(0, 3), &[])
        .await
        .unwrap();
    assert_eq!(limited.len(), 3);

    let page: Vec<i64> = repo
        .folders()
        .list(&ctx(), &all, Pager::page(2, 3), &[])
        .await
        .unwrap()
        .iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(page, full[3..6].to_vec());

    let tail = repo
        .folders()
        .list(&ctx(), &all, Pager::new(6, 10), &[])
        .await
        .unwrap();
    assert_eq!(tail.len(), 1);
}

#[tokio::test]
async fn sort_op_overrides_and_default_sort_restores() {
    let repo = repo_with_folders(&["b", "c", "a"]).await;
    let folders = repo.folders();
    let all = VfsFolderSearch::default();

    let by_title: Vec<String> = folders
        .list(&ctx(), &all, Pager::unbounded(), &[Op::Sort(vec![SortField::asc("title")])])
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.title)
        .collect();
    assert_eq!(by_title, vec!["a", "b", "c"]);

    let restored: Vec<i64> = folders
        .list(
            &ctx(),
            &all,
            Pager::unbounded(),
            &[Op::Sort(vec![SortField::asc("title")]), folders.default_sort()],
        )
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(restored, vec![3, 2, 1]);
}

#[tokio::test]
async fn full_fetch_loads_relations() {
    let repo = repo_with_folders(&["root"]).await;
    let added = repo
        .files()
        .add(&ctx(), &file(1, "readme.txt"), &[])
        .await
        .unwrap();
    assert_eq!(added.id, 1);
    assert_eq!(added.status_id, StatusId::Enabled);

    let shallow = repo.files().by_id(&ctx(), 1, &[]).await.unwrap().unwrap();
    assert!(shallow.folder.is_none());

    let full = repo
        .files()
        .by_id(&ctx(), 1, &[repo.files().full()])
        .await
        .unwrap()
        .unwrap();
    let parent = full.folder.unwrap();
    assert_eq!(parent.id, 1);
    assert_eq!(parent.title, "root");
    assert_eq!(full.path, "/readme.txt");
}

#[tokio::test]
async fn file_search_fields() {
    let repo = repo_with_folders(&["root", "other"]).await;
    let files = repo.files();
    files.add(&ctx(), &file(1, "a.txt"), &[]).await.unwrap();
    files.add(&ctx(), &file(1, "b.png"), &[]).await.unwrap();
    files.add(&ctx(), &file(2, "c.txt"), &[]).await.unwrap();

    let in_root = VfsFileSearch {
        folder_id: Some(1),
        ..Default::default()
    };
    assert_eq!(files.count(&ctx(), &in_root, &[]).await.unwrap(), 2);

    let by_path = VfsFileSearch {
        path: Some("/c.txt".to_string()),
        ..Default::default()
    };
    let found = files.one(&ctx(), &by_path, &[]).await.unwrap().unwrap();
    assert_eq!(found.folder_id, 2);

    let by_title = VfsFileSearch {
        folder_id: Some(1),
        title: Some(".TXT".to_string()),
        ..Default::default()
    };
    assert_eq!(files.count(&ctx(), &by_title, &[]).await.unwrap(), 1);
}

#[tokio::test]
async fn transaction_scope_is_explicit() {
    use vfs_storage::{TransactionExecutor, Transactional};

    let repo = repo_with_folders(&["existing"]).await;

    let tx = repo.executor().begin_transaction().await.unwrap();
    let scoped = repo.with_transaction(tx.clone());
    scoped.folders().add(&ctx(), &folder("draft"), &[]).await.unwrap();
    assert_eq!(
        scoped
            .folders()
            .count(&ctx(), &VfsFolderSearch::default(), &[])
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        repo.folders()
            .count(&ctx(), &VfsFolderSearch::default(), &[])
            .await
            .unwrap(),
        1
    );
    tx.rollback().await.unwrap();
    assert_eq!(
        repo.folders()
            .count(&ctx(), &VfsFolderSearch::default(), &[])
            .await
            .unwrap(),
        1
    );

    let err = scoped
        .folders()
        .by_id(&ctx(), 1, &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err.store_error(),
        Some(StoreError::TransactionClosed)
    ));

    let tx = repo.executor().begin_transaction().await.unwrap();
    let scoped = repo.with_enabled_only().with_transaction(tx.clone());
    scoped.folders().delete(&ctx(), 1).await.unwrap();
    assert!(scoped.folders().by_id(&ctx(), 1, &[]).await.unwrap().is_none());
    tx.commit().await.unwrap();

    let stored = repo.folders().by_id(&ctx(), 1, &[]).await.unwrap().unwrap();
    assert_eq!(stored.status_id, StatusId::Deleted);
}

#[tokio::test]
async fn commit_keeps_rows_written_outside_the_transaction() {
    use vfs_storage::{TransactionExecutor, Transactional};

    let repo = repo_with_folders(&["existing"]).await;
    let tx = repo.executor().begin_transaction().await.unwrap();
    let scoped = repo.with_transaction(tx.clone());

    let inside = scoped.folders().add(&ctx(), &folder("in-tx"), &[]).await.unwrap();
    let renamed = VfsFolder {
        id: 1,
        title: "renamed".to_string(),
        ..Default::default()
    };
    assert!(
        scoped
            .folders()
            .update(&ctx(), &renamed, &[Op::columns(["title"])])
            .await
            .unwrap()
    );
    let outside = repo.folders().add(&ctx(), &folder("outside"), &[]).await.unwrap();
    assert_ne!(inside.id, outside.id);

    tx.commit().await.unwrap();

    let stored: Vec<(i64, String)> = repo
        .folders()
        .list(
            &ctx(),
            &VfsFolderSearch::default(),
            Pager::unbounded(),
            &[Op::Sort(vec![SortField::asc("id")])],
        )
        .await
        .unwrap()
        .into_iter()
        .map(|f| (f.id, f.title))
        .collect();
    assert_eq!(
        stored,
        vec![
            (1, "renamed".to_string()),
            (2, "in-tx".to_string()),
            (3, "outside".to_string()),
        ]
    );
}

#[tokio::test]
async fn store_failures_are_propagated_verbatim() {
    let repo = repo_with_folders(&[]).await;
    repo.executor().fail_next("connection reset by peer").await;

    let err = repo.folders().add(&ctx(), &folder("x"), &[]).await.unwrap_err();
    let Some(StoreError::Database(inner)) = err.store_error() else {
        panic!("expected a database error, got {err:?}");
    };
    assert!(matches!(
        inner.downcast_ref::<MemoryError>(),
        Some(MemoryError::Injected(message)) if message == "connection reset by peer"
    ));
    assert!(err.to_string().starts_with("vfs_folders: add failed"));

    let mut duplicate = folder("y");
    duplicate.id = 1;
    repo.folders().add(&ctx(), &duplicate, &[]).await.unwrap();
    let err = repo.folders().add(&ctx(), &duplicate, &[]).await.unwrap_err();
    assert!(!err.is_ambiguous());
    assert!(!err.is_cancelled());
    assert!(err.store_error().is_some());
}

#[tokio::test]
async fn deadline_aborts_slow_round_trips() {
    let repo = repo_with_folders(&["a"]).await;
    let slow = VfsRepo::new(repo.executor().with_latency(Duration::from_secs(5)));

    let ctx = Context::background().with_timeout(Duration::from_millis(20));
    let err = slow
        .folders()
        .list(&ctx, &VfsFolderSearch::default(), Pager::unbounded(), &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Cancelled {
            entity: "vfs_folders",
            operation: Operation::List,
            reason: CancelReason::DeadlineExceeded
        }
    ));
}

#[tokio::test]
async fn cancellation_is_distinct_from_store_failure() {
    let repo = repo_with_folders(&["a"]).await;
    let slow = VfsRepo::new(repo.executor().with_latency(Duration::from_secs(5)));

    let ctx = Context::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let err = slow
        .folders()
        .count(&ctx, &VfsFolderSearch::default(), &[])
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(err.store_error().is_none());

    // The abandoned write never reached the store.
    let ctx = Context::background();
    ctx.cancel();
    let err = repo.folders().add(&ctx, &folder("late"), &[]).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(repo.executor().rows("vfs_folders").await.len(), 1);
}
