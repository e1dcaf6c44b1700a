use std::collections::BTreeSet;

use cpsync_core::{ProblemKey, ProblemQuery, StoreCounts, UpsertOutcome};
use cpsync_storage::{ProblemStore, StoreError};

use super::common::{sample_problem, setup_store, tags};

/// Repeated tag and difficulty upserts return the same row.
#[tokio::test]
async fn tag_and_difficulty_upserts_are_idempotent() {
    let (store, _container) = setup_store().await;

    let dp = store.upsert_tag("dp").await.expect("insert tag");
    let again = store.upsert_tag("  dp ").await.expect("existing tag");
    assert_eq!(dp, again);

    let bucket = store.upsert_difficulty(1500).await.expect("insert bucket");
    assert_eq!(store.upsert_difficulty(1500).await.expect("existing bucket"), bucket);

    let counts = store.counts().await.expect("counts");
    assert_eq!(
        counts,
        StoreCounts {
            problems: 0,
            tags: 1,
            difficulties: 1
        }
    );
}

/// A second write of the same natural key is reported, not applied, and rolls
/// back the tags it would have created.
#[tokio::test]
async fn existing_natural_key_rolls_back_the_whole_item() {
    let (store, _container) = setup_store().await;
    let problem = sample_problem(1, "A");

    let first = store
        .upsert_item(&problem, &tags(&["dp"]), Some(1500))
        .await
        .expect("first write");
    assert_eq!(first, UpsertOutcome::Created);

    let mut renamed = problem.clone();
    renamed.name = "Renamed".to_string();
    let second = store
        .upsert_item(&renamed, &tags(&["math"]), Some(800))
        .await
        .expect("second write");
    assert_eq!(second, UpsertOutcome::AlreadyExists);

    let counts = store.counts().await.expect("counts");
    assert_eq!(
        counts,
        StoreCounts {
            problems: 1,
            tags: 1,
            difficulties: 1
        }
    );
    let stored = store
        .find_problem(&ProblemKey::new(1, "A"))
        .await
        .expect("find")
        .expect("stored");
    assert_eq!(stored.name, "Problem 1A");
    assert_eq!(stored.tags, vec!["dp".to_string()]);
    assert_eq!(stored.rating, Some(1500));
    assert_eq!(stored.solved_count, Some(42));
}

/// A problem the schema rejects leaves none of its tags or bucket committed.
#[tokio::test]
async fn rejected_problem_rolls_back_its_tags_and_bucket() {
    let (store, _container) = setup_store().await;
    store
        .upsert_item(&sample_problem(1, "A"), &tags(&["dp"]), Some(1500))
        .await
        .expect("valid item");

    let err = store
        .upsert_item(
            &sample_problem(2, "AVERYLONGINDEX"),
            &tags(&["zzz", "dp"]),
            Some(1600),
        )
        .await
        .expect_err("index wider than the column");
    assert!(matches!(err, StoreError::Database(_)), "got {err:?}");
    assert!(!err.is_fatal());

    let counts = store.counts().await.expect("counts");
    assert_eq!(
        counts,
        StoreCounts {
            problems: 1,
            tags: 1,
            difficulties: 1
        }
    );

    // The pool is still usable after the aborted transaction.
    let next = store
        .upsert_item(&sample_problem(2, "B"), &tags(&["zzz"]), Some(1600))
        .await
        .expect("write after rollback");
    assert_eq!(next, UpsertOutcome::Created);
}

/// Two concurrent writers of the same key end with one row and no error.
#[tokio::test]
async fn concurrent_writers_of_one_key_do_not_fail() {
    let (store, _container) = setup_store().await;
    let problem = sample_problem(5, "C");
    let names = tags(&["graphs"]);

    let (a, b) = tokio::join!(
        store.upsert_item(&problem, &names, Some(2000)),
        store.upsert_item(&problem, &names, Some(2000)),
    );
    let mut outcomes = vec![a.expect("writer a"), b.expect("writer b")];
    outcomes.sort_by_key(|o| *o == UpsertOutcome::AlreadyExists);
    assert_eq!(outcomes, vec![UpsertOutcome::Created, UpsertOutcome::AlreadyExists]);
    assert_eq!(store.counts().await.expect("counts").problems, 1);
}

/// Pre-resolved tag refs are linked by `upsert_problem`; search filters by
/// name, tag and rating and returns the linked tags.
#[tokio::test]
async fn search_filters_and_loads_tags() {
    let (store, _container) = setup_store().await;
    let dp = store.upsert_tag("dp").await.expect("tag");
    let math = store.upsert_tag("math").await.expect("tag");
    let easy = store.upsert_difficulty(800).await.expect("bucket");
    let hard = store.upsert_difficulty(2400).await.expect("bucket");

    let outcome = store
        .upsert_problem(&sample_problem(1, "A"), &[math.clone(), dp.clone()], Some(easy))
        .await
        .expect("problem 1A");
    assert_eq!(outcome, UpsertOutcome::Created);
    let duplicate = store
        .upsert_problem(&sample_problem(1, "A"), &[dp.clone()], Some(hard))
        .await
        .expect("duplicate 1A");
    assert_eq!(duplicate, UpsertOutcome::AlreadyExists);
    store
        .upsert_problem(&sample_problem(2, "B"), &[dp.clone()], Some(hard))
        .await
        .expect("problem 2B");
    store
        .upsert_problem(&sample_problem(3, "C"), &[], None)
        .await
        .expect("problem 3C");

    let by_tag = store
        .search(&ProblemQuery {
            tag: Some("dp".into()),
            ..Default::default()
        })
        .await
        .expect("search by tag");
    let keys: Vec<String> = by_tag.iter().map(|p| p.key.to_string()).collect();
    assert_eq!(keys, vec!["1A", "2B"]);
    assert_eq!(by_tag[0].tags, vec!["dp".to_string(), "math".to_string()]);
    assert_eq!(by_tag[0].rating, Some(800));

    let by_rating = store
        .search(&ProblemQuery {
            tag: Some("dp".into()),
            rating: Some(2400),
            ..Default::default()
        })
        .await
        .expect("search by tag and rating");
    assert_eq!(by_rating.len(), 1);
    assert_eq!(by_rating[0].key, ProblemKey::new(2, "B"));

    let by_name = store
        .search(&ProblemQuery {
            name: Some("Problem 3C".into()),
            ..Default::default()
        })
        .await
        .expect("search by name");
    assert_eq!(by_name.len(), 1);
    assert!(by_name[0].tags.is_empty());
    assert_eq!(by_name[0].rating, None);

    let limited = store
        .search(&ProblemQuery {
            tag: Some("dp".into()),
            limit: Some(1),
            ..Default::default()
        })
        .await
        .expect("limited search");
    assert_eq!(limited.len(), 1);

    let err = store
        .search(&ProblemQuery::default())
        .await
        .expect_err("no criteria");
    assert!(matches!(err, StoreError::InvalidQuery(_)));
}

/// Sync states, stored keys and reset.
#[tokio::test]
async fn sync_states_keys_and_reset() {
    let (store, _container) = setup_store().await;
    assert!(store.get_last_sync_state().await.expect("state").is_none());

    store
        .upsert_item(&sample_problem(1, "A"), &tags(&["dp"]), None)
        .await
        .expect("1A");
    store
        .upsert_item(&sample_problem(1, "B"), &[], Some(900))
        .await
        .expect("1B");
    let keys: BTreeSet<ProblemKey> = store
        .stored_keys()
        .await
        .expect("keys")
        .into_iter()
        .collect();
    assert_eq!(
        keys,
        BTreeSet::from([ProblemKey::new(1, "A"), ProblemKey::new(1, "B")])
    );

    store.record_sync_state("abc", 2, 0).await.expect("state 1");
    let latest = store.record_sync_state("def", 3, 1).await.expect("state 2");
    assert_eq!(latest.outstanding, 1);
    assert_eq!(
        store.get_last_sync_state().await.expect("state"),
        Some(latest)
    );

    store.reset().await.expect("reset");
    assert_eq!(store.counts().await.expect("counts"), StoreCounts::default());
    assert!(store.get_last_sync_state().await.expect("state").is_none());
    assert!(store.stored_keys().await.expect("keys").is_empty());
}
