mod helpers;

use std::sync::Arc;

use apex::embedding::hashing::HashingEmbedder;
use apex::error::StoreError;
use apex::memory::knowledge::{self, KnowledgeStore, StoreOutcome};
use apex::memory::types::Fact;
use chrono::{Duration, TimeZone, Utc};
use helpers::{at_angle, shared_db, spike, FixedEmbedder};

const DIMS: usize = 8;

/// Cosine `cosine` to the query but well apart from any `at_angle` vector.
fn off_plane(cosine: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[0] = cosine;
    v[2] = (1.0 - cosine * cosine).sqrt();
    v
}

fn fixed_store(embedder: FixedEmbedder) -> KnowledgeStore {
    KnowledgeStore::new(shared_db(), Arc::new(embedder))
}

#[tokio::test]
async fn search_orders_by_score_and_respects_top_k() {
    let embedder = FixedEmbedder::new(DIMS)
        .with("query", spike(DIMS, 0))
        .with("close", at_angle(DIMS, 0.9))
        .with("middling", at_angle(DIMS, 0.6))
        .with("far", off_plane(0.3))
        .with("unrelated", spike(DIMS, 5));
    let store = fixed_store(embedder);

    for content in ["far", "unrelated", "close", "middling"] {
        store.add_fact(content).await.unwrap();
    }

    let hits = store.search("query", 2, 0.0).await.unwrap();
    let contents: Vec<&str> = hits.iter().map(|h| h.fact.content.as_str()).collect();
    assert_eq!(contents, vec!["close", "middling"]);
    assert!((hits[0].score - 0.9).abs() < 1e-4);
    assert!(hits[0].score >= hits[1].score);
}

#[tokio::test]
async fn min_score_filters_weak_matches() {
    let embedder = FixedEmbedder::new(DIMS)
        .with("query", spike(DIMS, 0))
        .with("close", at_angle(DIMS, 0.9))
        .with("far", at_angle(DIMS, 0.3));
    let store = fixed_store(embedder);
    store.add_fact("close").await.unwrap();
    store.add_fact("far").await.unwrap();

    let hits = store.search("query", 10, 0.5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].fact.content, "close");
    assert!(hits.iter().all(|h| h.score >= 0.5));
}

#[tokio::test]
async fn equal_scores_return_newest_first() {
    let db = shared_db();
    let embedder = FixedEmbedder::new(DIMS).with("query", spike(DIMS, 0));
    let model = "fixed-8".to_string();
    let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    {
        let mut conn = db.lock().unwrap();
        for (i, (content, offset)) in [("oldest", 0), ("newest", 2), ("middle", 1)].iter().enumerate() {
            knowledge::insert_fact(
                &mut conn,
                &Fact {
                    id: format!("fact-{i}"),
                    content: content.to_string(),
                    embedding: spike(DIMS, 0),
                    embedding_model: model.clone(),
                    created_at: base + Duration::minutes(*offset),
                    source_turn_id: None,
                },
            )
            .unwrap();
        }
    }

    let store = KnowledgeStore::new(db, Arc::new(embedder));
    let hits = store.search("query", 10, 0.0).await.unwrap();
    let contents: Vec<&str> = hits.iter().map(|h| h.fact.content.as_str()).collect();
    assert_eq!(contents, vec!["newest", "middle", "oldest"]);
}

#[tokio::test]
async fn top_k_zero_and_empty_store_return_nothing() {
    let store = KnowledgeStore::new(shared_db(), Arc::new(HashingEmbedder::new(64).unwrap()));
    assert!(store.search("anything", 5, 0.0).await.unwrap().is_empty());

    store.add_fact("user plays the cello").await.unwrap();
    assert!(store.search("cello", 0, 0.0).await.unwrap().is_empty());
}

#[tokio::test]
async fn a_fact_is_its_own_best_match() {
    let store = KnowledgeStore::new(shared_db(), Arc::new(HashingEmbedder::new(256).unwrap()));
    store.add_fact("user is allergic to peanuts").await.unwrap();
    store.add_fact("user works night shifts at the hospital").await.unwrap();

    let hits = store.search("user is allergic to peanuts", 1, 0.0).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].fact.content, "user is allergic to peanuts");
    assert!((hits[0].score - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn related_fact_outranks_unrelated_one() {
    let store = KnowledgeStore::new(shared_db(), Arc::new(HashingEmbedder::new(512).unwrap()));
    store.add_fact("user likes sushi").await.unwrap();
    store.add_fact("user dislikes mushrooms").await.unwrap();

    let hits = store.search("what sushi place should I try", 2, 0.0).await.unwrap();
    assert_eq!(hits[0].fact.content, "user likes sushi");
}

#[tokio::test]
async fn food_preference_query_prefers_the_liked_food() {
    // vectors stand in for a semantic embedding model
    let embedder = FixedEmbedder::new(4)
        .with("what food do they like", vec![0.8, 0.6, 0.0, 0.0])
        .with("likes sushi", vec![1.0, 0.0, 0.0, 0.0])
        .with("dislikes mushrooms", vec![0.2, 0.1, 0.97, 0.0]);
    let store = fixed_store(embedder);
    store.add_fact("likes sushi").await.unwrap();
    store.add_fact("dislikes mushrooms").await.unwrap();

    let hits = store.search("what food do they like", 10, 0.0).await.unwrap();
    let contents: Vec<&str> = hits.iter().map(|h| h.fact.content.as_str()).collect();
    assert_eq!(contents, vec!["likes sushi", "dislikes mushrooms"]);
    assert!(hits.iter().all(|h| h.score > 0.0));
}

#[tokio::test]
async fn forget_removes_fact_from_search() {
    let store = KnowledgeStore::new(shared_db(), Arc::new(HashingEmbedder::new(128).unwrap()));
    let fact = store.add_fact("user's sister is called Ana").await.unwrap();
    assert_eq!(store.count().await.unwrap(), 1);

    store.forget(&fact.id).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(store.get(&fact.id).await.unwrap().is_none());
    assert!(store.search("sister Ana", 5, 0.0).await.unwrap().is_empty());

    let err = store.forget(&fact.id).await.unwrap_err();
    assert!(matches!(err, StoreError::FactNotFound(id) if id == fact.id));
}

#[tokio::test]
async fn blank_content_is_rejected() {
    let store = KnowledgeStore::new(shared_db(), Arc::new(HashingEmbedder::new(32).unwrap()));
    let err = store.add_fact("   ").await.unwrap_err();
    assert!(matches!(err, StoreError::EmptyContent));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn facts_from_another_model_are_skipped_until_re_embedded() {
    let db = shared_db();
    {
        let mut conn = db.lock().unwrap();
        knowledge::insert_fact(
            &mut conn,
            &Fact {
                id: "legacy".into(),
                content: "user drinks oat milk".into(),
                embedding: vec![1.0, 0.0, 0.0],
                embedding_model: "old-model".into(),
                created_at: Utc::now(),
                source_turn_id: None,
            },
        )
        .unwrap();
    }

    let store = KnowledgeStore::new(db, Arc::new(HashingEmbedder::new(64).unwrap()));
    assert!(store.search("oat milk", 5, 0.0).await.unwrap().is_empty());
    assert_eq!(store.stale_facts().await.unwrap().len(), 1);

    let mut seen = Vec::new();
    let done = store.re_embed_stale(|n, total| seen.push((n, total))).await.unwrap();
    assert_eq!(done, 1);
    assert_eq!(seen, vec![(1, 1)]);

    assert!(store.stale_facts().await.unwrap().is_empty());
    let hits = store.search("oat milk", 5, 0.0).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].fact.id, "legacy");
}

#[tokio::test]
async fn restated_fact_is_stored_once() {
    let db = shared_db();
    let store = KnowledgeStore::new(Arc::clone(&db), Arc::new(HashingEmbedder::new(256).unwrap()));

    let first = store.add_fact_from_turn("User's name is Sam", 1).await.unwrap();
    let again = store.add_fact_from_turn("user's name is   sam", 3).await.unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.source_turn_id, Some(1));
    assert_eq!(store.count().await.unwrap(), 1);

    let hits = store.search("User's name is Sam", 5, 0.0).await.unwrap();
    assert_eq!(hits.len(), 1);

    let conn = db.lock().unwrap();
    let dedups: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM fact_log WHERE operation = 'dedup' AND fact_id = ?1",
            [&first.id],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(dedups, 1);
}

#[tokio::test]
async fn near_duplicates_merge_above_threshold_only() {
    let embedder = FixedEmbedder::new(DIMS)
        .with("prefers dark mode", spike(DIMS, 0))
        .with("prefers a dark theme", at_angle(DIMS, 0.97))
        .with("prefers dark chocolate", at_angle(DIMS, 0.8));
    let store = fixed_store(embedder).with_dedup_threshold(0.92);

    let original = store.add_fact("prefers dark mode").await.unwrap();
    let merged = store.add_fact("prefers a dark theme").await.unwrap();
    let separate = store.add_fact("prefers dark chocolate").await.unwrap();

    assert_eq!(merged.id, original.id);
    assert_ne!(separate.id, original.id);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[test]
fn facts_from_other_models_are_not_dedup_candidates() {
    let mut conn = helpers::test_db();
    let fact = |id: &str, model: &str| Fact {
        id: id.into(),
        content: "user drinks oat milk".into(),
        embedding: spike(DIMS, 0),
        embedding_model: model.into(),
        created_at: Utc::now(),
        source_turn_id: None,
    };

    knowledge::insert_fact(&mut conn, &fact("old", "old-model")).unwrap();
    let outcome = knowledge::store_fact(&mut conn, &fact("new", "fixed-8"), 0.92).unwrap();
    assert_eq!(outcome, StoreOutcome::Inserted);

    let outcome = knowledge::store_fact(&mut conn, &fact("newer", "fixed-8"), 0.92).unwrap();
    assert!(matches!(outcome, StoreOutcome::Duplicate { existing, .. } if existing.id == "new"));
    assert_eq!(knowledge::count_facts(&conn).unwrap(), 2);
}

#[tokio::test]
async fn keyword_search_matches_substrings_literally() {
    let store = KnowledgeStore::new(shared_db(), Arc::new(HashingEmbedder::new(64).unwrap()));
    store.add_fact("user is 100% vegan").await.unwrap();
    store.add_fact("user owns 1000 records").await.unwrap();
    store.add_fact("User likes SUSHI").await.unwrap();

    let hits = store.search_keyword("0%", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].fact.content, "user is 100% vegan");
    assert_eq!(hits[0].score, 0.0);

    let hits = store.search_keyword("sushi", 10).await.unwrap();
    assert_eq!(hits[0].fact.content, "User likes SUSHI");

    assert!(store.search_keyword("  ", 10).await.unwrap().is_empty());
    assert!(store.search_keyword("user", 0).await.unwrap().is_empty());
}
