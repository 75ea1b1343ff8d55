//! Query surface: k, path filters, score threshold and reindex.

use std::collections::BTreeSet;
use std::path::PathBuf;

use pretty_assertions::assert_eq;

use e2e_tests::{embed, hit_paths, search_text, TestHarness};
use vecsync_embeddings::model_from_settings;
use vecsync_engine::{PathFilter, SearchRequest, SyncEngine};
use vecsync_types::EmbeddingProvider;

fn fixture() -> (TestHarness, Vec<PathBuf>) {
    let harness = TestHarness::new();
    let paths = vec![
        harness.write("work/plan.txt", "rust release plan"),
        harness.write("work/notes.md", "rust borrow checker notes"),
        harness.write("home/recipes.txt", "rust removal from cast iron"),
        harness.write("home/garden.md", "tomato garden"),
    ];
    (harness, paths)
}

#[tokio::test]
async fn test_results_are_ranked_and_truncated_to_k() {
    let (harness, paths) = fixture();
    let engine = harness.open_idle().await;

    let all = search_text(&engine, "rust", 10).await;
    assert_eq!(all.len(), 3);
    assert!(all.hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(!hit_paths(&all).contains(&paths[3]));

    let top = search_text(&engine, "rust", 2).await;
    assert_eq!(top.len(), 2);
    assert_eq!(hit_paths(&top), hit_paths(&all)[..2].to_vec());

    // Default k from settings
    let default = engine.search(SearchRequest::text("rust")).await.unwrap();
    assert_eq!(default.len(), 3.min(harness.settings.search.default_k));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_prefix_and_path_set_filters() {
    let (harness, paths) = fixture();
    let engine = harness.open_idle().await;

    let work = engine
        .search(
            SearchRequest::text("rust")
                .with_k(10)
                .with_filter(PathFilter::prefix(harness.path("work"))),
        )
        .await
        .unwrap();
    let got: BTreeSet<PathBuf> = hit_paths(&work).into_iter().collect();
    assert_eq!(got, paths[..2].iter().cloned().collect());

    // Prefix matches whole components only
    let partial = engine
        .search(
            SearchRequest::text("rust")
                .with_k(10)
                .with_filter(PathFilter::prefix(harness.path("wor"))),
        )
        .await
        .unwrap();
    assert!(partial.is_empty());

    let picked = engine
        .search(
            SearchRequest::text("rust")
                .with_k(10)
                .with_filter(PathFilter::paths([paths[2].clone()])),
        )
        .await
        .unwrap();
    assert_eq!(hit_paths(&picked), vec![paths[2].clone()]);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_min_score_drops_weak_hits() {
    let (harness, _) = fixture();
    let engine = harness.open_idle().await;

    let loose = search_text(&engine, "rust", 10).await;
    let cutoff = loose.hits[0].score - 1e-3;
    let strict = engine
        .search(SearchRequest::text("rust").with_k(10).with_min_score(cutoff))
        .await
        .unwrap();
    assert!(!strict.is_empty());
    assert!(strict.len() < loose.len());
    assert!(strict.hits.iter().all(|h| h.score > cutoff));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reindex_directory_picks_up_unnoticed_changes() {
    let (harness, paths) = fixture();
    let engine = harness.open_idle().await;
    let generation = engine.status().generation;

    // Changed on disk without an event
    harness.write("home/garden.md", "rust on the garden gate");
    assert_eq!(search_text(&engine, "rust", 10).await.len(), 3);

    let queued = engine
        .reindex(Some(vec![harness.path("home")]))
        .await
        .unwrap();
    assert_eq!(queued, 2);
    engine.wait_idle().await;

    // Only the changed file produced a commit
    assert_eq!(engine.status().generation, generation + 1);
    let hits = search_text(&engine, "rust", 10).await;
    assert_eq!(hits.len(), 4);
    assert!(hit_paths(&hits).contains(&paths[3]));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_text_query_degrades_when_model_is_unreachable() {
    let (harness, paths) = fixture();
    let indexed = harness.open_idle().await;
    indexed.shutdown().await.unwrap();

    let mut settings = harness.settings.clone();
    settings.embedding.provider = EmbeddingProvider::Http;
    settings.embedding.base_url = "http://127.0.0.1:1/v1".to_string();
    settings.embedding.request_timeout_ms = 2_000;
    let model = model_from_settings(&settings.embedding).unwrap();
    let engine = SyncEngine::with_parts(settings, model, harness.store.clone(), true)
        .await
        .unwrap();

    let response = engine.search(SearchRequest::text("rust")).await.unwrap();
    assert!(response.is_empty());
    assert_eq!(response.generation, engine.status().generation);

    // Vector queries never touch the model
    let response = engine
        .search(SearchRequest::vector(embed("rust release plan")).with_k(1))
        .await
        .unwrap();
    assert_eq!(hit_paths(&response), vec![paths[0].clone()]);

    engine.shutdown().await.unwrap();
}
