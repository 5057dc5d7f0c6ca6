use hystore::config::SimilarityFunction;
use hystore::search::{LEXICAL_SCORE_SHIFT, QueryRequest, VectorRetriever};
use hystore::storage::migrate;
use hystore::{Document, DuplicatePolicy, Filter};

use crate::common::TestStore;

fn corpus() -> Vec<Document> {
    vec![
        Document::new("postgres stores rows in heap pages")
            .with_id("x")
            .with_embedding(vec![1.0, 0.0, 0.0])
            .with_meta("topic", "db"),
        Document::new("rust ownership and borrowing rules")
            .with_id("y")
            .with_embedding(vec![0.0, 1.0, 0.0])
            .with_meta("topic", "lang"),
        Document::new("vector indexes for nearest neighbor search")
            .with_id("z")
            .with_embedding(vec![0.6, 0.8, 0.0])
            .with_meta("topic", "db"),
    ]
}

async fn seeded(function: SimilarityFunction) -> Option<TestStore> {
    let store = TestStore::open(3, function).await?;
    store
        .search()
        .await
        .write(corpus(), DuplicatePolicy::Fail)
        .await
        .unwrap();
    Some(store)
}

fn ids(docs: &[Document]) -> Vec<&str> {
    docs.iter().map(|d| d.id.as_str()).collect()
}

#[tokio::test]
async fn cosine_ranks_nearest_first() {
    let Some(store) = seeded(SimilarityFunction::Cosine).await else {
        return;
    };
    let docs = store
        .search()
        .await
        .query(QueryRequest {
            embedding: Some(vec![1.0, 0.0, 0.0]),
            top_k: 3,
            ..QueryRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&docs), vec!["x", "z", "y"]);
    assert!((docs[0].score.unwrap() - 1.0).abs() < 1e-6);
    assert!(docs.windows(2).all(|w| w[0].score >= w[1].score));
    store.cleanup().await;
}

#[tokio::test]
async fn l2_override_scores_negative_distance() {
    let Some(store) = seeded(SimilarityFunction::Cosine).await else {
        return;
    };
    let settings = migrate::resolve(&store.config.index).unwrap().settings;
    let retriever = VectorRetriever::new(store.backend.store().clone(), settings);
    let docs = retriever
        .retrieve_with_function(&[0.0, 1.0, 0.0], None, 2, Some(SimilarityFunction::L2))
        .await
        .unwrap();
    assert_eq!(ids(&docs), vec!["y", "z"]);
    assert!(docs[0].score.unwrap().abs() < 1e-6);
    assert!(docs[1].score.unwrap() < 0.0);
    store.cleanup().await;
}

#[tokio::test]
async fn vector_queries_respect_filters() {
    let Some(store) = seeded(SimilarityFunction::Cosine).await else {
        return;
    };
    let search = store.search().await;
    let docs = search
        .query(QueryRequest {
            embedding: Some(vec![0.0, 1.0, 0.0]),
            filter: Some(Filter::eq("meta.topic", "db")),
            top_k: 5,
            ..QueryRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&docs), vec!["z", "x"]);
    store.cleanup().await;
}

#[tokio::test]
async fn lexical_queries_find_matching_terms() {
    let Some(store) = seeded(SimilarityFunction::Cosine).await else {
        return;
    };
    let docs = store
        .search()
        .await
        .query(QueryRequest {
            text: Some("ownership borrowing".into()),
            top_k: 3,
            ..QueryRequest::default()
        })
        .await
        .unwrap();
    // x and z share no term with the query and are not returned
    assert_eq!(ids(&docs), vec!["y"]);
    assert!(docs[0].score.unwrap() > LEXICAL_SCORE_SHIFT);
    store.cleanup().await;
}

#[tokio::test]
async fn lexical_queries_put_the_strongest_match_first() {
    let Some(store) = seeded(SimilarityFunction::Cosine).await else {
        return;
    };
    let docs = store
        .search()
        .await
        .query(QueryRequest {
            text: Some("rust ownership postgres".into()),
            top_k: 3,
            ..QueryRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&docs), vec!["y", "x"]);
    let scores: Vec<f64> = docs.iter().map(|d| d.score.unwrap()).collect();
    assert!(scores[0] > scores[1], "{scores:?}");
    store.cleanup().await;
}

#[tokio::test]
async fn hybrid_queries_fuse_both_lists() {
    let Some(store) = seeded(SimilarityFunction::Cosine).await else {
        return;
    };
    let docs = store
        .search()
        .await
        .query(QueryRequest {
            embedding: Some(vec![0.6, 0.8, 0.0]),
            text: Some("vector nearest neighbor".into()),
            top_k: 2,
            ..QueryRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].id, "z");
    let expected = 1.0 / 61.0 + 1.0 / 61.0;
    assert!((docs[0].score.unwrap() - expected).abs() < 1e-9);
    store.cleanup().await;
}

#[tokio::test]
async fn cosine_scores_follow_the_angle() {
    let Some(store) = TestStore::open(3, SimilarityFunction::Cosine).await else {
        return;
    };
    let search = store.search().await;
    search
        .write(
            vec![
                Document::new("east").with_id("e").with_embedding(vec![1.0, 0.0, 0.0]),
                Document::new("north").with_id("n").with_embedding(vec![0.0, 1.0, 0.0]),
                Document::new("diagonal").with_id("d").with_embedding(vec![0.707, 0.707, 0.0]),
            ],
            DuplicatePolicy::Fail,
        )
        .await
        .unwrap();

    let docs = search
        .query(QueryRequest {
            embedding: Some(vec![1.0, 0.0, 0.0]),
            top_k: 3,
            ..QueryRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&docs), vec!["e", "d", "n"]);
    let scores: Vec<f64> = docs.iter().map(|d| d.score.unwrap()).collect();
    assert!((scores[0] - 1.0).abs() < 1e-3);
    assert!((scores[1] - 0.707).abs() < 1e-3);
    assert!(scores[2].abs() < 1e-3);
    store.cleanup().await;
}

#[tokio::test]
async fn l2_prefers_the_closer_point() {
    let Some(store) = TestStore::open(3, SimilarityFunction::L2).await else {
        return;
    };
    let search = store.search().await;
    search
        .write(
            vec![
                Document::new("far").with_id("far").with_embedding(vec![2.0, 0.0, 0.0]),
                Document::new("near").with_id("near").with_embedding(vec![1.0, 0.0, 0.0]),
            ],
            DuplicatePolicy::Fail,
        )
        .await
        .unwrap();

    let docs = search
        .query(QueryRequest {
            embedding: Some(vec![1.0, 0.0, 0.0]),
            top_k: 2,
            ..QueryRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&docs), vec!["near", "far"]);
    assert!(docs[0].score.unwrap() > docs[1].score.unwrap());
    assert!((docs[1].score.unwrap() + 1.0).abs() < 1e-6);
    store.cleanup().await;
}
