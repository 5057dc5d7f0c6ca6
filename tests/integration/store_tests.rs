use serde_json::json;

use hystore::config::SimilarityFunction;
use hystore::search::QueryRequest;
use hystore::storage::Writer;
use hystore::{Blob, Document, DuplicatePolicy, Filter, StoreError};

use crate::common::TestStore;

fn doc(id: &str, content: &str, embedding: [f32; 3]) -> Document {
    Document::new(content)
        .with_id(id)
        .with_embedding(embedding.to_vec())
}

fn ids(docs: &[Document]) -> Vec<&str> {
    docs.iter().map(|d| d.id.as_str()).collect()
}

#[tokio::test]
async fn documents_round_trip() {
    let Some(store) = TestStore::open(3, SimilarityFunction::Cosine).await else {
        return;
    };
    let written = doc("a", "hello world", [0.5, 0.25, 1.0])
        .with_meta("lang", "en")
        .with_meta("page", 3)
        .with_blob(Blob {
            data: vec![0, 1, 254, 255],
            mime_type: Some("application/octet-stream".into()),
            meta: serde_json::Map::new(),
        });

    let count = store
        .backend
        .store()
        .write(vec![written.clone()], DuplicatePolicy::Fail)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let by_id = Filter::eq("id", "a");
    let read = store
        .backend
        .store()
        .filter_documents(Some(&by_id), None)
        .await
        .unwrap();
    assert_eq!(read, vec![written]);
    store.cleanup().await;
}

#[tokio::test]
async fn nul_bytes_are_stripped_and_ids_generated() {
    let Some(store) = TestStore::open(3, SimilarityFunction::Cosine).await else {
        return;
    };
    let raw = Document {
        content: Some("nul\0byte".into()),
        ..Document::default()
    };

    store
        .backend
        .store()
        .write(vec![raw], DuplicatePolicy::Fail)
        .await
        .unwrap();
    let read = store.backend.store().filter_documents(None, None).await.unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].content.as_deref(), Some("nulbyte"));
    assert_eq!(read[0].id.len(), 64);
    store.cleanup().await;
}

#[tokio::test]
async fn fail_policy_rolls_back_the_whole_batch() {
    let Some(store) = TestStore::open(3, SimilarityFunction::Cosine).await else {
        return;
    };
    let writer = store.backend.store();
    writer
        .write(vec![doc("a", "one", [1.0, 0.0, 0.0])], DuplicatePolicy::Fail)
        .await
        .unwrap();

    let err = writer
        .write(
            vec![doc("b", "two", [0.0, 1.0, 0.0]), doc("a", "again", [0.0, 0.0, 1.0])],
            DuplicatePolicy::Fail,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { ref id } if id == "a"), "{err}");
    assert_eq!(writer.count().await.unwrap(), 1);
    let kept = writer.filter_documents(None, None).await.unwrap();
    assert_eq!(kept[0].content.as_deref(), Some("one"));
    store.cleanup().await;
}

#[tokio::test]
async fn skip_and_overwrite_policies() {
    let Some(store) = TestStore::open(3, SimilarityFunction::Cosine).await else {
        return;
    };
    let writer = store.backend.store();
    writer
        .write(vec![doc("a", "original", [1.0, 0.0, 0.0])], DuplicatePolicy::Fail)
        .await
        .unwrap();

    let skipped = writer
        .write(
            vec![doc("a", "ignored", [1.0, 0.0, 0.0]), doc("b", "new", [0.0, 1.0, 0.0])],
            DuplicatePolicy::Skip,
        )
        .await
        .unwrap();
    assert_eq!(skipped, 1);

    let overwritten = writer
        .write(vec![doc("a", "replaced", [0.0, 0.0, 1.0])], DuplicatePolicy::Overwrite)
        .await
        .unwrap();
    assert_eq!(overwritten, 1);

    let read = writer.filter_documents(None, None).await.unwrap();
    let contents: Vec<_> = read.iter().map(|d| d.content.as_deref().unwrap()).collect();
    assert_eq!(contents, vec!["replaced", "new"]);
    assert_eq!(read[0].embedding, Some(vec![0.0, 0.0, 1.0]));

    let search = store.search().await;
    let lexical = |text: &str| QueryRequest {
        text: Some(text.to_string()),
        top_k: 5,
        ..QueryRequest::default()
    };
    let replaced = search.query(lexical("replaced")).await.unwrap();
    assert_eq!(ids(&replaced), vec!["a"]);
    let original = search.query(lexical("original")).await.unwrap();
    assert!(!ids(&original).contains(&"a"), "{:?}", ids(&original));
    store.cleanup().await;
}

#[tokio::test]
async fn repeated_ids_under_overwrite_count_one_row() {
    let Some(store) = TestStore::open(3, SimilarityFunction::Cosine).await else {
        return;
    };
    let writer = store.backend.store();
    let written = writer
        .write(
            vec![doc("a", "first", [1.0, 0.0, 0.0]), doc("a", "second", [0.0, 1.0, 0.0])],
            DuplicatePolicy::Overwrite,
        )
        .await
        .unwrap();
    assert_eq!(written, 1);
    assert_eq!(writer.count().await.unwrap(), 1);

    let read = writer.filter_documents(None, None).await.unwrap();
    assert_eq!(read[0].content.as_deref(), Some("second"));
    store.cleanup().await;
}

#[tokio::test]
async fn failed_lexical_derivation_rolls_back_the_batch() {
    let Some(store) = TestStore::open(3, SimilarityFunction::Cosine).await else {
        return;
    };
    store
        .backend
        .store()
        .write(vec![doc("a", "kept", [1.0, 0.0, 0.0])], DuplicatePolicy::Fail)
        .await
        .unwrap();

    let broken = store.backend_with(|config| {
        config.lexical.tokenizer = "no_such_tokenizer".to_string();
    });
    let err = broken
        .store()
        .write(
            vec![doc("b", "lost", [0.0, 1.0, 0.0]), doc("c", "lost", [0.0, 0.0, 1.0])],
            DuplicatePolicy::Fail,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Query { .. }), "{err:?}");
    broken.close().await;

    let writer = store.backend.store();
    assert_eq!(writer.count().await.unwrap(), 1);
    let read = writer.filter_documents(None, None).await.unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].id, "a");
    store.cleanup().await;
}

#[tokio::test]
async fn deletes_are_idempotent() {
    let Some(store) = TestStore::open(3, SimilarityFunction::Cosine).await else {
        return;
    };
    let writer = store.backend.store();
    writer
        .write(
            vec![doc("a", "one", [1.0, 0.0, 0.0]), doc("b", "two", [0.0, 1.0, 0.0])],
            DuplicatePolicy::Fail,
        )
        .await
        .unwrap();

    let ids = vec!["a".to_string(), "missing".to_string()];
    assert_eq!(writer.delete_documents(&ids).await.unwrap(), 1);
    assert_eq!(writer.delete_documents(&ids).await.unwrap(), 0);
    assert_eq!(writer.count().await.unwrap(), 1);
    store.cleanup().await;
}

#[tokio::test]
async fn filters_select_and_delete() {
    let Some(store) = TestStore::open(3, SimilarityFunction::Cosine).await else {
        return;
    };
    let writer = store.backend.store();
    writer
        .write(
            vec![
                doc("a", "one", [1.0, 0.0, 0.0]).with_meta("author", "Ann").with_meta("year", 2021),
                doc("b", "two", [0.0, 1.0, 0.0]).with_meta("author", "Bob").with_meta("year", 2023),
                doc("c", "three", [0.0, 0.0, 1.0]).with_meta("year", 2024),
            ],
            DuplicatePolicy::Fail,
        )
        .await
        .unwrap();

    let recent = Filter::from_json(&json!({"field": "meta.year", "operator": ">", "value": 2022}))
        .unwrap();
    let ids: Vec<_> = writer
        .filter_documents(Some(&recent), None)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(ids, vec!["b", "c"]);

    let not_ann = Filter::from_json(
        &json!({"field": "meta.author", "operator": "not in", "value": ["Ann"]}),
    )
    .unwrap();
    assert_eq!(writer.delete_by_filter(Some(&not_ann)).await.unwrap(), 2);
    assert_eq!(writer.count().await.unwrap(), 1);
    store.cleanup().await;
}
