//! RAG pipeline end-to-end against a mock embedding service.

use axum::routing::post;
use axum::{Json, Router};

use cd_domain::model::{MemoryCategory, SourceType};
use cd_rag::{EmbedClient, IfExists, IngestOutcome, RagPipeline, RetrieveFilters, UploadItem};
use cd_store::Store;

/// Deterministic toy embedding: letter frequencies, so related texts
/// point the same way and unrelated ones do not.
fn toy_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let count = |c: char| lower.chars().filter(|&x| x == c).count() as f32;
    vec![count('a'), count('b'), count('g'), count('m')]
}

async fn start_mock_embedder() -> String {
    let app = Router::new().route(
        "/embed",
        post(|Json(body): Json<serde_json::Value>| async move {
            let texts: Vec<String> = body["texts"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(str::to_owned))
                        .collect()
                })
                .unwrap_or_default();
            let vectors: Vec<Vec<f32>> = texts.iter().map(|t| toy_vector(t)).collect();
            Json(serde_json::json!({
                "vectors": vectors,
                "dim": 4,
                "model": "toy-embedder"
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/embed")
}

#[tokio::test]
async fn upload_then_retrieve_round_trips() {
    let embed_url = start_mock_embedder().await;
    let rag = RagPipeline::new(Store::open_in_memory().unwrap(), EmbedClient::new(embed_url));

    // A file big enough to need several chunks.
    let text = "alpha beta gamma delta ".repeat(200);
    let outcomes = rag
        .ingest_batch(
            vec![UploadItem {
                file_name: "corpus.txt".into(),
                bytes: text.into_bytes(),
            }],
            None,
            IfExists::Skip,
        )
        .await
        .unwrap();

    let (document, chunk_count) = match &outcomes[0] {
        IngestOutcome::Ingested { document, chunks } => (document.clone(), *chunks),
        IngestOutcome::Skipped { title } => panic!("unexpected skip of {title}"),
    };
    assert_eq!(document.source_type, SourceType::Upload);
    assert!(chunk_count > 1, "expected multiple chunks, got {chunk_count}");
    for chunk in rag.store().list_chunks(&document.id).unwrap() {
        assert!(chunk.content.chars().count() <= 1_000);
    }

    // Retrieval finds the content and renders the context block.
    let retrieval = rag
        .retrieve(
            "beta gamma",
            &RetrieveFilters {
                top_k: Some(2),
                min_score: Some(0.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!retrieval.hits.is_empty());
    assert!(retrieval.hits.len() <= 2);
    assert!(retrieval.hits[0].content.contains("beta gamma"));
    let context = retrieval.context.unwrap();
    assert!(context.starts_with("Relevant Context (RAG):"));

    // A floor above the best score yields empty context.
    let retrieval = rag
        .retrieve(
            "beta gamma",
            &RetrieveFilters {
                min_score: Some(2.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(retrieval.hits.is_empty());
    assert!(retrieval.context.is_none());
}

#[tokio::test]
async fn if_exists_policies_behave_distinctly() {
    let embed_url = start_mock_embedder().await;
    let rag = RagPipeline::new(Store::open_in_memory().unwrap(), EmbedClient::new(embed_url));

    let item = |name: &str| UploadItem {
        file_name: name.into(),
        bytes: b"alpha beta gamma".to_vec(),
    };

    rag.ingest_batch(vec![item("Notes.md")], None, IfExists::Skip)
        .await
        .unwrap();

    // skip: case-insensitive title match drops the duplicate.
    let outcomes = rag
        .ingest_batch(vec![item("notes.MD")], None, IfExists::Skip)
        .await
        .unwrap();
    assert!(matches!(outcomes[0], IngestOutcome::Skipped { .. }));
    assert_eq!(rag.store().list_documents(None, None).unwrap().len(), 1);

    // allow: inserts unconditionally.
    rag.ingest_batch(vec![item("Notes.md")], None, IfExists::Allow)
        .await
        .unwrap();
    assert_eq!(rag.store().list_documents(None, None).unwrap().len(), 2);

    // replace: deletes every title match first.
    let outcomes = rag
        .ingest_batch(vec![item("notes.md")], None, IfExists::Replace)
        .await
        .unwrap();
    assert!(matches!(outcomes[0], IngestOutcome::Ingested { .. }));
    assert_eq!(rag.store().list_documents(None, None).unwrap().len(), 1);

    // In-batch dedupe under skip: second item with the same title skips.
    let rag2 = RagPipeline::new(
        Store::open_in_memory().unwrap(),
        rag.embedder().clone(),
    );
    let outcomes = rag2
        .ingest_batch(vec![item("a.txt"), item("A.TXT")], None, IfExists::Skip)
        .await
        .unwrap();
    assert!(matches!(outcomes[0], IngestOutcome::Ingested { .. }));
    assert!(matches!(outcomes[1], IngestOutcome::Skipped { .. }));
}

#[tokio::test]
async fn memory_notes_are_retrievable_like_documents() {
    let embed_url = start_mock_embedder().await;
    let rag = RagPipeline::new(Store::open_in_memory().unwrap(), EmbedClient::new(embed_url));

    let (memory, mirror) = rag
        .add_memory(
            MemoryCategory::Db,
            "gamma table",
            "the gamma table maps alpha ids to beta rows",
        )
        .await
        .unwrap();
    assert_eq!(memory.category, MemoryCategory::Db);
    assert_eq!(mirror.title, "Memory: gamma table");
    assert_eq!(mirror.source_type, SourceType::Manual);

    let retrieval = rag
        .retrieve(
            "gamma alpha beta",
            &RetrieveFilters {
                min_score: Some(0.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(retrieval
        .hits
        .iter()
        .any(|hit| hit.title == "Memory: gamma table"));
}

#[tokio::test]
async fn embed_outage_fails_ingest_and_retrieve_but_keeps_data() {
    let embed_url = start_mock_embedder().await;
    let store = Store::open_in_memory().unwrap();
    let rag = RagPipeline::new(store.clone(), EmbedClient::new(embed_url));

    rag.ingest_batch(
        vec![UploadItem {
            file_name: "kept.txt".into(),
            bytes: b"alpha beta gamma".to_vec(),
        }],
        None,
        IfExists::Skip,
    )
    .await
    .unwrap();

    // Same store, dead embedder.
    let down = RagPipeline::new(store.clone(), EmbedClient::new("http://127.0.0.1:1/embed"));

    let err = down
        .ingest_batch(
            vec![UploadItem {
                file_name: "new.txt".into(),
                bytes: b"delta".to_vec(),
            }],
            None,
            IfExists::Skip,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EXTERNAL_UNAVAILABLE");
    // The failed upload left no document behind.
    assert_eq!(store.list_documents(None, None).unwrap().len(), 1);

    let err = down
        .retrieve("alpha", &RetrieveFilters::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EXTERNAL_UNAVAILABLE");

    // Previously stored embeddings are still there for when it returns.
    assert!(store.embedding_count().unwrap() > 0);
}
