use tempfile::TempDir;

use nevis_core::traits::{Embedder, VectorStore};
use nevis_core::types::{Chunk, ScopeFilter};
use nevis_embed::FakeEmbedder;
use nevis_vector::LanceChunkStore;

fn chunks(embedder: &FakeEmbedder, doc: &str, client: &str, texts: &[&str]) -> Vec<Chunk> {
    let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
    let embs = embedder.embed_batch(&owned).unwrap();
    owned
        .into_iter()
        .zip(embs)
        .enumerate()
        .map(|(i, (content, embedding))| Chunk {
            id: Chunk::make_id(doc, i),
            document_id: doc.to_string(),
            client_id: client.to_string(),
            chunk_index: i,
            start: 0,
            end: content.len(),
            token_count: content.split_whitespace().count(),
            overlap_tokens: 0,
            novel_offset: 0,
            content,
            embedding,
        })
        .collect()
}

#[tokio::test]
async fn replace_search_and_fetch() {
    let tmp = TempDir::new().unwrap();
    let embedder = FakeEmbedder::new(32);
    let store = LanceChunkStore::open(tmp.path(), "chunks", 32).await.expect("open");

    store.replace_document_chunks("d1", &chunks(&embedder, "d1", "c1", &["401k rollover strategies for retirement", "garden compost"])).await.unwrap();
    store.replace_document_chunks("d2", &chunks(&embedder, "d2", "c2", &["retirement savings plan"])).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 3);

    let q = embedder.embed_query("retirement").unwrap();
    let hits = store.nearest(&q, &ScopeFilter::All, 10).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits[0].score >= hits[1].score);

    let scoped = store.nearest(&q, &ScopeFilter::Client("c2".into()), 10).await.unwrap();
    assert_eq!(scoped.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["d2#00000"]);

    let fetched = store.fetch_chunks(&["d1#00001".to_string(), "missing".to_string(), "d1#00000".to_string()]).await.unwrap();
    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched[0].content, "garden compost");
    assert_eq!(fetched[1].embedding.len(), 32);
}

#[tokio::test]
async fn replace_drops_stale_chunks() {
    let tmp = TempDir::new().unwrap();
    let embedder = FakeEmbedder::new(16);
    let store = LanceChunkStore::open(tmp.path(), "chunks", 16).await.unwrap();

    store.replace_document_chunks("d1", &chunks(&embedder, "d1", "c1", &["one", "two", "three"])).await.unwrap();
    store.replace_document_chunks("d1", &chunks(&embedder, "d1", "c1", &["uno"])).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 1);

    store.replace_document_chunks("d1", &[]).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn equal_distances_at_the_limit_go_to_the_smaller_id() {
    let tmp = TempDir::new().unwrap();
    let embedder = FakeEmbedder::new(16);
    let store = LanceChunkStore::open(tmp.path(), "chunks", 16).await.unwrap();
    for doc in ["d3", "d1", "d4", "d2"] {
        store.replace_document_chunks(doc, &chunks(&embedder, doc, "c1", &["pension review"])).await.unwrap();
    }

    let q = embedder.embed_query("pension review").unwrap();
    let hits = store.nearest(&q, &ScopeFilter::All, 2).await.unwrap();
    assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["d1#00000", "d2#00000"]);
    assert_eq!(hits[0].score, hits[1].score);
}

#[tokio::test]
async fn rejects_wrong_dimension() {
    let tmp = TempDir::new().unwrap();
    let store = LanceChunkStore::open(tmp.path(), "chunks", 8).await.unwrap();
    let err = store.nearest(&[0.0; 4], &ScopeFilter::All, 5).await.unwrap_err();
    assert!(matches!(err, nevis_core::Error::DimensionMismatch { expected: 8, actual: 4 }));
}
