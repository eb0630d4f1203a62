use serde::Serialize;
use tracing::debug;

use crate::{
    document_store::{Chunk, DocumentStore},
    embedding::{Embedder, EmbedderAdapter},
    error::{Error, Result},
    text_util::{DEFAULT_PREVIEW_MAX_CHARS, preview},
    vector_index::VectorIndex,
};

/// A retrieved chunk with its rank (1-based) and similarity score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub rank: usize,
    pub score: f32,
    pub chunk: Chunk,
}

/// Chunks ranked by descending similarity, at most `requested` of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub query: String,
    pub requested: usize,
    pub hits: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    /// Whether fewer chunks were available than requested.
    pub fn clamped(&self) -> bool {
        self.hits.len() < self.requested
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.hits.iter().map(|h| h.chunk.text.as_str())
    }
}

/// Embed `query`, search the index and resolve hits through the store.
///
/// Fails with [`Error::EmptyIndex`] before anything is ingested.
pub fn retrieve<E, I>(
    embedder: &EmbedderAdapter<E>,
    index: &I,
    store: &DocumentStore,
    query: &str,
    k: usize,
) -> Result<RetrievalResult>
where
    E: Embedder,
    I: VectorIndex + ?Sized,
{
    // Checked first so an empty corpus never reaches the model.
    if index.is_empty() {
        return Err(Error::EmptyIndex);
    }
    if k == 0 {
        return Err(Error::Config("k must be greater than zero".to_string()));
    }

    let query_vector = embedder.embed_query(query)?;
    let scored = index.search(&query_vector, k)?;
    debug!(k, hits = scored.len(), "vector search finished");

    let hits = scored
        .into_iter()
        .enumerate()
        .map(|(i, hit)| {
            Ok(RetrievedChunk {
                rank: i + 1,
                score: hit.score,
                chunk: store.get(hit.id)?.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RetrievalResult {
        query: query.to_string(),
        requested: k,
        hits,
    })
}

/// Format results for human-readable terminal output.
pub fn format_human(result: &RetrievalResult) {
    if result.hits.is_empty() {
        println!("No results found.");
        return;
    }

    for hit in &result.hits {
        println!(
            "{:>3}. [{:.3}] {} @{} #{}",
            hit.rank,
            hit.score,
            hit.chunk.source_id,
            hit.chunk.offset,
            hit.chunk.id
        );
        println!(
            "     {}",
            preview(&hit.chunk.text, DEFAULT_PREVIEW_MAX_CHARS)
        );
    }
    println!("\n{} result(s)", result.hits.len());
}

/// Format results as JSON output.
pub fn format_json(result: &RetrievalResult) -> Result<()> {
    println!("{}", serde_json::to_string(result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{embedding::HashingEmbedder, vector_index::FlatIndex};

    type Corpus = (EmbedderAdapter<HashingEmbedder>, FlatIndex, DocumentStore);

    fn corpus(texts: &[&str]) -> Corpus {
        let adapter =
            EmbedderAdapter::new(HashingEmbedder::new(64), 8).unwrap();
        let mut index = FlatIndex::new();
        let mut store = DocumentStore::new();

        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let vectors = adapter.embed(&owned).unwrap();
        let ids: Vec<u64> = (0..texts.len() as u64).collect();
        index.add(&ids, &vectors).unwrap();
        for (id, text) in ids.iter().zip(owned) {
            store
                .append(Chunk {
                    id: *id,
                    text,
                    source_id: "notes.txt".to_string(),
                    offset: 0,
                })
                .unwrap();
        }
        (adapter, index, store)
    }

    #[test]
    fn empty_corpus_is_empty_index_error() {
        let (adapter, index, store) = corpus(&[]);
        let err =
            retrieve(&adapter, &index, &store, "anything", 3).unwrap_err();
        assert!(matches!(err, Error::EmptyIndex));
    }

    #[test]
    fn exact_text_ranks_first_and_is_stable() {
        let (adapter, index, store) = corpus(&[
            "the quick brown fox",
            "bake at 350 degrees",
            "mix flour and sugar",
        ]);

        let query = "bake at 350 degrees";
        let first = retrieve(&adapter, &index, &store, query, 2).unwrap();
        assert_eq!(first.hits[0].chunk.id, 1);
        assert_eq!(first.hits[0].rank, 1);
        assert!((first.hits[0].score - 1.0).abs() < 1e-5);
        assert_eq!(first.hits.len(), 2);
        assert!(!first.clamped());

        let second = retrieve(&adapter, &index, &store, query, 2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn large_k_is_clamped() {
        let (adapter, index, store) = corpus(&["one", "two"]);
        let result = retrieve(&adapter, &index, &store, "one", 10).unwrap();
        assert_eq!(result.hits.len(), 2);
        assert!(result.clamped());
    }

    /// Fails every call so any embedding attempt is visible.
    struct Unreachable;

    impl Embedder for Unreachable {
        fn name(&self) -> String {
            "unreachable".to_string()
        }

        fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::Embedding("model called".to_string()))
        }
    }

    #[test]
    fn zero_k_is_rejected_before_embedding() {
        let (_, index, store) = corpus(&["one", "two"]);
        let adapter = EmbedderAdapter::new(Unreachable, 8).unwrap();
        let err = retrieve(&adapter, &index, &store, "one", 0).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err:?}");
    }

    #[test]
    fn store_out_of_step_is_not_found() {
        let (adapter, index, _) = corpus(&["one", "two"]);
        let store = DocumentStore::new();
        let err = retrieve(&adapter, &index, &store, "one", 1).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "chunk", .. }));
    }
}
