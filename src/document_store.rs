use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{Error, Result};

/// A bounded span of a source document, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in the corpus, assigned at insertion.
    pub id: u64,
    pub text: String,
    /// Identifier of the originating document (its path).
    pub source_id: String,
    /// Byte offset of the chunk start in the extracted source text.
    pub offset: usize,
}

/// Ordered chunk collection addressed by chunk id.
///
/// Ids are dense: the chunk with id `n` is the `n`-th one appended.
#[derive(Debug, Default, Clone)]
pub struct DocumentStore {
    chunks: Vec<Chunk>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next appended chunk must carry.
    pub fn next_id(&self) -> u64 {
        self.chunks.len() as u64
    }

    pub fn append(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.id != self.next_id() {
            return Err(Error::Inconsistent(format!(
                "chunk id {} appended at position {}",
                chunk.id,
                self.next_id()
            )));
        }
        self.chunks.push(chunk);
        Ok(())
    }

    /// Look up a chunk the index returned.
    ///
    /// A miss means the index and the store disagree, which is a bug.
    pub fn get(&self, id: u64) -> Result<&Chunk> {
        usize::try_from(id)
            .ok()
            .and_then(|pos| self.chunks.get(pos))
            .ok_or_else(|| {
                error!(id, size = self.chunks.len(), "chunk missing from store");
                Error::NotFound {
                    kind: "chunk",
                    name: id.to_string(),
                }
            })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: u64) -> Chunk {
        Chunk {
            id,
            text: format!("chunk {id}"),
            source_id: "doc.pdf".to_string(),
            offset: id as usize * 10,
        }
    }

    #[test]
    fn append_and_get() {
        let mut store = DocumentStore::new();
        store.append(chunk(0)).unwrap();
        store.append(chunk(1)).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1).unwrap(), &chunk(1));
        assert_eq!(store.next_id(), 2);
    }

    #[test]
    fn out_of_order_append_is_rejected() {
        let mut store = DocumentStore::new();
        assert!(matches!(store.append(chunk(3)), Err(Error::Inconsistent(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn missing_chunk_is_not_found() {
        let store = DocumentStore::new();
        assert!(matches!(
            store.get(7),
            Err(Error::NotFound { kind: "chunk", .. })
        ));
    }

    #[test]
    fn chunk_serializes_all_fields() {
        let json = serde_json::to_string(&chunk(2)).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunk(2));
        assert!(json.contains("\"source_id\":\"doc.pdf\""));
    }
}
