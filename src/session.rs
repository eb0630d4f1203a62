//! The explicit context object tying the pipeline together.
//!
//! A [`Session`] owns the embedder adapter and one corpus: the vector index
//! and the document store, kept in lockstep behind a single `RwLock`.
//! Writers embed outside the lock and only take it to validate and append a
//! finished batch, so no reader can ever see the index and the store
//! disagree in size. Queries share the read lock.

use std::{
    ops::Range,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    chunking::{ChunkingConfig, chunk_text},
    document_store::{Chunk, DocumentStore},
    embedding::{Embedder, EmbedderAdapter},
    error::{Error, Result},
    extract::TextExtractor,
    generation::{GenerationConfig, generate},
    generator::Generator,
    ingestion::{
        Document,
        IngestFailure,
        IngestSummary,
        IngestedSource,
        load_documents,
    },
    retriever::{RetrievalResult, retrieve},
    vector_index::{FlatIndex, VectorIndex},
    walker::DiscoveredFile,
};

/// A chunk together with its vector, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A generated answer and the chunks it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    pub retrieved: RetrievalResult,
}

struct Corpus<I> {
    index: I,
    store: DocumentStore,
}

impl<I: VectorIndex> Corpus<I> {
    fn check_lockstep(&self) -> Result<()> {
        if self.index.len() != self.store.len() {
            return Err(Error::Inconsistent(format!(
                "index holds {} vectors but store holds {} chunks",
                self.index.len(),
                self.store.len()
            )));
        }
        Ok(())
    }

    /// Append chunks and their vectors, or nothing at all.
    fn append(
        &mut self,
        chunks: Vec<Chunk>,
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        self.check_lockstep()?;
        let next = self.store.next_id();
        let ids: Vec<u64> = chunks.iter().map(|c| c.id).collect();
        if ids.iter().copied().ne(next..next + ids.len() as u64) {
            return Err(Error::Inconsistent(format!(
                "chunk ids must continue from {next}"
            )));
        }

        self.index.add(&ids, vectors)?;
        for chunk in chunks {
            self.store.append(chunk)?;
        }
        Ok(())
    }
}

pub struct Session<E, I = FlatIndex> {
    embedder: EmbedderAdapter<E>,
    corpus: RwLock<Corpus<I>>,
}

impl<E: Embedder, I: VectorIndex + Default> Session<E, I> {
    /// Start with an empty corpus.
    pub fn new(embedder: EmbedderAdapter<E>) -> Self {
        Self {
            embedder,
            corpus: RwLock::new(Corpus {
                index: I::default(),
                store: DocumentStore::new(),
            }),
        }
    }
}

impl<E: Embedder, I: VectorIndex> Session<E, I> {
    pub fn embedder(&self) -> &EmbedderAdapter<E> {
        &self.embedder
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Corpus<I>>> {
        self.corpus
            .read()
            .map_err(|_| Error::Inconsistent("corpus lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Corpus<I>>> {
        self.corpus
            .write()
            .map_err(|_| Error::Inconsistent("corpus lock poisoned".into()))
    }

    /// Number of chunks in the corpus.
    pub fn len(&self) -> Result<usize> {
        let corpus = self.read()?;
        corpus.check_lockstep()?;
        Ok(corpus.store.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Dimension of the indexed vectors, once something is indexed.
    pub fn dimension(&self) -> Result<Option<usize>> {
        Ok(self.read()?.index.dimension())
    }

    /// Chunk, embed and index `documents`.
    ///
    /// Each document is its own batch. A document whose embedding fails is
    /// recorded in the summary and skipped; a dimension mismatch aborts the
    /// call, keeping the documents appended before it.
    pub fn add_documents(
        &self,
        documents: &[Document],
        config: &ChunkingConfig,
    ) -> Result<IngestSummary> {
        config.validate()?;
        let mut summary = IngestSummary::default();

        for document in documents {
            let segments =
                chunk_text(&document.text, config.chunk_size, config.overlap)?;
            let texts: Vec<String> =
                segments.iter().map(|s| s.text.clone()).collect();

            let vectors = match self.embedder.embed(&texts) {
                Ok(vectors) => vectors,
                Err(e @ Error::Embedding(_)) => {
                    warn!(
                        source = %document.source_id,
                        "skipping document: {e}"
                    );
                    summary.failures.push(IngestFailure::from_error(
                        &document.source_id,
                        &e,
                    ));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut corpus = self.write()?;
            let first = corpus.store.next_id();
            let chunks: Vec<Chunk> = segments
                .into_iter()
                .zip(first..)
                .map(|(segment, id)| Chunk {
                    id,
                    text: segment.text,
                    source_id: document.source_id.clone(),
                    offset: segment.offset,
                })
                .collect();
            let count = chunks.len() as u64;
            corpus.append(chunks, &vectors)?;
            drop(corpus);

            debug!(
                source = %document.source_id,
                chunks = count,
                "document indexed"
            );
            summary.ingested.push(IngestedSource {
                source_id: document.source_id.clone(),
                chunks: first..first + count,
                chunking: *config,
            });
        }

        info!(
            documents = summary.succeeded(),
            failed = summary.failed(),
            chunks = summary.chunks_added(),
            "ingestion finished"
        );
        Ok(summary)
    }

    /// Extract `files` in parallel, then ingest whatever could be read.
    ///
    /// Unreadable files are recorded as failures alongside embedding failures.
    pub fn ingest_files<X: TextExtractor + ?Sized>(
        &self,
        files: &[DiscoveredFile],
        extractor: &X,
        config: &ChunkingConfig,
    ) -> Result<IngestSummary> {
        config.validate()?;
        let (documents, failures) = load_documents(files, extractor);
        let mut summary = self.add_documents(&documents, config)?;
        let embed_failures = std::mem::replace(&mut summary.failures, failures);
        summary.failures.extend(embed_failures);
        Ok(summary)
    }

    /// Top-`k` chunks for `query`.
    pub fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        let corpus = self.read()?;
        corpus.check_lockstep()?;
        retrieve(&self.embedder, &corpus.index, &corpus.store, query, k)
    }

    /// Retrieve context for `query` and generate a grounded answer.
    ///
    /// The generator is only called once retrieval has succeeded.
    pub fn answer<G: Generator + ?Sized>(
        &self,
        query: &str,
        k: usize,
        generator: &G,
        config: &GenerationConfig,
    ) -> Result<Answer> {
        let retrieved = self.retrieve(query, k)?;
        let text = generate(generator, query, &retrieved, config)?;
        Ok(Answer { text, retrieved })
    }

    /// Chunks and vectors with ids in `range`.
    pub fn entries(&self, range: Range<u64>) -> Result<Vec<IndexedChunk>> {
        let corpus = self.read()?;
        corpus.check_lockstep()?;
        range
            .map(|id| {
                let chunk = corpus.store.get(id)?.clone();
                let vector = corpus.index.vector(id).ok_or_else(|| {
                    Error::NotFound {
                        kind: "vector",
                        name: id.to_string(),
                    }
                })?;
                Ok(IndexedChunk { chunk, vector })
            })
            .collect()
    }

    /// Append previously persisted entries.
    ///
    /// Ids must continue exactly from the current corpus size.
    pub fn load_entries(&self, entries: Vec<IndexedChunk>) -> Result<()> {
        let (chunks, vectors): (Vec<Chunk>, Vec<Vec<f32>>) = entries
            .into_iter()
            .map(|entry| (entry.chunk, entry.vector))
            .unzip();
        let count = chunks.len();
        self.write()?.append(chunks, &vectors)?;
        debug!(chunks = count, "loaded persisted chunks");
        Ok(())
    }

    /// Drop every chunk and vector.
    pub fn clear(&self) -> Result<()> {
        let mut corpus = self.write()?;
        corpus.index.clear();
        corpus.store.clear();
        Ok(())
    }
}
