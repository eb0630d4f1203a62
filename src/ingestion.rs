use std::ops::Range;

use rayon::prelude::*;
use serde::Serialize;
use tracing::warn;

use crate::{
    chunking::ChunkingConfig,
    error::{Error, Result},
    extract::TextExtractor,
    walker::DiscoveredFile,
};

/// Raw text of one source, consumed by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub source_id: String,
    pub text: String,
}

impl Document {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            text: text.into(),
        }
    }
}

/// A source that made it into the corpus, with the ids of its chunks and
/// the chunking that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestedSource {
    pub source_id: String,
    pub chunks: Range<u64>,
    pub chunking: ChunkingConfig,
}

impl IngestedSource {
    pub fn chunk_count(&self) -> u64 {
        self.chunks.end - self.chunks.start
    }
}

/// A source that was skipped, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestFailure {
    pub source_id: String,
    pub reason: String,
}

impl IngestFailure {
    /// Record `err` against `source_id`.
    ///
    /// Parse errors already name their source, so only the reason is kept.
    pub fn from_error(source_id: impl Into<String>, err: &Error) -> Self {
        let reason = match err {
            Error::Parse { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        Self {
            source_id: source_id.into(),
            reason,
        }
    }
}

/// Outcome of one ingestion call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub ingested: Vec<IngestedSource>,
    pub failures: Vec<IngestFailure>,
}

impl IngestSummary {
    pub fn chunks_added(&self) -> u64 {
        self.ingested.iter().map(IngestedSource::chunk_count).sum()
    }

    pub fn succeeded(&self) -> usize {
        self.ingested.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn merge(&mut self, other: IngestSummary) {
        self.ingested.extend(other.ingested);
        self.failures.extend(other.failures);
    }
}

/// Extract the text of `files` in parallel.
///
/// Returns the loaded documents in input order together with the files
/// that could not be read.
pub fn load_documents<X: TextExtractor + ?Sized>(
    files: &[DiscoveredFile],
    extractor: &X,
) -> (Vec<Document>, Vec<IngestFailure>) {
    let results: Vec<(String, Result<String>)> = files
        .par_iter()
        .map(|file| {
            let source_id = file.source_id();
            let text = extractor.extract(&file.absolute_path);
            (source_id, text)
        })
        .collect();

    let mut documents = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (source_id, result) in results {
        match result {
            Ok(text) => documents.push(Document { source_id, text }),
            Err(e) => {
                warn!(source = %source_id, "skipping document: {e}");
                failures.push(IngestFailure::from_error(source_id, &e));
            }
        }
    }

    (documents, failures)
}
