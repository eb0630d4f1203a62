use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    chunking::ChunkingConfig,
    corpus_db::CorpusDb,
    embedding::{Embedder, EmbedderAdapter},
    error::Result,
    extract::TextExtractor,
    ingestion::{IngestSummary, IngestedSource},
    session::Session,
    walker::{self, DiscoveredFile},
};

/// Registry entry for one ingested source, stored in corpus.redb.
///
/// Serialized as:
/// `"source_id\0mtime\0first_chunk\0chunk_count\0chunk_size\0overlap"`.
///
/// # Examples
///
/// ```
/// use docwhisper::incremental::SourceRecord;
///
/// let record = SourceRecord {
///     source_id: "/docs/recipe.pdf".to_string(),
///     mtime: 1700000000,
///     first_chunk: 12,
///     chunk_count: 3,
///     chunk_size: 512,
///     overlap: 64,
/// };
/// let bytes = record.serialize();
/// let restored = SourceRecord::deserialize(&bytes).unwrap();
/// assert_eq!(record, restored);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRecord {
    pub source_id: String,
    pub mtime: u64,
    pub first_chunk: u64,
    pub chunk_count: u64,
    pub chunk_size: usize,
    pub overlap: usize,
}

impl SourceRecord {
    pub fn new(file: &DiscoveredFile, ingested: &IngestedSource) -> Self {
        Self {
            source_id: ingested.source_id.clone(),
            mtime: file.mtime,
            first_chunk: ingested.chunks.start,
            chunk_count: ingested.chunk_count(),
            chunk_size: ingested.chunking.chunk_size,
            overlap: ingested.chunking.overlap,
        }
    }

    /// Chunking the source was indexed with, reused on rebuild.
    pub fn chunking(&self) -> ChunkingConfig {
        ChunkingConfig::new(self.chunk_size, self.overlap)
    }

    /// Serialize to a byte vector for storage in the corpus database.
    pub fn serialize(&self) -> Vec<u8> {
        format!(
            "{}\0{}\0{}\0{}\0{}\0{}",
            self.source_id,
            self.mtime,
            self.first_chunk,
            self.chunk_count,
            self.chunk_size,
            self.overlap
        )
        .into_bytes()
    }

    /// Deserialize from bytes. Returns `None` if the format is invalid.
    pub fn deserialize(bytes: &[u8]) -> Option<Self> {
        let s = std::str::from_utf8(bytes).ok()?;
        let mut parts = s.splitn(6, '\0');
        let source_id = parts.next()?.to_string();
        let mtime = parts.next()?.parse().ok()?;
        let first_chunk = parts.next()?.parse().ok()?;
        let chunk_count = parts.next()?.parse().ok()?;
        let chunk_size = parts.next()?.parse().ok()?;
        let overlap = parts.next()?.parse().ok()?;
        Some(Self {
            source_id,
            mtime,
            first_chunk,
            chunk_count,
            chunk_size,
            overlap,
        })
    }

    pub fn exists_on_disk(&self) -> bool {
        Path::new(&self.source_id).is_file()
    }

    /// The registered file as it is on disk now.
    pub fn rediscover(&self) -> Result<DiscoveredFile> {
        let absolute_path = PathBuf::from(&self.source_id);
        let relative_path = absolute_path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| absolute_path.clone());
        let mtime = walker::file_mtime(&absolute_path)?;
        Ok(DiscoveredFile {
            relative_path,
            absolute_path,
            mtime,
        })
    }
}

/// Result of comparing discovered files against the source registry.
#[derive(Debug, Default)]
pub struct SourceDiff {
    /// Files that were never ingested.
    pub new_files: Vec<DiscoveredFile>,
    /// Files ingested before whose mtime differs.
    pub changed_files: Vec<DiscoveredFile>,
    /// Files ingested before and untouched since.
    pub unchanged_files: Vec<DiscoveredFile>,
}

/// Compare discovered files against the registered sources.
pub fn diff_sources(
    corpus_db: &CorpusDb,
    discovered: &[DiscoveredFile],
) -> Result<SourceDiff> {
    let known: HashMap<String, u64> = corpus_db
        .sources()?
        .into_iter()
        .map(|record| (record.source_id, record.mtime))
        .collect();

    let mut result = SourceDiff::default();
    for file in discovered {
        match known.get(&file.source_id()) {
            None => result.new_files.push(file.clone()),
            Some(&mtime) if mtime != file.mtime => {
                result.changed_files.push(file.clone());
            }
            Some(_) => result.unchanged_files.push(file.clone()),
        }
    }

    Ok(result)
}

/// Registered sources that no longer exist on disk.
pub fn missing_sources(records: &[SourceRecord]) -> Vec<&SourceRecord> {
    records.iter().filter(|r| !r.exists_on_disk()).collect()
}

/// Outcome of [`rebuild`].
#[derive(Debug, Default)]
pub struct RebuildReport {
    pub summary: IngestSummary,
    /// Registered sources that were gone from disk and got dropped.
    pub dropped: Vec<String>,
}

/// Re-extract and re-embed every registered source still on disk with
/// `embedder`, then swap the stored corpus for the result.
///
/// Each source is re-chunked with the chunking it was added with. Nothing
/// on disk changes unless every step succeeds.
pub fn rebuild<E: Embedder, X: TextExtractor + ?Sized>(
    corpus_db: &CorpusDb,
    embedder: EmbedderAdapter<E>,
    extractor: &X,
) -> Result<RebuildReport> {
    let mut report = RebuildReport::default();
    let mut groups: Vec<(ChunkingConfig, Vec<DiscoveredFile>)> = Vec::new();
    let mut files = Vec::new();

    for record in corpus_db.sources()? {
        if !record.exists_on_disk() {
            warn!(source = %record.source_id, "missing on disk, dropping");
            report.dropped.push(record.source_id);
            continue;
        }
        let file = record.rediscover()?;
        let chunking = record.chunking();
        match groups.iter_mut().find(|(config, _)| *config == chunking) {
            Some((_, group)) => group.push(file.clone()),
            None => groups.push((chunking, vec![file.clone()])),
        }
        files.push(file);
    }
    info!(
        sources = files.len(),
        dropped = report.dropped.len(),
        "rebuilding corpus"
    );

    let session: Session<E> = Session::new(embedder);
    for (chunking, group) in &groups {
        let summary = session.ingest_files(group, extractor, chunking)?;
        report.summary.merge(summary);
    }

    corpus_db.replace_with_ingestion(&session, &files, &report.summary)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, CorpusDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = CorpusDb::open(&tmp.path().join("corpus.redb")).unwrap();
        (tmp, db)
    }

    fn make_file(name: &str, mtime: u64) -> DiscoveredFile {
        DiscoveredFile {
            relative_path: PathBuf::from(name),
            absolute_path: PathBuf::from(format!("/abs/{name}")),
            mtime,
        }
    }

    fn register(db: &CorpusDb, file: &DiscoveredFile) {
        let ingested = IngestedSource {
            source_id: file.source_id(),
            chunks: 0..0,
            chunking: ChunkingConfig::default(),
        };
        db.append("e", &[], &[SourceRecord::new(file, &ingested)])
            .unwrap();
    }

    #[test]
    fn rejects_malformed_records() {
        assert!(
            SourceRecord::deserialize(b"/a.pdf\0notanumber\x000\x001\x0040\x0010")
                .is_none()
        );
        assert!(SourceRecord::deserialize(b"/a.pdf\x001").is_none());
        // Records without chunking parameters are rejected.
        assert!(SourceRecord::deserialize(b"/a.pdf\x001\x000\x001").is_none());
    }

    #[test]
    fn all_new_files() {
        let (_tmp, db) = test_db();
        let files = vec![make_file("a.md", 100), make_file("b.md", 200)];
        let diff = diff_sources(&db, &files).unwrap();

        assert_eq!(diff.new_files.len(), 2);
        assert!(diff.changed_files.is_empty());
        assert!(diff.unchanged_files.is_empty());
    }

    #[test]
    fn unchanged_and_changed_files() {
        let (_tmp, db) = test_db();
        register(&db, &make_file("a.md", 100));
        register(&db, &make_file("b.md", 100));

        let diff = diff_sources(
            &db,
            &[make_file("a.md", 100), make_file("b.md", 200)],
        )
        .unwrap();
        assert!(diff.new_files.is_empty());
        assert_eq!(diff.unchanged_files, vec![make_file("a.md", 100)]);
        assert_eq!(diff.changed_files, vec![make_file("b.md", 200)]);
    }

    #[test]
    fn rebuild_keeps_each_source_chunking_and_drops_missing() {
        use crate::{embedding::HashingEmbedder, extract::PlainTextExtractor};

        let tmp = tempfile::tempdir().unwrap();
        let db = CorpusDb::open(&tmp.path().join("corpus.redb")).unwrap();
        let adapter =
            || EmbedderAdapter::new(HashingEmbedder::new(32), 8).unwrap();

        let fine = tmp.path().join("fine.txt");
        let coarse = tmp.path().join("coarse.txt");
        let gone = tmp.path().join("gone.txt");
        let text = "Apple pie recipe. Mix flour and sugar. Bake at 350 degrees.";
        for path in [&fine, &coarse, &gone] {
            std::fs::write(path, text).unwrap();
        }

        let session = db.load_session(adapter()).unwrap();
        for (path, chunking) in [
            (&fine, ChunkingConfig::new(20, 4)),
            (&coarse, ChunkingConfig::new(200, 10)),
            (&gone, ChunkingConfig::new(200, 10)),
        ] {
            let files =
                walker::collect_inputs(&[path.clone()], None).unwrap();
            let summary = session
                .ingest_files(&files, &PlainTextExtractor, &chunking)
                .unwrap();
            db.record_ingestion(&session, &files, &summary).unwrap();
        }
        let before = db.sources().unwrap();
        std::fs::remove_file(&gone).unwrap();

        let report = rebuild(&db, adapter(), &PlainTextExtractor).unwrap();
        assert_eq!(report.dropped.len(), 1);
        assert!(report.dropped[0].ends_with("gone.txt"));
        assert_eq!(report.summary.succeeded(), 2);

        let after = db.sources().unwrap();
        assert_eq!(after.len(), 2);
        for record in &after {
            let old = before
                .iter()
                .find(|r| r.source_id == record.source_id)
                .unwrap();
            assert_eq!(record.chunking(), old.chunking());
            assert_eq!(record.chunk_count, old.chunk_count);
        }
        assert_eq!(db.len().unwrap(), report.summary.chunks_added());
        assert!(db.load_session(adapter()).is_ok());
    }

    #[test]
    fn failed_rebuild_leaves_the_corpus_untouched() {
        use crate::{embedding::HashingEmbedder, extract::PlainTextExtractor};

        let tmp = tempfile::tempdir().unwrap();
        let db = CorpusDb::open(&tmp.path().join("corpus.redb")).unwrap();
        let notes = tmp.path().join("notes.txt");
        std::fs::write(&notes, "Bake at 350 degrees.").unwrap();

        let session = db
            .load_session(
                EmbedderAdapter::new(HashingEmbedder::new(32), 8).unwrap(),
            )
            .unwrap();
        let files = walker::collect_inputs(&[notes], None).unwrap();
        let summary = session
            .ingest_files(&files, &PlainTextExtractor, &ChunkingConfig::default())
            .unwrap();
        db.record_ingestion(&session, &files, &summary).unwrap();
        let entries = db.load_entries().unwrap();

        // A corrupted registry record makes the chunking invalid.
        let mut record = db.sources().unwrap().remove(0);
        record.overlap = record.chunk_size;
        db.append("hashing:32", &[], &[record]).unwrap();

        let err = rebuild(
            &db,
            EmbedderAdapter::new(HashingEmbedder::new(32), 8).unwrap(),
            &PlainTextExtractor,
        )
        .unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
        assert_eq!(db.load_entries().unwrap(), entries);
    }

    #[test]
    fn missing_sources_checks_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let present = tmp.path().join("present.txt");
        std::fs::write(&present, "x").unwrap();

        let records = vec![
            SourceRecord {
                source_id: present.display().to_string(),
                mtime: 1,
                first_chunk: 0,
                chunk_count: 1,
                chunk_size: 512,
                overlap: 64,
            },
            SourceRecord {
                source_id: tmp.path().join("gone.txt").display().to_string(),
                mtime: 1,
                first_chunk: 1,
                chunk_count: 1,
                chunk_size: 512,
                overlap: 64,
            },
        ];
        let missing = missing_sources(&records);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].source_id.ends_with("gone.txt"));
    }
}
