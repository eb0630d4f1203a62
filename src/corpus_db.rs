use std::{collections::HashMap, path::Path};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    TableDefinition,
    WriteTransaction,
};
use tracing::{debug, error, info};

use crate::{
    document_store::Chunk,
    embedding::{Embedder, EmbedderAdapter},
    error::{Error, Result},
    incremental::SourceRecord,
    ingestion::IngestSummary,
    session::{IndexedChunk, Session},
    vector_index::{FlatIndex, VectorIndex},
    walker::DiscoveredFile,
};

const CHUNKS: TableDefinition<u64, &[u8]> = TableDefinition::new("chunks");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const SOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("sources");
const META: TableDefinition<&str, &str> = TableDefinition::new("meta");

const EMBEDDER_KEY: &str = "embedder";

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

/// On-disk copy of the corpus: chunks, their vectors, the source registry
/// and the identity of the embedder that produced the vectors.
///
/// Chunks are stored as JSON keyed by chunk id. Vector entries are:
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 values in native byte order
///
/// Every ingestion is written in one transaction, so the chunk and vector
/// tables always hold the same ids.
pub struct CorpusDb {
    db: Database,
}

impl CorpusDb {
    /// Open or create a corpus database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use docwhisper::CorpusDb;
    ///
    /// let db = CorpusDb::open(&tmp.path().join("corpus.redb")).unwrap();
    /// assert_eq!(db.len().unwrap(), 0);
    /// assert!(db.embedder().unwrap().is_none());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(redb::Error::from)?;

        let txn = db.begin_write()?;
        txn.open_table(CHUNKS)?;
        txn.open_table(VECTORS)?;
        txn.open_table(SOURCES)?;
        txn.open_table(META)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Number of stored chunks.
    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        Ok(table.last()?.map_or(0, |(k, _)| k.value() + 1))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append chunks with their vectors and register `sources`, all in a
    /// single transaction.
    ///
    /// Chunk ids must continue from [`len`](Self::len). The first append
    /// records `embedder` as the corpus embedder; later appends must use
    /// the same one.
    pub fn append(
        &self,
        embedder: &str,
        entries: &[IndexedChunk],
        sources: &[SourceRecord],
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        write_entries(&txn, embedder, entries, sources)?;
        txn.commit()?;

        debug!(
            chunks = entries.len(),
            sources = sources.len(),
            "corpus appended"
        );
        Ok(())
    }

    /// Swap the whole corpus for `entries` and `sources` in one transaction.
    ///
    /// Ids must start at zero. On any error the previous corpus is kept.
    pub fn replace(
        &self,
        embedder: &str,
        entries: &[IndexedChunk],
        sources: &[SourceRecord],
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        reset_tables(&txn)?;
        write_entries(&txn, embedder, entries, sources)?;
        txn.commit()?;

        info!(
            chunks = entries.len(),
            sources = sources.len(),
            "corpus replaced"
        );
        Ok(())
    }

    /// Load every chunk with its vector, in id order.
    ///
    /// Fails with [`Error::Inconsistent`] when ids are not dense from zero
    /// or a chunk has no well-formed vector.
    pub fn load_entries(&self) -> Result<Vec<IndexedChunk>> {
        let txn = self.db.begin_read()?;
        let chunks = txn.open_table(CHUNKS)?;
        let vectors = txn.open_table(VECTORS)?;

        let mut entries = Vec::new();
        for (expected, entry) in (0u64..).zip(chunks.iter()?) {
            let (key, value) = entry?;
            let id = key.value();
            let chunk: Chunk = serde_json::from_slice(value.value())?;
            if id != expected || chunk.id != id {
                return Err(inconsistent(format!(
                    "chunk {id} found where {expected} was expected"
                )));
            }

            let vector = vectors
                .get(id)?
                .and_then(|guard| decode_vector(guard.value()))
                .ok_or_else(|| {
                    inconsistent(format!("chunk {id} has no valid vector"))
                })?;
            entries.push(IndexedChunk { chunk, vector });
        }

        let vector_count = vectors.last()?.map_or(0, |(k, _)| k.value() + 1);
        if vector_count != entries.len() as u64 {
            return Err(inconsistent(format!(
                "{} chunks stored but vectors run up to id {vector_count}",
                entries.len()
            )));
        }

        Ok(entries)
    }

    /// Restore a session over the stored corpus.
    ///
    /// Refuses a corpus built with a different embedder.
    pub fn load_session<E: Embedder>(
        &self,
        embedder: EmbedderAdapter<E>,
    ) -> Result<Session<E, FlatIndex>> {
        self.check_embedder(&embedder.inner().name())?;
        let session = Session::new(embedder);
        let entries = self.load_entries()?;
        let count = entries.len();
        session.load_entries(entries)?;
        info!(chunks = count, "corpus loaded");
        Ok(session)
    }

    /// Persist what `summary` added to `session`, registering each ingested
    /// source with the modification time of its file.
    pub fn record_ingestion<E: Embedder, I: VectorIndex>(
        &self,
        session: &Session<E, I>,
        files: &[DiscoveredFile],
        summary: &IngestSummary,
    ) -> Result<()> {
        let (entries, records) = ingestion_entries(session, files, summary)?;
        self.append(&session.embedder().inner().name(), &entries, &records)
    }

    /// Replace the stored corpus with everything `summary` put into a fresh
    /// `session`.
    pub fn replace_with_ingestion<E: Embedder, I: VectorIndex>(
        &self,
        session: &Session<E, I>,
        files: &[DiscoveredFile],
        summary: &IngestSummary,
    ) -> Result<()> {
        let (entries, records) = ingestion_entries(session, files, summary)?;
        self.replace(&session.embedder().inner().name(), &entries, &records)
    }

    /// Dimension of the stored vectors, if any are stored.
    pub fn dimension(&self) -> Result<Option<usize>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        Ok(table
            .first()?
            .and_then(|(_, v)| decode_vector(v.value()))
            .map(|v| v.len()))
    }

    /// All registered sources, ordered by source id.
    pub fn sources(&self) -> Result<Vec<SourceRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SOURCES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let record = SourceRecord::deserialize(v.value()).ok_or_else(|| {
                inconsistent(format!("malformed source record for {}", k.value()))
            })?;
            result.push(record);
        }
        Ok(result)
    }

    /// Name of the embedder the stored vectors came from.
    pub fn embedder(&self) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(META)?;
        Ok(table.get(EMBEDDER_KEY)?.map(|v| v.value().to_string()))
    }

    /// Fail with a configuration error when the corpus was built with an
    /// embedder other than `embedder`.
    pub fn check_embedder(&self, embedder: &str) -> Result<()> {
        match self.embedder()? {
            Some(stored) => check_embedder_matches(&stored, embedder),
            None => Ok(()),
        }
    }

    /// Drop every chunk, vector, source and the recorded embedder.
    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        reset_tables(&txn)?;
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for CorpusDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorpusDb").finish_non_exhaustive()
    }
}

fn reset_tables(txn: &WriteTransaction) -> Result<()> {
    txn.delete_table(CHUNKS)?;
    txn.delete_table(VECTORS)?;
    txn.delete_table(SOURCES)?;
    txn.delete_table(META)?;
    txn.open_table(CHUNKS)?;
    txn.open_table(VECTORS)?;
    txn.open_table(SOURCES)?;
    txn.open_table(META)?;
    Ok(())
}

fn write_entries(
    txn: &WriteTransaction,
    embedder: &str,
    entries: &[IndexedChunk],
    sources: &[SourceRecord],
) -> Result<()> {
    let mut meta = txn.open_table(META)?;
    let stored = meta.get(EMBEDDER_KEY)?.map(|v| v.value().to_string());
    match stored {
        Some(stored) => check_embedder_matches(&stored, embedder)?,
        None => {
            meta.insert(EMBEDDER_KEY, embedder)?;
        }
    }

    let mut chunks = txn.open_table(CHUNKS)?;
    let mut vectors = txn.open_table(VECTORS)?;
    let mut next = chunks.last()?.map_or(0, |(k, _)| k.value() + 1);

    for entry in entries {
        if entry.chunk.id != next {
            return Err(Error::Inconsistent(format!(
                "chunk id {} stored at position {next}",
                entry.chunk.id
            )));
        }
        chunks.insert(
            entry.chunk.id,
            serde_json::to_vec(&entry.chunk)?.as_slice(),
        )?;

        let data = entry.vector.as_slice();
        let byte_len = HEADER_SIZE + std::mem::size_of_val(data);
        let mut guard = vectors.insert_reserve(entry.chunk.id, byte_len)?;
        let dest = guard.as_mut();
        dest[0..HEADER_SIZE]
            .copy_from_slice(&(data.len() as u32).to_le_bytes());
        dest[HEADER_SIZE..].copy_from_slice(bytemuck::cast_slice(data));

        next += 1;
    }

    let mut registry = txn.open_table(SOURCES)?;
    for record in sources {
        registry
            .insert(record.source_id.as_str(), record.serialize().as_slice())?;
    }
    Ok(())
}

/// Chunks and registry records for everything `summary` put into `session`.
fn ingestion_entries<E: Embedder, I: VectorIndex>(
    session: &Session<E, I>,
    files: &[DiscoveredFile],
    summary: &IngestSummary,
) -> Result<(Vec<IndexedChunk>, Vec<SourceRecord>)> {
    let by_source: HashMap<String, &DiscoveredFile> =
        files.iter().map(|f| (f.source_id(), f)).collect();

    let mut entries = Vec::new();
    let mut records = Vec::with_capacity(summary.ingested.len());
    for ingested in &summary.ingested {
        let file = by_source.get(&ingested.source_id).ok_or_else(|| {
            inconsistent(format!(
                "ingested source {} was not among the input files",
                ingested.source_id
            ))
        })?;
        entries.extend(session.entries(ingested.chunks.clone())?);
        records.push(SourceRecord::new(file, ingested));
    }
    Ok((entries, records))
}

fn check_embedder_matches(stored: &str, configured: &str) -> Result<()> {
    if stored == configured {
        return Ok(());
    }
    Err(Error::Config(format!(
        "corpus was built with embedder '{stored}' but '{configured}' is \
         configured; run `docwhisper rebuild` to re-embed it"
    )))
}

fn inconsistent(message: String) -> Error {
    error!("{message}");
    Error::Inconsistent(message)
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    let header = bytes.get(..HEADER_SIZE)?;
    let dimension = u32::from_le_bytes(header.try_into().ok()?) as usize;
    let body = &bytes[HEADER_SIZE..];
    if body.len() != dimension * 4 {
        return None;
    }
    Some(
        body.chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect(),
    )
}
