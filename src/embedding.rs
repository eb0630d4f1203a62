//! Embedding collaborators and the adapter that validates their output.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};

/// Default number of texts sent to the embedding model per call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default dimension of the [`HashingEmbedder`].
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

/// Turns texts into fixed-length vectors.
///
/// Implementations must be deterministic for a fixed model and input.
pub trait Embedder: Send + Sync {
    /// Stable identity of the model, persisted next to the vectors it produced.
    fn name(&self) -> String;

    /// Embed one batch, returning one vector per input in the same order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query.
    ///
    /// Models with a separate query encoding override this; the default
    /// embeds the query like a document.
    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[query.to_string()])?
            .pop()
            .ok_or_else(|| Error::Embedding("model returned no vector".into()))
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts)
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        (**self).embed_query(query)
    }
}

impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts)
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        (**self).embed_query(query)
    }
}

/// Batches calls to an [`Embedder`] and validates what comes back.
///
/// Every vector returned by one [`embed`](Self::embed) call has the same,
/// non-zero dimensionality and only finite components.
pub struct EmbedderAdapter<E> {
    inner: E,
    batch_size: usize,
}

impl<E: Embedder> EmbedderAdapter<E> {
    pub fn new(inner: E, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config(
                "embedding batch size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { inner, batch_size })
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed `texts` in order, one vector per text.
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        let mut dimension = None;

        for batch in texts.chunks(self.batch_size) {
            debug!(batch = batch.len(), "embedding batch");
            let embedded = self
                .inner
                .embed_batch(batch)
                .map_err(into_embedding_error)?;

            if embedded.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "model returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                )));
            }

            for vector in embedded {
                check_vector(&vector, &mut dimension)?;
                vectors.push(vector);
            }
        }

        Ok(vectors)
    }

    /// Embed a search query through the model's query encoding.
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let vector = self
            .inner
            .embed_query(query)
            .map_err(into_embedding_error)?;
        check_vector(&vector, &mut None)?;
        Ok(vector)
    }
}

fn check_vector(vector: &[f32], dimension: &mut Option<usize>) -> Result<()> {
    if vector.is_empty() {
        return Err(Error::Embedding(
            "model returned a zero-length vector".to_string(),
        ));
    }
    match *dimension {
        None => *dimension = Some(vector.len()),
        Some(expected) if expected != vector.len() => {
            return Err(Error::Embedding(format!(
                "model returned vectors of inconsistent dimensions ({expected} and {})",
                vector.len()
            )));
        }
        Some(_) => {}
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(Error::Embedding(
            "model returned non-finite values".to_string(),
        ));
    }
    Ok(())
}

fn into_embedding_error(err: Error) -> Error {
    match err {
        Error::Embedding(_) => err,
        other => Error::Embedding(other.to_string()),
    }
}

/// Model-free embedder based on signed feature hashing.
///
/// Each lowercase alphanumeric token is hashed with blake3 into one of
/// `dimension` buckets with a sign taken from the hash, and the result is
/// L2-normalized. Texts sharing words end up close; nothing is downloaded.
///
/// # Examples
///
/// ```
/// use docwhisper::embedding::{Embedder, HashingEmbedder};
///
/// let embedder = HashingEmbedder::new(64);
/// let vectors = embedder
///     .embed_batch(&["Bake at 350".to_string(), "bake AT 350!".to_string()])
///     .unwrap();
/// assert_eq!(vectors[0], vectors[1]);
/// assert_eq!(vectors[0].len(), 64);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&bytes[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> String {
        format!("hashing:{}", self.dimension)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.dimension == 0 {
            return Err(Error::Config(
                "hashing dimension must be greater than zero".to_string(),
            ));
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Returns scripted batches and records the batch sizes it saw.
    struct Scripted {
        batches: Mutex<Vec<Result<Vec<Vec<f32>>>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(batches: Vec<Result<Vec<Vec<f32>>>>) -> Self {
            Self {
                batches: Mutex::new(batches.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl Embedder for Scripted {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.seen.lock().unwrap().push(texts.len());
            self.batches.lock().unwrap().pop().unwrap()
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("text {i}")).collect()
    }

    #[test]
    fn zero_batch_size_is_config_error() {
        let result = EmbedderAdapter::new(HashingEmbedder::default(), 0);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn splits_input_into_batches() {
        let embedder = Scripted::new(vec![
            Ok(vec![vec![1.0, 0.0], vec![0.0, 1.0]]),
            Ok(vec![vec![1.0, 1.0]]),
        ]);
        let adapter = EmbedderAdapter::new(embedder, 2).unwrap();

        let vectors = adapter.embed(&texts(3)).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]);
        assert_eq!(*adapter.inner().seen.lock().unwrap(), vec![2, 1]);
    }

    #[test]
    fn empty_input_makes_no_calls() {
        let adapter = EmbedderAdapter::new(Scripted::new(vec![]), 4).unwrap();
        assert!(adapter.embed(&[]).unwrap().is_empty());
        assert!(adapter.inner().seen.lock().unwrap().is_empty());
    }

    #[test]
    fn rejects_mismatched_count() {
        let embedder = Scripted::new(vec![Ok(vec![vec![1.0]])]);
        let adapter = EmbedderAdapter::new(embedder, 8).unwrap();
        assert!(matches!(adapter.embed(&texts(2)), Err(Error::Embedding(_))));
    }

    #[test]
    fn rejects_inconsistent_dimensions_across_batches() {
        let embedder =
            Scripted::new(vec![Ok(vec![vec![1.0, 0.0]]), Ok(vec![vec![1.0]])]);
        let adapter = EmbedderAdapter::new(embedder, 1).unwrap();
        assert!(matches!(adapter.embed(&texts(2)), Err(Error::Embedding(_))));
    }

    #[test]
    fn rejects_non_finite_and_empty_vectors() {
        let adapter = EmbedderAdapter::new(
            Scripted::new(vec![Ok(vec![vec![f32::NAN, 1.0]])]),
            8,
        )
        .unwrap();
        assert!(matches!(adapter.embed(&texts(1)), Err(Error::Embedding(_))));

        let adapter =
            EmbedderAdapter::new(Scripted::new(vec![Ok(vec![vec![]])]), 8)
                .unwrap();
        assert!(matches!(adapter.embed(&texts(1)), Err(Error::Embedding(_))));
    }

    #[test]
    fn collaborator_failures_become_embedding_errors() {
        let embedder =
            Scripted::new(vec![Err(Error::Config("model missing".into()))]);
        let adapter = EmbedderAdapter::new(embedder, 8).unwrap();
        match adapter.embed(&texts(1)) {
            Err(Error::Embedding(msg)) => assert!(msg.contains("model missing")),
            other => panic!("expected embedding error, got {other:?}"),
        }
    }

    /// Encodes queries differently from documents.
    struct Asymmetric;

    impl Embedder for Asymmetric {
        fn name(&self) -> String {
            "asymmetric".to_string()
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn embed_query(&self, _query: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0, 1.0])
        }
    }

    #[test]
    fn queries_use_the_query_encoding() {
        let adapter = EmbedderAdapter::new(Box::new(Asymmetric), 8).unwrap();
        assert_eq!(adapter.embed_query("q").unwrap(), vec![0.0, 1.0]);
        assert_eq!(adapter.embed(&texts(1)).unwrap(), vec![vec![1.0, 0.0]]);

        let scripted = Scripted::new(vec![Ok(vec![vec![0.5, 0.5]])]);
        let adapter = EmbedderAdapter::new(scripted, 8).unwrap();
        assert_eq!(adapter.embed_query("q").unwrap(), vec![0.5, 0.5]);
        assert_eq!(*adapter.inner().seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn hashing_embedder_is_normalized_and_deterministic() {
        let embedder = HashingEmbedder::new(32);
        let a = embedder.embed_batch(&texts(1)).unwrap();
        let b = embedder.embed_batch(&texts(1)).unwrap();
        assert_eq!(a, b);

        let norm = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(embedder.name(), "hashing:32");
    }

    #[test]
    fn hashing_embedder_maps_empty_text_to_zero_vector() {
        let vectors = HashingEmbedder::new(8)
            .embed_batch(&["  ...  ".to_string()])
            .unwrap();
        assert!(vectors[0].iter().all(|x| *x == 0.0));
    }
}
