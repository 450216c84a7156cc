//! Embedder interface (C5): `embed(texts) -> float[]`, plus a deterministic
//! test double and a batching/retrying remote wrapper.
//!
//! Grounded directly in the teacher's `memory::embedder::Embedder` trait and
//! `memory::openai_embedder::OpenAIEmbedder`. The real provider SDK is out of
//! scope (spec §1); `RemoteEmbedder<P>` is generic over a narrow
//! `EmbeddingProvider` trait that a provider adapter would implement, mirroring
//! how the teacher's `ChatOpenAI` sits behind `LlmClient`.

use async_trait::async_trait;

use super::StoreError;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError>;

    fn dimension(&self) -> usize;
}

/// Deterministic hash-based embedder: stable across runs, suitable for
/// offline tests (spec §4.5).
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0f32; self.dimension];
                for (i, byte) in text.bytes().enumerate() {
                    v[i % self.dimension] += byte as f32 / 256.0;
                }
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// A raw provider call: takes a batch of texts, returns one vector per text
/// at the provider's native dimension. Implemented by a real SDK adapter;
/// out of scope here.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(
        &self,
        texts: &[&str],
        dimension: usize,
    ) -> Result<Vec<Vec<f32>>, StoreError>;
}

/// Wraps an [`EmbeddingProvider`] with batching up to `batch_size` and
/// exponential-backoff retry on transient failures (spec §4.5).
pub struct RemoteEmbedder<P: EmbeddingProvider> {
    provider: P,
    dimension: usize,
    batch_size: usize,
    max_retries: u32,
    base_delay: std::time::Duration,
}

impl<P: EmbeddingProvider> RemoteEmbedder<P> {
    pub fn new(provider: P, dimension: usize, batch_size: usize) -> Self {
        Self {
            provider,
            dimension,
            batch_size,
            max_retries: 3,
            base_delay: std::time::Duration::from_millis(100),
        }
    }

    async fn embed_with_retry(&self, batch: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        let mut attempt = 0;
        loop {
            match self.provider.embed_batch(batch, self.dimension).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.base_delay * 2u32.pow(attempt - 1);
                    tracing::warn!(attempt, ?delay, %err, "embedder call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<P: EmbeddingProvider> Embedder for RemoteEmbedder<P> {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, StoreError> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size.max(1)) {
            let vectors = self.embed_with_retry(chunk).await?;
            for vector in vectors {
                if vector.len() != self.dimension {
                    return Err(StoreError::EmbeddingDimensionMismatch {
                        expected: self.dimension,
                        actual: vector.len(),
                    });
                }
                out.push(vector);
            }
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
