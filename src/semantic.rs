use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use crate::model::{EnrichedListing, Listing, RawListing};

pub const DEFAULT_MODEL_ID: &str = "all-MiniLM-L6-v2";
pub const DEFAULT_MODEL_NAME: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_NORMALIZATION: &str = "l2";
pub const DEFAULT_BACKEND: &str = "local-hash-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticModelConfig {
    pub model_id: String,
    pub model_name: String,
    pub dimensions: usize,
    pub normalization: String,
    pub backend: String,
}

pub fn resolve_model_config(model_id: &str, dimensions: usize) -> SemanticModelConfig {
    let trimmed = model_id.trim();
    let resolved_id = if trimmed.is_empty() {
        DEFAULT_MODEL_ID
    } else {
        trimmed
    };

    let model_name = if resolved_id == DEFAULT_MODEL_ID {
        DEFAULT_MODEL_NAME
    } else {
        resolved_id
    };

    SemanticModelConfig {
        model_id: resolved_id.to_string(),
        model_name: model_name.to_string(),
        dimensions,
        normalization: DEFAULT_NORMALIZATION.to_string(),
        backend: DEFAULT_BACKEND.to_string(),
    }
}

pub trait EmbeddingBackend {
    fn dimensions(&self) -> usize;

    fn encode(&self, payloads: &[String]) -> Result<Vec<Vec<f32>>>;
}

impl<B: EmbeddingBackend + ?Sized> EmbeddingBackend for &B {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    fn encode(&self, payloads: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).encode(payloads)
    }
}

#[derive(Debug, Clone)]
pub struct LocalHashBackend {
    dimensions: usize,
}

impl EmbeddingBackend for LocalHashBackend {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, payloads: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(payloads
            .iter()
            .map(|payload| embed_text_local(payload, self.dimensions))
            .collect())
    }
}

pub fn load_backend(config: &SemanticModelConfig) -> Result<LocalHashBackend> {
    if config.backend != DEFAULT_BACKEND {
        bail!("unsupported embedding backend: {}", config.backend);
    }
    if config.dimensions == 0 {
        bail!("embedding dimensionality must be positive");
    }

    Ok(LocalHashBackend {
        dimensions: config.dimensions,
    })
}

pub fn enrich_listings<B, F>(
    listings: Vec<Listing>,
    load: F,
    batch_size: usize,
) -> Vec<EnrichedListing>
where
    B: EmbeddingBackend,
    F: FnOnce() -> Result<B>,
{
    let backend = match load() {
        Ok(backend) => backend,
        Err(err) => {
            error!(severity = "critical", error = %err, "failed to initialize embedding backend");
            return Vec::new();
        }
    };

    let dimensions = backend.dimensions();
    let batch_size = batch_size.max(1);
    let mut results = Vec::<EnrichedListing>::with_capacity(listings.len());

    for (batch_index, batch) in listings.chunks(batch_size).enumerate() {
        let offset = batch_index * batch_size;
        let payloads = batch
            .iter()
            .map(Listing::canonical_text)
            .collect::<Vec<String>>();

        let vectors = match backend.encode(&payloads) {
            Ok(vectors) if vectors.len() == batch.len() => {
                vectors.into_iter().map(Ok).collect::<Vec<Result<Vec<f32>>>>()
            }
            Ok(vectors) => {
                warn!(
                    expected = batch.len(),
                    returned = vectors.len(),
                    "embedding batch size mismatch, encoding records individually"
                );
                encode_individually(&backend, &payloads)
            }
            Err(err) => {
                warn!(error = %err, "embedding batch failed, encoding records individually");
                encode_individually(&backend, &payloads)
            }
        };

        for (index, (listing, vector)) in batch.iter().zip(vectors).enumerate() {
            let position = offset + index + 1;
            match vector {
                Ok(embedding) if embedding.len() == dimensions => {
                    results.push(EnrichedListing {
                        listing: listing.clone(),
                        embedding,
                    });
                }
                Ok(embedding) => {
                    warn!(
                        position,
                        url = %listing.url,
                        expected = dimensions,
                        returned = embedding.len(),
                        "dropping listing with wrong embedding dimensionality"
                    );
                }
                Err(err) => {
                    warn!(position, url = %listing.url, error = %err, "failed to embed listing");
                }
            }
        }
    }

    info!(
        input = listings.len(),
        embedded = results.len(),
        dimensions,
        "generated embeddings"
    );
    results
}

pub fn enrich_raw_listings<B, F>(
    raw_listings: Vec<RawListing>,
    load: F,
    batch_size: usize,
) -> Vec<EnrichedListing>
where
    B: EmbeddingBackend,
    F: FnOnce() -> Result<B>,
{
    let mut listings = Vec::with_capacity(raw_listings.len());
    for (index, raw) in raw_listings.into_iter().enumerate() {
        match Listing::from_raw(raw) {
            Ok(listing) => listings.push(listing),
            Err(err) => warn!(position = index + 1, error = %err, "skipping invalid listing"),
        }
    }

    enrich_listings(listings, load, batch_size)
}

fn encode_individually<B: EmbeddingBackend>(
    backend: &B,
    payloads: &[String],
) -> Vec<Result<Vec<f32>>> {
    payloads
        .iter()
        .map(|payload| -> Result<Vec<f32>> {
            let mut vectors = backend.encode(std::slice::from_ref(payload))?;
            match vectors.pop() {
                Some(vector) if vectors.is_empty() => Ok(vector),
                _ => bail!("embedding backend returned an unexpected number of vectors"),
            }
        })
        .collect()
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let mut vector = vec![0_f32; dimensions];
    let tokens = tokenize_payload(payload);

    if tokens.is_empty() || dimensions == 0 {
        return vector;
    }

    for token in tokens {
        let hash = stable_hash(&token);
        let index = (hash % dimensions as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }

    Some(
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let normalized = normalize_whitespace(payload);
    if normalized.is_empty() {
        return Vec::new();
    }

    let words = normalized
        .split(' ')
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>();

    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    if norm == 0.0 {
        return;
    }

    for value in values {
        *value /= norm;
    }
}
