// src/embedder.rs
//
// =============================================================================
// MINDLOOM: DETERMINISTIC ENCODER (v 0.1 )
// =============================================================================
//
// Feature-hashing encoder used by text_embed, vision_embed, and the
// semantic retrieval stage. The same text always produces the same
// normalized vector, so query-time and ingest-time encodings live in the
// same space without any model download.
//
// Real sentence-transformer / vision models are external collaborators
// behind the tool contract; this encoder is the always-available local
// path. Loaded once behind a process-wide guard.

use sha2::{Digest, Sha256};
use std::sync::OnceLock;

pub const TEXT_DIM: usize = 384;
pub const VISION_DIM: usize = 512;

pub struct Embedder {
    dim: usize,
}

static TEXT_EMBEDDER: OnceLock<Embedder> = OnceLock::new();
static VISION_EMBEDDER: OnceLock<Embedder> = OnceLock::new();

/// Process-wide text encoder.
pub fn text_encoder() -> &'static Embedder {
    TEXT_EMBEDDER.get_or_init(|| Embedder { dim: TEXT_DIM })
}

/// Process-wide vision encoder.
pub fn vision_encoder() -> &'static Embedder {
    VISION_EMBEDDER.get_or_init(|| Embedder { dim: VISION_DIM })
}

impl Embedder {
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Encode text into a unit vector. Tokens are lowercased alphanumeric
    /// runs; each token hashes to a bucket with a signed contribution, and
    /// bigrams add a second signal so word order matters a little.
    pub fn encode_text(&self, text: &str) -> Vec<f32> {
        let tokens: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 2)
            .map(str::to_string)
            .collect();

        let mut vector = vec![0.0f32; self.dim];
        for token in &tokens {
            self.accumulate(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.accumulate(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }
        normalize(&mut vector);
        vector
    }

    /// Encode raw bytes (image content) into a unit vector over fixed-size
    /// chunks. Content-addressed: identical bytes, identical vector.
    pub fn encode_bytes(&self, data: &[u8]) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for (i, chunk) in data.chunks(4096).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update((i as u64).to_le_bytes());
            hasher.update(chunk);
            let digest = hasher.finalize();
            let bucket = usize::from_le_bytes(digest[0..8].try_into().unwrap()) % self.dim;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }

    fn accumulate(&self, vector: &mut [f32], token: &str, weight: f32) {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let bucket = usize::from_le_bytes(digest[0..8].try_into().unwrap()) % self.dim;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
