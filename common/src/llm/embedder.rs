//! Text embedders for the schema index.
//!
//! [`OpenAiEmbedder`] calls an openai-compatible `/embeddings` endpoint and is
//! what the index should normally run on. [`HashingEmbedder`] needs no network
//! and only matches on shared words, so paraphrases like "clients" for a
//! `Customer` table score zero with it.

use crate::config::LlmConfig;
use crate::error::{Nl2SqlError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub type Embedding = Vec<f32>;

/// inputs sent per `/embeddings` request
const MAX_BATCH: usize = 256;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Nl2SqlError::Llm("embedder returned no vectors".to_string()))
    }

    /// one vector per input, in input order
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// stored next to persisted vectors so a different model forces a re-embed
    fn model_name(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

fn parse_embedding_response(body: &str, expected: usize) -> Result<Vec<Embedding>> {
    let mut response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| Nl2SqlError::Llm(format!("failed to parse embedding response: {}", e)))?;

    if response.data.len() != expected {
        return Err(Nl2SqlError::Llm(format!(
            "expected {} embeddings, got {}",
            expected,
            response.data.len()
        )));
    }

    response.data.sort_by_key(|d| d.index);
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

/// client for any openai-compatible `/embeddings` endpoint
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Nl2SqlError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        tracing::info!(
            "embedder ready: {} at {}",
            config.embedding_model,
            config.base_url
        );

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            model: config.embedding_model.clone(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Nl2SqlError::Llm(format!(
                "embedding request failed with {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            )));
        }

        parse_embedding_response(&body, texts.len())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    #[tracing::instrument(skip(self, texts), fields(embedding.model = %self.model, inputs = texts.len()))]
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH) {
            vectors.extend(self.request(chunk).await?);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// width of the hashed term-frequency vectors
const HASHED_DIM: usize = 512;

static TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9]+").unwrap());

static CAMEL_BOUNDARY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "by", "can", "do", "does", "for", "from", "have", "how",
    "in", "is", "it", "list", "many", "me", "of", "on", "or", "show", "table", "tables", "the",
    "this", "to", "we", "what", "which", "who", "with", "be", "used", "queried", "answer",
    "questions", "about",
];

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// lowercase word tokens with camel case split and a trailing plural `s` dropped
fn tokenize(text: &str) -> Vec<String> {
    let split = CAMEL_BOUNDARY_REGEX.replace_all(text, "$1 $2");

    TOKEN_REGEX
        .find_iter(&split)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .map(|t| {
            if t.len() > 3 && t.ends_with('s') && !t.ends_with("ss") {
                t[..t.len() - 1].to_string()
            } else {
                t
            }
        })
        .collect()
}

/// offline fallback: l2-normalised hashed bag of words.
///
/// only useful when no embeddings endpoint is reachable; it matches words,
/// not meaning.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashingEmbedder;

impl HashingEmbedder {
    pub const MODEL_NAME: &'static str = "hashed-bow-512";

    pub fn new() -> Self {
        Self
    }

    fn vector(text: &str) -> Embedding {
        let mut vector = vec![0.0f32; HASHED_DIM];
        for token in tokenize(text) {
            let bucket = (fnv1a(&token) % HASHED_DIM as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn model_name(&self) -> &str {
        Self::MODEL_NAME
    }
}
