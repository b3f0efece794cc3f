use crate::error::{Nl2SqlError, Result};
use crate::llm::{Embedder, Embedding};
use crate::schema::{SchemaIndex, TableDocument};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn document_text(document: &TableDocument) -> String {
    format!("{} {}", document.table_name, document.description)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedDocument {
    document: TableDocument,
    embedding: Embedding,
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    model: &'a str,
    documents: &'a [IndexedDocument],
}

/// what can sit on disk: vectors with the model that made them, or a bare
/// document list that still needs embedding
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredIndex {
    Embedded {
        model: String,
        documents: Vec<IndexedDocument>,
    },
    Documents(Vec<TableDocument>),
}

/// in-memory schema index ranking table documents by cosine similarity of
/// their embeddings.
///
/// vectors are persisted with the embedder's model name and reused on load
/// only when the loading embedder reports the same model.
#[derive(Clone)]
pub struct VectorSchemaIndex {
    embedder: Arc<dyn Embedder>,
    documents: Vec<IndexedDocument>,
}

impl VectorSchemaIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            documents: Vec::new(),
        }
    }

    pub async fn from_documents(
        embedder: Arc<dyn Embedder>,
        documents: Vec<TableDocument>,
    ) -> Result<Self> {
        let mut index = Self::new(embedder);
        index.extend(documents).await?;
        Ok(index)
    }

    async fn extend(&mut self, documents: Vec<TableDocument>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = documents.iter().map(document_text).collect();
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let embeddings = self.embedder.embed_batch(&inputs).await?;
        if embeddings.len() != documents.len() {
            return Err(Nl2SqlError::Index(format!(
                "embedder returned {} vectors for {} documents",
                embeddings.len(),
                documents.len()
            )));
        }

        self.documents.extend(
            documents
                .into_iter()
                .zip(embeddings)
                .map(|(document, embedding)| IndexedDocument {
                    document,
                    embedding,
                }),
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = IndexFileRef {
            model: self.embedder.model_name(),
            documents: &self.documents,
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        tracing::info!(
            output = %path.display(),
            documents = self.documents.len(),
            model = file.model,
            "schema index saved"
        );
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Nl2SqlError::Index(format!("failed to read {}: {}", path.display(), e))
        })?;
        let stored: StoredIndex = serde_json::from_str(&text)?;

        let index = match stored {
            StoredIndex::Embedded { model, documents } if model == embedder.model_name() => {
                Self {
                    embedder,
                    documents,
                }
            }
            StoredIndex::Embedded { model, documents } => {
                tracing::warn!(
                    stored = %model,
                    current = embedder.model_name(),
                    "index was embedded with another model, re-embedding"
                );
                let documents = documents.into_iter().map(|d| d.document).collect();
                Self::from_documents(embedder, documents).await?
            }
            StoredIndex::Documents(documents) => Self::from_documents(embedder, documents).await?,
        };

        tracing::info!(
            source = %path.display(),
            documents = index.len(),
            model = index.model_name(),
            "schema index loaded"
        );
        Ok(index)
    }

    /// top `k` documents with a positive similarity score, best first
    pub async fn rank(&self, query: &str, k: usize) -> Result<Vec<(f32, &TableDocument)>> {
        let query_vector = self.embedder.embed(query).await?;

        let mut scored = Vec::with_capacity(self.documents.len());
        for indexed in &self.documents {
            if indexed.embedding.len() != query_vector.len() {
                return Err(Nl2SqlError::Index(format!(
                    "query embedding has {} dimensions, {} has {}",
                    query_vector.len(),
                    indexed.document.table_name,
                    indexed.embedding.len()
                )));
            }
            let score = cosine(&query_vector, &indexed.embedding);
            if score > 0.0 {
                scored.push((score, &indexed.document));
            }
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);
        Ok(scored)
    }
}

#[async_trait]
impl SchemaIndex for VectorSchemaIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<TableDocument>> {
        let ranked = self.rank(query, k).await?;
        tracing::debug!(query, hits = ranked.len(), "schema index search");
        Ok(ranked.into_iter().map(|(_, d)| d.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// groups of words that mean the same thing, one vector axis per group
    const CONCEPTS: &[&[&str]] = &[
        &["customer", "client", "buyer"],
        &["employee", "staff", "worker", "hire"],
        &["product", "item", "price"],
    ];

    /// stands in for a semantic model: synonyms land on the same axis
    #[derive(Default)]
    struct ConceptEmbedder {
        embedded: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for ConceptEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
            self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|text| {
                    let mut vector = vec![0.0f32; CONCEPTS.len()];
                    for word in text
                        .split(|c: char| !c.is_ascii_alphanumeric())
                        .map(|w| w.to_lowercase())
                    {
                        let word = word.strip_suffix('s').unwrap_or(&word);
                        for (axis, group) in CONCEPTS.iter().enumerate() {
                            if group.contains(&word) {
                                vector[axis] += 1.0;
                            }
                        }
                    }
                    vector
                })
                .collect())
        }

        fn model_name(&self) -> &str {
            "concepts-v1"
        }
    }

    fn sample_documents() -> Vec<TableDocument> {
        vec![
            TableDocument::new(
                "Sales.Customer",
                "CREATE TABLE Customer (CustomerID int, PersonID int, StoreID int)",
            ),
            TableDocument::new(
                "Production.Product",
                "CREATE TABLE Product (ProductID int, Name text, ListPrice money)",
            ),
            TableDocument::new(
                "HumanResources.Employee",
                "CREATE TABLE Employee (BusinessEntityID int, JobTitle text, HireDate date)",
            ),
        ]
    }

    async fn hashed_index() -> VectorSchemaIndex {
        VectorSchemaIndex::from_documents(Arc::new(HashingEmbedder::new()), sample_documents())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_paraphrased_question_finds_table() {
        let embedder = Arc::new(ConceptEmbedder::default());
        let index = VectorSchemaIndex::from_documents(embedder, sample_documents())
            .await
            .unwrap();

        let results = index.search("How many clients do we have?", 5).await.unwrap();
        assert_eq!(results[0].table_name, "Sales.Customer");

        let results = index.search("list all staff members", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].table_name, "HumanResources.Employee");
    }

    #[tokio::test]
    async fn test_hashed_fallback_misses_paraphrase() {
        let index = hashed_index().await;
        let results = index.search("How many clients do we have?", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_relevant_table_first() {
        let index = hashed_index().await;
        let results = index.search("How many customers do we have?", 5).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].table_name, "Sales.Customer");
    }

    #[tokio::test]
    async fn test_search_respects_k() {
        let index = hashed_index().await;
        let results = index.search("customer product employee", 2).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_unrelated_query_returns_nothing() {
        let index = hashed_index().await;
        let results = index.search("zebra migration", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_reuses_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let embedder = Arc::new(ConceptEmbedder::default());
        VectorSchemaIndex::from_documents(embedder.clone(), sample_documents())
            .await
            .unwrap()
            .save(&path)
            .unwrap();
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 3);

        let reloaded_with = Arc::new(ConceptEmbedder::default());
        let loaded = VectorSchemaIndex::load(&path, reloaded_with.clone())
            .await
            .unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(reloaded_with.embedded.load(Ordering::SeqCst), 0);

        let top = loaded.rank("when were staff hired", 1).await.unwrap();
        assert_eq!(top[0].1.table_name, "HumanResources.Employee");
        assert_eq!(reloaded_with.embedded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_with_other_model_re_embeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        hashed_index().await.save(&path).unwrap();

        let embedder = Arc::new(ConceptEmbedder::default());
        let loaded = VectorSchemaIndex::load(&path, embedder.clone()).await.unwrap();

        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 3);
        assert_eq!(loaded.model_name(), "concepts-v1");
        let results = loaded.search("clients", 1).await.unwrap();
        assert_eq!(results[0].table_name, "Sales.Customer");
    }

    #[tokio::test]
    async fn test_load_plain_document_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.json");
        std::fs::write(&path, serde_json::to_string(&sample_documents()).unwrap()).unwrap();

        let loaded = VectorSchemaIndex::load(&path, Arc::new(HashingEmbedder::new()))
            .await
            .unwrap();
        assert_eq!(loaded.len(), 3);
        let top = loaded.rank("employee hire date", 1).await.unwrap();
        assert_eq!(top[0].1.table_name, "HumanResources.Employee");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result =
            VectorSchemaIndex::load("/nonexistent/index.json", Arc::new(HashingEmbedder::new()))
                .await;
        assert!(matches!(result, Err(Nl2SqlError::Index(_))));
    }

    #[tokio::test]
    async fn test_mismatched_dimensions_are_an_index_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let file = serde_json::json!({
            "model": HashingEmbedder::MODEL_NAME,
            "documents": [{
                "document": {"table_name": "orders", "description": "orders"},
                "embedding": [1.0, 0.0]
            }]
        });
        std::fs::write(&path, file.to_string()).unwrap();

        let loaded = VectorSchemaIndex::load(&path, Arc::new(HashingEmbedder::new()))
            .await
            .unwrap();
        let result = loaded.search("orders", 1).await;
        assert!(matches!(result, Err(Nl2SqlError::Index(_))));
    }
}
