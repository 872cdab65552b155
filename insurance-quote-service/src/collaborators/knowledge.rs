use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::profile::LineOfBusiness;

/// Number of passages pulled into a reply
pub const CONTEXT_PASSAGES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageMetadata {
    /// `auto`, `home` or `general`
    #[serde(rename = "type")]
    pub kind: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub metadata: PassageMetadata,
}

impl Passage {
    /// Whether the passage passes an optional line-of-business filter
    pub fn matches(&self, filter: Option<LineOfBusiness>) -> bool {
        filter.is_none_or(|line| self.metadata.kind == line.as_str())
    }
}

#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Up to `k` passages most similar to `query`; `filter` restricts to one passage type
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<LineOfBusiness>,
    ) -> anyhow::Result<Vec<Passage>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The built-in insurance reference documents
pub fn insurance_documents() -> Vec<Passage> {
    let documents = [
        ("auto", "coverage_types", include_str!("../../data/knowledge/auto_coverage_types.md")),
        ("auto", "rate_factors", include_str!("../../data/knowledge/auto_rate_factors.md")),
        ("home", "coverage_types", include_str!("../../data/knowledge/home_coverage_types.md")),
        ("home", "discounts", include_str!("../../data/knowledge/home_discounts.md")),
        ("general", "myths", include_str!("../../data/knowledge/insurance_myths.md")),
        ("general", "claims", include_str!("../../data/knowledge/filing_claims.md")),
    ];

    documents
        .into_iter()
        .map(|(kind, topic, text)| Passage {
            text: text.trim().to_string(),
            metadata: PassageMetadata {
                kind: kind.to_string(),
                topic: topic.to_string(),
            },
        })
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

struct EmbeddedPassage {
    passage: Passage,
    vector: Vec<f32>,
}

fn rank(
    query: &[f32],
    passages: &[EmbeddedPassage],
    k: usize,
    filter: Option<LineOfBusiness>,
) -> Vec<Passage> {
    let mut scored: Vec<(f32, &Passage)> = passages
        .iter()
        .filter(|p| p.passage.matches(filter))
        .map(|p| (cosine_similarity(query, &p.vector), &p.passage))
        .collect();

    // stable sort keeps document order on ties
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    scored
        .into_iter()
        .take(k)
        .map(|(_, passage)| passage.clone())
        .collect()
}

/// Knowledge base ranked by cosine similarity of sentence embeddings.
///
/// Passages are embedded once at construction; each search embeds only the query.
/// ONNX inference runs on the blocking pool so it never stalls the runtime.
pub struct EmbeddingKnowledgeBase {
    model: Arc<Mutex<TextEmbedding>>,
    passages: Vec<EmbeddedPassage>,
}

impl EmbeddingKnowledgeBase {
    pub async fn new(passages: Vec<Passage>) -> anyhow::Result<Self> {
        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();

        let (model, vectors) = tokio::task::spawn_blocking(move || {
            let mut model = TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                    .with_show_download_progress(false),
            )?;
            let vectors = model.embed(texts, None)?;
            Ok::<_, anyhow::Error>((model, vectors))
        })
        .await??;

        if vectors.len() != passages.len() {
            anyhow::bail!(
                "embedded {} of {} knowledge passages",
                vectors.len(),
                passages.len()
            );
        }
        info!(passages = passages.len(), "Knowledge base embedded");

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            passages: passages
                .into_iter()
                .zip(vectors)
                .map(|(passage, vector)| EmbeddedPassage { passage, vector })
                .collect(),
        })
    }

    pub async fn with_insurance_documents() -> anyhow::Result<Self> {
        Self::new(insurance_documents()).await
    }

    async fn embed_query(&self, query: &str) -> anyhow::Result<Vec<f32>> {
        let model = self.model.clone();
        let input = query.to_owned();

        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("embedding model lock poisoned"))?;
            model
                .embed(vec![input], None)?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("embedding model returned no vector"))
        })
        .await?
    }
}

#[async_trait]
impl KnowledgeRetriever for EmbeddingKnowledgeBase {
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<LineOfBusiness>,
    ) -> anyhow::Result<Vec<Passage>> {
        let embedding = self.embed_query(query).await?;
        Ok(rank(&embedding, &self.passages, k, filter))
    }

    fn len(&self) -> usize {
        self.passages.len()
    }
}

/// Render passages as numbered references for a prompt
pub fn format_context(passages: &[Passage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("**Reference {}:**\n{}\n", i + 1, p.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedded(kind: &str, topic: &str, vector: Vec<f32>) -> EmbeddedPassage {
        EmbeddedPassage {
            passage: Passage {
                text: format!("{kind} {topic}"),
                metadata: PassageMetadata {
                    kind: kind.into(),
                    topic: topic.into(),
                },
            },
            vector,
        }
    }

    #[test]
    fn cosine_similarity_of_known_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn rank_orders_by_similarity_and_applies_filter() {
        let passages = vec![
            embedded("auto", "coverage_types", vec![0.9, 0.1, 0.0]),
            embedded("auto", "rate_factors", vec![0.2, 0.9, 0.0]),
            embedded("home", "discounts", vec![1.0, 0.0, 0.0]),
            embedded("general", "claims", vec![0.0, 0.0, 1.0]),
        ];
        let query = [1.0, 0.0, 0.0];

        let top = rank(&query, &passages, 2, None);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].metadata.topic, "discounts");
        assert_eq!(top[1].metadata.topic, "coverage_types");

        let auto = rank(&query, &passages, 5, Some(LineOfBusiness::Auto));
        assert_eq!(auto.len(), 2);
        assert!(auto.iter().all(|p| p.metadata.kind == "auto"));
        assert_eq!(auto[0].metadata.topic, "coverage_types");
    }

    #[test]
    fn ships_six_typed_documents() {
        let documents = insurance_documents();
        assert_eq!(documents.len(), 6);
        assert_eq!(
            documents
                .iter()
                .filter(|p| p.matches(Some(LineOfBusiness::Home)))
                .count(),
            2
        );
        assert!(documents[0].text.starts_with("Auto Insurance Coverage Types"));
    }

    #[tokio::test]
    #[ignore = "downloads the embedding model"]
    async fn embedded_search_finds_relevant_document() {
        let kb = EmbeddingKnowledgeBase::with_insurance_documents()
            .await
            .unwrap();
        assert_eq!(kb.len(), 6);

        let results = kb
            .search("does my policy pay if my car is stolen", 2, Some(LineOfBusiness::Auto))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].metadata.topic, "coverage_types");

        let results = kb.search("should I file a claim", 1, None).await.unwrap();
        assert_eq!(results[0].metadata.topic, "claims");
    }

    #[test]
    fn formats_numbered_references() {
        let passage = |text: &str| Passage {
            text: text.to_string(),
            metadata: PassageMetadata {
                kind: "general".into(),
                topic: "t".into(),
            },
        };
        assert_eq!(
            format_context(&[passage("one"), passage("two")]),
            "**Reference 1:**\none\n\n**Reference 2:**\ntwo\n"
        );
        assert_eq!(format_context(&[]), "");
    }
}
