use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{error, info};

const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const NOT_FOUND: &str = "Not found";

pub const SUPPORTED_MEDIA_TYPES: [&str; 4] =
    ["image/png", "image/jpeg", "image/webp", "application/pdf"];

const EXTRACTION_PROMPT: &str = r#"Analyze this insurance document and extract the following information:

1. Insurance Provider: Company name
2. Policy Type: Auto, Home, or Other
3. Policy Number: If visible
4. Current Premium: Monthly or annual amount
5. Coverage Details:
   - For Auto: Liability limits, collision, comprehensive, deductible
   - For Home: Dwelling coverage, personal property, liability, deductible
6. Policyholder: Name, address if visible
7. Policy Period: Start and end dates if visible
8. Additional Coverage: Any extra coverages or riders

Write one "Field: value" line per item. If any information is not visible or unclear, write "Not found" for that field.
Be specific about dollar amounts and coverage limits."#;

/// Structured view of a policy document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPolicy {
    pub provider: String,
    pub policy_type: String,
    pub policy_number: String,
    pub current_premium: String,
    pub coverage_details: BTreeMap<String, String>,
    pub policyholder: String,
    pub policy_period: String,
}

/// Result of a document extraction; failures are values, never errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractionOutcome {
    Extracted {
        success: bool,
        extracted_data: ExtractedPolicy,
        raw_analysis: String,
    },
    Failed {
        success: bool,
        error: String,
        message: String,
    },
}

impl ExtractionOutcome {
    pub fn extracted(raw_analysis: String) -> Self {
        Self::Extracted {
            success: true,
            extracted_data: parse_extraction_response(&raw_analysis),
            raw_analysis,
        }
    }

    pub fn failed(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            success: false,
            error: error.into(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Extracted { .. })
    }
}

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], media_type: &str) -> ExtractionOutcome;
}

pub fn is_supported_media_type(media_type: &str) -> bool {
    SUPPORTED_MEDIA_TYPES.contains(&media_type)
}

pub fn unsupported_media_type(media_type: &str) -> ExtractionOutcome {
    ExtractionOutcome::failed(
        "Unsupported file type",
        format!("Unsupported file type: {media_type}. Please upload a PDF, PNG, JPG or WEBP."),
    )
}

/// Extracts policy details with a vision model behind OpenRouter
pub struct OpenRouterVisionExtractor {
    api_key: Option<String>,
    model: String,
    http: Client,
}

impl OpenRouterVisionExtractor {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            http: Client::new(),
        }
    }

    async fn analyze(&self, api_key: &str, bytes: &[u8], media_type: &str) -> anyhow::Result<String> {
        let data_url = format!("data:{};base64,{}", media_type, STANDARD.encode(bytes));
        let document = if media_type == "application/pdf" {
            json!({ "type": "file", "file": { "filename": "policy.pdf", "file_data": data_url } })
        } else {
            json!({ "type": "image_url", "image_url": { "url": data_url } })
        };

        let payload = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [{ "type": "text", "text": EXTRACTION_PROMPT }, document]
            }],
            "max_tokens": 2000
        });

        let response = self
            .http
            .post(OPENROUTER_CHAT_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("vision API request failed: {}", response.status());
        }

        let body: Value = response.json().await?;
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid response format from vision model"))
    }
}

#[async_trait]
impl DocumentExtractor for OpenRouterVisionExtractor {
    async fn extract(&self, bytes: &[u8], media_type: &str) -> ExtractionOutcome {
        if !is_supported_media_type(media_type) {
            return unsupported_media_type(media_type);
        }
        let Some(api_key) = self.api_key.as_deref() else {
            return ExtractionOutcome::failed(
                "Document analysis unavailable",
                "Document analysis is not configured on this server.",
            );
        };

        info!(media_type, size = bytes.len(), "Analyzing insurance document");
        match self.analyze(api_key, bytes, media_type).await {
            Ok(raw) => ExtractionOutcome::extracted(raw),
            Err(e) => {
                error!(error = %e, "Document analysis failed");
                ExtractionOutcome::failed(
                    e.to_string(),
                    "Could not analyze document. Please ensure it's a valid insurance document.",
                )
            }
        }
    }
}

/// Value after the colon on the first line mentioning any keyword
fn extract_field(text: &str, keywords: &[&str]) -> String {
    for keyword in keywords {
        for line in text.lines() {
            if !line.to_lowercase().contains(keyword) {
                continue;
            }
            if let Some((_, value)) = line.split_once(':') {
                let value = value.trim().trim_matches('*').trim();
                if !value.is_empty() && !value.eq_ignore_ascii_case(NOT_FOUND) {
                    return value.to_string();
                }
            }
        }
    }
    NOT_FOUND.to_string()
}

fn extract_coverage(text: &str) -> BTreeMap<String, String> {
    let terms: [(&str, &[&str]); 6] = [
        ("liability", &["liability", "bodily injury", "property damage"]),
        ("collision", &["collision"]),
        ("comprehensive", &["comprehensive", "comp"]),
        ("deductible", &["deductible"]),
        ("dwelling", &["dwelling", "coverage a"]),
        ("personal_property", &["personal property", "contents", "coverage c"]),
    ];

    terms
        .into_iter()
        .filter_map(|(name, keywords)| {
            let value = extract_field(text, keywords);
            (value != NOT_FOUND).then(|| (name.to_string(), value))
        })
        .collect()
}

pub fn parse_extraction_response(text: &str) -> ExtractedPolicy {
    ExtractedPolicy {
        provider: extract_field(text, &["provider", "company", "insurer"]),
        policy_type: extract_field(text, &["policy type", "insurance type"]),
        policy_number: extract_field(text, &["policy number", "policy #"]),
        current_premium: extract_field(text, &["premium", "monthly payment", "annual premium"]),
        coverage_details: extract_coverage(text),
        policyholder: extract_field(text, &["policyholder", "insured", "name"]),
        policy_period: extract_field(text, &["policy period", "effective dates", "coverage period"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANALYSIS: &str = "\
1. **Insurance Provider**: Acme Mutual
2. **Policy Type**: Auto
3. **Policy Number**: Not found
4. **Current Premium**: $142.50 monthly
5. Coverage Details:
   - Liability: 100/300/50
   - Collision: $500 deductible
   - Deductible: $500
6. **Policyholder**: Jane Doe
7. **Policy Period**: 01/01/2025 - 01/01/2026";

    #[test]
    fn parses_fields_with_defaults() {
        let policy = parse_extraction_response(ANALYSIS);
        assert_eq!(policy.provider, "Acme Mutual");
        assert_eq!(policy.policy_type, "Auto");
        assert_eq!(policy.policy_number, NOT_FOUND);
        assert_eq!(policy.current_premium, "$142.50 monthly");
        assert_eq!(policy.policyholder, "Jane Doe");
        assert_eq!(policy.policy_period, "01/01/2025 - 01/01/2026");
        assert_eq!(policy.coverage_details.get("liability").unwrap(), "100/300/50");
        assert!(!policy.coverage_details.contains_key("dwelling"));
    }

    #[tokio::test]
    async fn unsupported_media_is_a_structured_failure() {
        let extractor = OpenRouterVisionExtractor::new(Some("key".into()), "vision");
        let outcome = extractor.extract(b"hello", "text/plain").await;
        assert!(!outcome.is_success());

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Unsupported file type");
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_network() {
        let extractor = OpenRouterVisionExtractor::new(None, "vision");
        let outcome = extractor.extract(&[0x89, 0x50], "image/png").await;
        assert!(matches!(outcome, ExtractionOutcome::Failed { .. }));
    }
}
