// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! PLR classification: the classifier port and its Ollama-backed implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::ollama::OllamaClient;
use crate::walker::FileDescriptor;
use crate::{ClassifierError, CuratorError, Result};

/// Content quality grade assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum QualityRating {
    A,
    B,
    #[default]
    C,
    D,
}

impl FromStr for QualityRating {
    type Err = CuratorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            other => Err(CuratorError::Config(format!("Unknown quality rating '{}'", other))),
        }
    }
}

impl fmt::Display for QualityRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        };
        f.write_str(s)
    }
}

/// One classifier verdict, positionally matched to its input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub is_plr: bool,
    pub confidence: f64,
    pub content_type: String,
    pub niche: Option<String>,
    pub sub_niche: Option<String>,
    pub license_type: String,
    pub quality_rating: QualityRating,
    pub tags: BTreeSet<String>,
    pub reason: String,
}

/// Classification verdict bound to the file it describes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub file_path: PathBuf,
    pub is_plr: bool,
    pub confidence: f64,
    pub content_type: String,
    pub niche: Option<String>,
    pub sub_niche: Option<String>,
    pub license_type: String,
    pub quality_rating: QualityRating,
    pub tags: BTreeSet<String>,
    pub reason: String,
}

impl ClassificationResult {
    pub fn new(file: &FileDescriptor, verdict: Classification) -> Self {
        Self {
            file_path: file.path.clone(),
            is_plr: verdict.is_plr,
            confidence: verdict.confidence.clamp(0.0, 1.0),
            content_type: verdict.content_type,
            niche: verdict.niche,
            sub_niche: verdict.sub_niche,
            license_type: verdict.license_type,
            quality_rating: verdict.quality_rating,
            tags: verdict.tags,
            reason: verdict.reason,
        }
    }
}

/// External classification service
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Name of this classifier
    fn name(&self) -> &'static str;

    /// Classify a batch; one verdict per input file, in input order.
    /// Any failure applies to the whole batch.
    async fn classify(
        &self,
        batch: &[FileDescriptor],
    ) -> std::result::Result<Vec<Classification>, ClassifierError>;
}

/// Classifier that asks a local Ollama model for a JSON verdict array
pub struct OllamaClassifier {
    client: OllamaClient,
    model: String,
    prompt: String,
    retries: u32,
}

impl OllamaClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let client = OllamaClient::new(
            &config.url,
            std::time::Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self {
            client,
            model: config.model.clone(),
            prompt: config.prompt.clone(),
            retries: config.retries,
        })
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    fn build_prompt(&self, batch: &[FileDescriptor]) -> String {
        let mut prompt = self.prompt.clone();
        prompt.push_str("\n\nFiles:\n");
        for (i, file) in batch.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. name=\"{}\" type=\"{}\" size={} path=\"{}\"\n",
                i + 1,
                file.name,
                file.file_type,
                file.size,
                file.path.display()
            ));
        }
        prompt
    }
}

#[async_trait]
impl Classifier for OllamaClassifier {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn classify(
        &self,
        batch: &[FileDescriptor],
    ) -> std::result::Result<Vec<Classification>, ClassifierError> {
        let prompt = self.build_prompt(batch);
        let raw = self
            .client
            .generate_with_retry(&self.model, &prompt, self.retries)
            .await
            .map_err(|e| match e {
                CuratorError::Classifier(e) => e,
                other => ClassifierError::Unavailable(other.to_string()),
            })?;

        debug!("Classifier returned {} bytes for {} files", raw.len(), batch.len());
        parse_verdicts(&raw, batch.len())
    }
}

/// Lenient wire shape of a single verdict; any field may be missing or null
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVerdict {
    #[serde(default, alias = "is_plr")]
    is_plr: Option<bool>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "content_type")]
    content_type: Option<String>,
    #[serde(default)]
    niche: Option<String>,
    #[serde(default, alias = "sub_niche")]
    sub_niche: Option<String>,
    #[serde(default, alias = "license_type")]
    license_type: Option<String>,
    #[serde(default, alias = "quality_rating")]
    quality_rating: Option<String>,
    #[serde(default)]
    tags: Option<Vec<Option<String>>>,
    #[serde(default)]
    reason: Option<String>,
}

impl From<RawVerdict> for Classification {
    fn from(raw: RawVerdict) -> Self {
        Self {
            is_plr: raw.is_plr.unwrap_or(false),
            confidence: raw
                .confidence
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(0.0),
            content_type: raw.content_type.unwrap_or_default(),
            niche: non_empty(raw.niche),
            sub_niche: non_empty(raw.sub_niche),
            license_type: raw.license_type.unwrap_or_default(),
            quality_rating: raw
                .quality_rating
                .and_then(|q| q.parse().ok())
                .unwrap_or_default(),
            tags: raw
                .tags
                .unwrap_or_default()
                .into_iter()
                .flatten()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            reason: raw.reason.unwrap_or_default(),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Shapes a model answers in: a bare array, an object wrapping one, or a
/// single verdict object for a one-file batch
#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    List(Vec<RawVerdict>),
    Wrapped {
        #[serde(alias = "verdicts", alias = "classifications")]
        results: Vec<RawVerdict>,
    },
    Single(RawVerdict),
}

impl Payload {
    fn into_verdicts(self) -> Option<Vec<RawVerdict>> {
        match self {
            Self::List(list) | Self::Wrapped { results: list } => Some(list),
            // an object with no verdict in it is prose, not an answer
            Self::Single(verdict) if verdict.is_plr.is_some() => Some(vec![verdict]),
            Self::Single(_) => None,
        }
    }
}

/// Parse a model response into exactly `expected` verdicts
pub fn parse_verdicts(
    text: &str,
    expected: usize,
) -> std::result::Result<Vec<Classification>, ClassifierError> {
    let raw = find_payload(text)?;

    if raw.len() != expected {
        return Err(ClassifierError::CountMismatch { expected, got: raw.len() });
    }

    Ok(raw.into_iter().map(Classification::from).collect())
}

/// The whole response when it is JSON, otherwise the first JSON value
/// embedded in surrounding prose or code fences that reads as verdicts
fn find_payload(text: &str) -> std::result::Result<Vec<RawVerdict>, ClassifierError> {
    let whole = serde_json::from_str::<Payload>(text.trim());
    let first_error = match whole {
        Ok(payload) => match payload.into_verdicts() {
            Some(verdicts) => return Ok(verdicts),
            None => "object holds no verdict".to_string(),
        },
        Err(e) => e.to_string(),
    };

    for (start, c) in text.char_indices() {
        if c != '[' && c != '{' {
            continue;
        }
        let mut values = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Payload>();
        if let Some(Ok(payload)) = values.next() {
            if let Some(verdicts) = payload.into_verdicts() {
                return Ok(verdicts);
            }
        }
    }

    Err(ClassifierError::Malformed(format!("no verdicts in response: {}", first_error)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_array() {
        let text = r#"[
            {"isPlr": true, "confidence": 0.93, "contentType": "ebook", "niche": "Health",
             "licenseType": "PLR", "qualityRating": "a", "tags": ["Diet", " keto "], "reason": "license file"},
            {"is_plr": false, "confidence": 1.7, "niche": "  ", "quality_rating": "Z"}
        ]"#;
        let verdicts = parse_verdicts(text, 2).unwrap();

        assert!(verdicts[0].is_plr);
        assert_eq!(verdicts[0].quality_rating, QualityRating::A);
        assert_eq!(verdicts[0].niche.as_deref(), Some("Health"));
        assert!(verdicts[0].tags.contains("keto"));
        assert!(verdicts[0].tags.contains("diet"));

        assert!(!verdicts[1].is_plr);
        assert_eq!(verdicts[1].confidence, 1.0);
        assert_eq!(verdicts[1].niche, None);
        assert_eq!(verdicts[1].quality_rating, QualityRating::C);
    }

    #[test]
    fn test_parse_wrapped_and_prose() {
        let wrapped = r#"{"results": [{"isPlr": true, "confidence": 0.5}]}"#;
        assert_eq!(parse_verdicts(wrapped, 1).unwrap().len(), 1);

        let prose = "Here you go:\n```json\n[{\"isPlr\": false}]\n```";
        assert_eq!(parse_verdicts(prose, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_parse_tolerates_null_fields() {
        let text = r#"{"results":[{"isPlr":true,"confidence":null,"contentType":null,"niche":"Health",
            "subNiche":null,"licenseType":null,"qualityRating":null,"tags":["keto",null],"reason":null}]}"#;
        let verdicts = parse_verdicts(text, 1).unwrap();

        assert!(verdicts[0].is_plr);
        assert_eq!(verdicts[0].confidence, 0.0);
        assert_eq!(verdicts[0].license_type, "");
        assert_eq!(verdicts[0].quality_rating, QualityRating::C);
        assert_eq!(verdicts[0].sub_niche, None);
        assert_eq!(verdicts[0].tags.len(), 1);

        let all_null = r#"[{"isPlr": null, "niche": null, "tags": null}]"#;
        assert!(!parse_verdicts(all_null, 1).unwrap()[0].is_plr);
    }

    #[test]
    fn test_parse_skips_brackets_in_prose() {
        let text = r#"I found [2] files: [{"isPlr": true}, {"isPlr": false}] (done)"#;
        let verdicts = parse_verdicts(text, 2).unwrap();
        assert!(verdicts[0].is_plr);
        assert!(!verdicts[1].is_plr);
    }

    #[test]
    fn test_parse_single_object_for_one_file() {
        let text = r#"{"isPlr": true, "confidence": 0.8, "tags": ["a", "b"], "niche": "Pets"}"#;
        let verdicts = parse_verdicts(text, 1).unwrap();
        assert_eq!(verdicts[0].niche.as_deref(), Some("Pets"));
        assert_eq!(verdicts[0].tags.len(), 2);

        let fenced = "Sure:\n```json\n{\"isPlr\": false, \"tags\": [\"x\"]}\n```";
        assert!(!parse_verdicts(fenced, 1).unwrap()[0].is_plr);
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(parse_verdicts("no idea", 1), Err(ClassifierError::Malformed(_))));
        assert!(matches!(parse_verdicts("see {} for details", 1), Err(ClassifierError::Malformed(_))));
        assert_eq!(
            parse_verdicts("[{}]", 2),
            Err(ClassifierError::CountMismatch { expected: 2, got: 1 })
        );
    }

    #[test]
    fn test_prompt_lists_files_in_order() {
        let classifier = OllamaClassifier::new(&ClassifierConfig::default()).unwrap();
        let batch = vec![
            FileDescriptor::from_path(std::path::Path::new("/in/first.pdf"), 10),
            FileDescriptor::from_path(std::path::Path::new("/in/second.zip"), 20),
        ];
        let prompt = classifier.build_prompt(&batch);
        let first = prompt.find("first.pdf").unwrap();
        let second = prompt.find("second.zip").unwrap();
        assert!(first < second);
        assert!(prompt.contains("1. name=\"first.pdf\" type=\"pdf\" size=10"));
    }
}
