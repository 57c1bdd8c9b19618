use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use log::debug;

use crate::settings::ClassifierConfig;

#[derive(Debug, Serialize)]
struct ZeroShotParameters<'a> {
    candidate_labels: &'a [String],
}

#[derive(Debug, Serialize)]
struct ZeroShotRequest<'a> {
    inputs: &'a str,
    parameters: ZeroShotParameters<'a>,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f64,
}

// The inference API has answered in both shapes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ZeroShotResponse {
    Ranked { labels: Vec<String>, scores: Vec<f64> },
    Pairs(Vec<LabelScore>),
}

pub fn top_label(body: &str) -> Result<String> {
    let response: ZeroShotResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("Unexpected classifier response: {}", e))?;
    let label = match response {
        ZeroShotResponse::Ranked { labels, scores } => labels
            .into_iter()
            .zip(scores)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(label, _)| label),
        ZeroShotResponse::Pairs(pairs) => pairs
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .map(|pair| pair.label),
    };
    label.ok_or_else(|| anyhow!("Classifier returned no labels"))
}

/// Zero-shot classification over a fixed label set through a hosted endpoint.
pub struct HostedClassifier {
    client: reqwest::Client,
    config: ClassifierConfig,
}

impl HostedClassifier {
    pub fn new(config: ClassifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(HostedClassifier { client, config })
    }

    pub async fn classify(&self, text: &str) -> Result<String> {
        let request = ZeroShotRequest {
            inputs: text,
            parameters: ZeroShotParameters {
                candidate_labels: &self.config.labels,
            },
        };

        let mut builder = self.client.post(&self.config.api_url).json(&request);
        if let Some(token) = self.config.api_token.as_deref().filter(|t| !t.is_empty()) {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("Classifier returned {}: {}", status, body);
        }
        debug!("Classifier response: {}", body);
        top_label(&body)
    }
}
