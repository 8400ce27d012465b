use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::AiConfig;

/// Client for the remote alternative-phrasing generator. The generator is an
/// opaque collaborator: we send a question/answer pair and get back rephrased
/// variants suitable for new cards.
#[derive(Clone)]
pub struct AiClient {
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    pub question: String,
    pub answer: String,
}

#[derive(Deserialize)]
struct GeneratorResponse {
    alternatives: Option<Vec<Alternative>>,
}

impl AiClient {
    pub fn new(config: AiConfig) -> Self {
        Self {
            api_url: config.api_url,
            api_key: config.api_key,
            client: reqwest::Client::new(),
        }
    }

    pub async fn generate_alternatives(
        &self,
        question: &str,
        answer: &str,
        count: usize,
    ) -> anyhow::Result<Vec<Alternative>> {
        let body = json!({
            "question": question,
            "answer": answer,
            "count": count,
        });

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("generator returned {status}: {error_text}"));
        }

        let parsed: GeneratorResponse = resp.json().await?;
        Ok(parsed.alternatives.unwrap_or_default())
    }
}
