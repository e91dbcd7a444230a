use crate::domain::ports::StudyRepository;
use crate::phylo::nexson::NexsonDocument;
use crate::utils::error::{Result, ScrapeError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Phylesystem study API of the Open Tree of Life.
pub struct OpenTreeClient {
    client: Client,
    api_base: String,
    timeout: Option<Duration>,
}

impl OpenTreeClient {
    pub fn new(api_base: &str, timeout_seconds: Option<u64>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            timeout: timeout_seconds.map(Duration::from_secs),
        }
    }

    fn study_url(&self, study_id: &str) -> String {
        format!("{}/study/{}", self.api_base, study_id)
    }
}

#[async_trait]
impl StudyRepository for OpenTreeClient {
    async fn get_nexson(&self, study_id: &str) -> Result<NexsonDocument> {
        let url = self.study_url(study_id);
        tracing::info!("🌳 Fetching study {} from {}", study_id, url);

        let mut request = self
            .client
            .get(&url)
            .query(&[("output_nexml2json", "1.2.1")]);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        tracing::debug!("Phylesystem response status: {}", response.status());

        if !response.status().is_success() {
            return Err(ScrapeError::service(
                "Open Tree phylesystem",
                format!("study {} returned HTTP {}", study_id, response.status()),
            ));
        }

        let json: serde_json::Value = response.json().await?;
        NexsonDocument::from_json(json)
    }
}
