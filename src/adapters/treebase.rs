use crate::domain::model::DataSet;
use crate::domain::ports::MatrixRepository;
use crate::phylo::nexus;
use crate::utils::error::{Result, ScrapeError};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;

const SERVICE: &str = "TreeBASE";

/// Downloads character matrices of a TreeBASE study as NEXUS.
pub struct TreeBaseClient {
    client: Client,
    phylows_base: String,
    timeout: Option<Duration>,
}

impl TreeBaseClient {
    pub fn new(phylows_base: &str, timeout_seconds: Option<u64>) -> Self {
        Self {
            client: Client::new(),
            phylows_base: phylows_base.trim_end_matches('/').to_string(),
            timeout: timeout_seconds.map(Duration::from_secs),
        }
    }

    fn study_url(&self, treebase_id: u64) -> String {
        format!("{}/study/TB2:S{}", self.phylows_base, treebase_id)
    }
}

/// Extracts the numeric TreeBASE study id from a data-deposit URL.
///
/// Accepts PhyloWS purls (`.../study/TB2:S13613`) and the legacy summary
/// pages (`...summary.html?id=13613`).
pub fn treebase_study_id(deposit_url: &str) -> Option<u64> {
    let purl = Regex::new(r"TB2:S(\d+)").ok()?;
    if let Some(caps) = purl.captures(deposit_url) {
        return caps[1].parse().ok();
    }
    if !deposit_url.to_ascii_lowercase().contains("treebase") {
        return None;
    }
    let legacy = Regex::new(r"[?&]id=(\d+)").ok()?;
    legacy
        .captures(deposit_url)
        .and_then(|caps| caps[1].parse().ok())
}

#[async_trait]
impl MatrixRepository for TreeBaseClient {
    async fn get_dataset(&self, deposit_url: &str) -> Result<DataSet> {
        let treebase_id = treebase_study_id(deposit_url).ok_or_else(|| {
            ScrapeError::service(
                SERVICE,
                format!("data deposit '{}' is not a TreeBASE study", deposit_url),
            )
        })?;

        let url = self.study_url(treebase_id);
        tracing::info!("🧾 Fetching TreeBASE study S{} from {}", treebase_id, url);

        let mut request = self.client.get(&url).query(&[("format", "nexus")]);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        tracing::debug!("TreeBASE response status: {}", response.status());

        if !response.status().is_success() {
            return Err(ScrapeError::service(
                SERVICE,
                format!("study S{} returned HTTP {}", treebase_id, response.status()),
            ));
        }

        let body = response.text().await?;
        let dataset = nexus::parse(&body)?;
        tracing::info!(
            "🧾 TreeBASE study S{} has {} character matrices",
            treebase_id,
            dataset.char_matrices.len()
        );
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_treebase_study_id() {
        assert_eq!(
            treebase_study_id("http://purl.org/phylo/treebase/phylows/study/TB2:S13613"),
            Some(13613)
        );
        assert_eq!(
            treebase_study_id("http://www.treebase.org/treebase-web/search/study/summary.html?id=2210"),
            Some(2210)
        );
        assert_eq!(treebase_study_id("http://datadryad.org/resource?id=12"), None);
        assert_eq!(treebase_study_id("http://dx.doi.org/10.5061/dryad.abc"), None);
    }

    #[tokio::test]
    async fn test_get_dataset_parses_nexus() {
        let server = MockServer::start();
        let nexus_body = "#NEXUS\nBEGIN CHARACTERS;\nFORMAT DATATYPE=DNA;\nMATRIX\nA ACGT\nB ACGA\n;\nEND;\n";
        let api_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/phylows/study/TB2:S13613")
                .query_param("format", "nexus");
            then.status(200).body(nexus_body);
        });

        let client = TreeBaseClient::new(&server.url("/phylows"), Some(5));
        let dataset = client
            .get_dataset("http://purl.org/phylo/treebase/phylows/study/TB2:S13613")
            .await
            .unwrap();

        api_mock.assert();
        assert_eq!(dataset.char_matrices.len(), 1);
        assert_eq!(dataset.char_matrices[0].len(), 2);
    }

    #[tokio::test]
    async fn test_non_treebase_deposit_is_rejected() {
        let client = TreeBaseClient::new("http://localhost:1", None);
        let err = client
            .get_dataset("http://dx.doi.org/10.5061/dryad.abc")
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::ServiceError { .. }));
    }
}
