use crate::config::scrape_config::BlastConfig;
use crate::domain::model::{BlastHit, QuerySequence};
use crate::domain::ports::SequenceSearch;
use crate::phylo::fasta;
use crate::utils::error::{Result, ScrapeError};
use crate::utils::validation;
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const SERVICE: &str = "NCBI BLAST";
const TOOL_NAME: &str = "phylo-scrape";

/// Remote BLAST through the NCBI URL API (Put, poll, Get).
pub struct NcbiBlastClient {
    client: Client,
    config: BlastConfig,
    rid_pattern: Regex,
    status_pattern: Regex,
}

#[derive(Debug, PartialEq, Eq)]
enum SearchStatus {
    Waiting,
    Ready { has_hits: bool },
    Failed(String),
}

// JSON2_S single-file output

#[derive(Debug, Deserialize)]
struct BlastOutput {
    #[serde(rename = "BlastOutput2", default)]
    reports: Vec<ReportWrapper>,
}

#[derive(Debug, Deserialize)]
struct ReportWrapper {
    report: Report,
}

#[derive(Debug, Deserialize)]
struct Report {
    results: Results,
}

#[derive(Debug, Deserialize)]
struct Results {
    search: Search,
}

#[derive(Debug, Deserialize)]
struct Search {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(default)]
    description: Vec<HitDescription>,
    #[serde(default)]
    hsps: Vec<Hsp>,
}

#[derive(Debug, Deserialize)]
struct HitDescription {
    #[serde(default)]
    accession: String,
    #[serde(default)]
    title: String,
    taxid: Option<u64>,
    sciname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hsp {
    evalue: f64,
    bit_score: f64,
    #[serde(default)]
    identity: u64,
    #[serde(default)]
    align_len: u64,
    #[serde(default)]
    hseq: String,
}

impl NcbiBlastClient {
    /// NCBI asks URL API users for a contact address, so `email` is required.
    pub fn new(config: BlastConfig) -> Result<Self> {
        validation::validate_required_field("blast.email", &config.email)?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        let pattern = |p: &str| {
            Regex::new(p).map_err(|e| ScrapeError::ConfigError {
                message: format!("invalid BLAST response pattern: {}", e),
            })
        };

        Ok(Self {
            client: builder.build()?,
            rid_pattern: pattern(r"RID = (\S+)")?,
            status_pattern: pattern(r"Status=(\w+)")?,
            config,
        })
    }

    fn contact_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("TOOL", TOOL_NAME.to_string())];
        params.extend(self.config.email.clone().map(|email| ("EMAIL", email)));
        params
    }

    async fn submit(&self, query: &QuerySequence) -> Result<String> {
        // Serializer 不是 Send，必須在 await 之前結束
        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("CMD", "Put")
                .append_pair("PROGRAM", &self.config.program)
                .append_pair("DATABASE", &self.config.database)
                .append_pair("QUERY", &query.sequence)
                .append_pair("EXPECT", &self.config.e_value_thresh.to_string())
                .append_pair("HITLIST_SIZE", &self.config.hitlist_size.to_string());
            for (key, value) in self.contact_params() {
                form.append_pair(key, &value);
            }
            form.finish()
        };

        let response = self
            .client
            .post(&self.config.url_base)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;

        self.rid_pattern
            .captures(&body)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| {
                ScrapeError::service(SERVICE, "no request id (RID) in submission response")
            })
    }

    async fn status(&self, rid: &str) -> Result<SearchStatus> {
        let mut params = vec![
            ("CMD", "Get".to_string()),
            ("FORMAT_OBJECT", "SearchInfo".to_string()),
            ("RID", rid.to_string()),
        ];
        params.extend(self.contact_params());

        let body = self
            .client
            .get(&self.config.url_base)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let status = self
            .status_pattern
            .captures(&body)
            .map(|caps| caps[1].to_string())
            .unwrap_or_default();
        Ok(match status.as_str() {
            "WAITING" => SearchStatus::Waiting,
            "READY" => SearchStatus::Ready {
                has_hits: body.contains("ThereAreHits=yes"),
            },
            other => SearchStatus::Failed(if other.is_empty() {
                "missing status".to_string()
            } else {
                other.to_string()
            }),
        })
    }

    async fn fetch_hits(&self, rid: &str) -> Result<Vec<BlastHit>> {
        let mut params = vec![
            ("CMD", "Get".to_string()),
            ("FORMAT_TYPE", "JSON2_S".to_string()),
            ("RID", rid.to_string()),
        ];
        params.extend(self.contact_params());

        let body = self
            .client
            .get(&self.config.url_base)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_json2(&body)
    }
}

/// Converts a JSON2_S report into hits, using the first HSP of every hit.
fn parse_json2(body: &str) -> Result<Vec<BlastHit>> {
    let output: BlastOutput = serde_json::from_str(body)?;
    let hits = output
        .reports
        .into_iter()
        .flat_map(|wrapper| wrapper.report.results.search.hits)
        .filter_map(|hit| {
            let description = hit.description.into_iter().next()?;
            let hsp = hit.hsps.into_iter().next()?;
            Some(BlastHit {
                accession: description.accession,
                title: description.title,
                taxid: description.taxid,
                sciname: description.sciname,
                evalue: hsp.evalue,
                bit_score: hsp.bit_score,
                identity: hsp.identity,
                align_len: hsp.align_len,
                sequence: fasta::ungap(&hsp.hseq),
            })
        })
        .collect();
    Ok(hits)
}

#[async_trait]
impl SequenceSearch for NcbiBlastClient {
    async fn search(&self, query: &QuerySequence) -> Result<Vec<BlastHit>> {
        let rid = self.submit(query).await?;
        tracing::info!("🔎 BLAST search for {} submitted (RID {})", query.otu_id, rid);

        let interval = Duration::from_secs(self.config.poll_interval_seconds);
        for attempt in 1..=self.config.max_polls {
            tokio::time::sleep(interval).await;
            match self.status(&rid).await? {
                SearchStatus::Waiting => {
                    tracing::debug!("BLAST {} still running (poll {})", rid, attempt);
                }
                SearchStatus::Ready { has_hits: false } => {
                    tracing::info!("🔎 BLAST {} finished without hits", rid);
                    return Ok(Vec::new());
                }
                SearchStatus::Ready { has_hits: true } => {
                    let hits = self.fetch_hits(&rid).await?;
                    tracing::info!("🔎 BLAST {} returned {} hits", rid, hits.len());
                    return Ok(hits);
                }
                SearchStatus::Failed(status) => {
                    return Err(ScrapeError::service(
                        SERVICE,
                        format!("search {} ended with status {}", rid, status),
                    ));
                }
            }
        }

        Err(ScrapeError::service(
            SERVICE,
            format!(
                "search {} not finished after {} polls",
                rid, self.config.max_polls
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn config(url_base: String) -> BlastConfig {
        BlastConfig {
            url_base,
            email: Some("lab@example.org".to_string()),
            poll_interval_seconds: 0,
            max_polls: 3,
            ..BlastConfig::default()
        }
    }

    fn report() -> serde_json::Value {
        serde_json::json!({
            "BlastOutput2": [{
                "report": {
                    "program": "blastn",
                    "results": {
                        "search": {
                            "query_id": "Query_1",
                            "hits": [
                                {
                                    "num": 1,
                                    "description": [{
                                        "id": "gi|1|gb|KX000001.1|",
                                        "accession": "KX000001",
                                        "title": "Garrulax canorus cytochrome b gene",
                                        "taxid": 9171,
                                        "sciname": "Garrulax canorus"
                                    }],
                                    "len": 1143,
                                    "hsps": [{
                                        "num": 1,
                                        "bit_score": 210.5,
                                        "evalue": 1e-60,
                                        "identity": 118,
                                        "align_len": 120,
                                        "hseq": "ACGT-ACGT"
                                    }]
                                },
                                {"num": 2, "description": [], "hsps": []}
                            ]
                        }
                    }
                }
            }]
        })
    }

    #[test]
    fn test_contact_address_is_required() {
        let err = NcbiBlastClient::new(BlastConfig::default()).err().unwrap();
        assert!(matches!(err, ScrapeError::MissingConfigError { .. }));
    }

    #[test]
    fn test_parse_json2_uses_first_hsp() {
        let hits = parse_json2(&report().to_string()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].accession, "KX000001");
        assert_eq!(hits[0].taxid, Some(9171));
        assert_eq!(hits[0].sequence, "ACGTACGT");
        assert!((hits[0].evalue - 1e-60).abs() < 1e-72);
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_submit_future_is_send() {
        let client =
            NcbiBlastClient::new(config("http://localhost/Blast.cgi".to_string())).unwrap();
        let query = QuerySequence {
            otu_id: "otu1".to_string(),
            sequence: "ACGT".to_string(),
        };
        assert_send(&client.submit(&query));
        assert_send(&client.search(&query));
    }

    #[tokio::test]
    async fn test_search_put_poll_get() {
        let server = MockServer::start();

        let put_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/Blast.cgi")
                .body_contains("CMD=Put")
                .body_contains("QUERY=ACGTACGT")
                .body_contains("EMAIL=lab%40example.org");
            then.status(200)
                .body("<!--QBlastInfoBegin\n    RID = R2D2XYZ\n    RTOE = 10\nQBlastInfoEnd-->");
        });
        let status_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/Blast.cgi")
                .query_param("FORMAT_OBJECT", "SearchInfo")
                .query_param("RID", "R2D2XYZ");
            then.status(200)
                .body("QBlastInfoBegin\n\tStatus=READY\nQBlastInfoEnd\nQBlastInfoBegin\n\tThereAreHits=yes\nQBlastInfoEnd");
        });
        let result_mock = server.mock(|when, then| {
            when.method(GET)
                .path("/Blast.cgi")
                .query_param("FORMAT_TYPE", "JSON2_S")
                .query_param("RID", "R2D2XYZ");
            then.status(200).json_body(report());
        });

        let client = NcbiBlastClient::new(config(server.url("/Blast.cgi"))).unwrap();
        let query = QuerySequence {
            otu_id: "otu1".to_string(),
            sequence: "ACGTACGT".to_string(),
        };
        let hits = client.search(&query).await.unwrap();

        put_mock.assert();
        status_mock.assert();
        result_mock.assert();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].sciname.as_deref(), Some("Garrulax canorus"));
    }

    #[tokio::test]
    async fn test_failed_search() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/Blast.cgi");
            then.status(200).body("RID = FAIL1\n");
        });
        server.mock(|when, then| {
            when.method(GET).path("/Blast.cgi").query_param("RID", "FAIL1");
            then.status(200).body("Status=FAILED");
        });

        let client = NcbiBlastClient::new(config(server.url("/Blast.cgi"))).unwrap();
        let query = QuerySequence {
            otu_id: "otu1".to_string(),
            sequence: "ACGT".to_string(),
        };
        let err = client.search(&query).await.unwrap_err();
        assert!(matches!(err, ScrapeError::ServiceError { .. }));
    }

    #[tokio::test]
    async fn test_ready_without_hits() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/Blast.cgi");
            then.status(200).body("RID = EMPTY1\n");
        });
        let status_mock = server.mock(|when, then| {
            when.method(GET).path("/Blast.cgi").query_param("RID", "EMPTY1");
            then.status(200).body("Status=READY\nThereAreHits=no");
        });

        let client = NcbiBlastClient::new(config(server.url("/Blast.cgi"))).unwrap();
        let query = QuerySequence {
            otu_id: "otu1".to_string(),
            sequence: "ACGT".to_string(),
        };
        let hits = client.search(&query).await.unwrap();

        status_mock.assert_hits(1);
        assert!(hits.is_empty());
    }
}
