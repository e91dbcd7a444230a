//! Extends an [AlignTreeTax] with sequences found by similarity search.

use crate::config::scrape_config::{BlastConfig, FilterConfig};
use crate::domain::att::AlignTreeTax;
use crate::domain::ids::IdDicts;
use crate::domain::model::{BlastHit, BlastRecord, OtuRecord, OtuStatus, QuerySequence};
use crate::domain::ports::{Aligner, SequenceSearch, Storage, TreeEstimator, TreeSearchRequest};
use crate::phylo::{fasta, newick};
use crate::utils::error::{Result, ScrapeError};
use chrono::{TimeDelta, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// 新序列 OTU 的前綴
const NEW_OTU_PREFIX: &str = "otuPS";

/// Search, alignment and tree inference used by the scraper.
#[derive(Clone, Copy)]
pub struct ScrapeTools<'a> {
    pub search: &'a dyn SequenceSearch,
    pub aligner: &'a dyn Aligner,
    pub estimator: &'a dyn TreeEstimator,
}

fn blast_cache_path(otu_id: &str) -> String {
    format!("blast/{}.json", otu_id)
}

/// Both records resolve to the same taxon, judged by OTT id, then NCBI
/// taxon, then name.
fn same_taxon(a: &OtuRecord, b: &OtuRecord) -> bool {
    if let (Some(x), Some(y)) = (a.ott_id, b.ott_id) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.ncbi_taxon, b.ncbi_taxon) {
        return x == y;
    }
    match (a.ott_taxon_name.as_deref(), b.ott_taxon_name.as_deref()) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => false,
    }
}

pub struct Scraper<'a, S: Storage> {
    data: AlignTreeTax,
    storage: &'a S,
    ids: &'a IdDicts,
    tools: ScrapeTools<'a>,
    blast: BlastConfig,
    filter: FilterConfig,
    /// OTUs whose sequence has been searched in this run.
    searched: BTreeSet<String>,
    /// Hits not yet filtered, by query OTU.
    pending_hits: BTreeMap<String, Vec<BlastHit>>,
    /// Accepted, still unaligned sequences (status `query`).
    queries: BTreeMap<String, String>,
    next_otu: usize,
}

impl<'a, S: Storage> Scraper<'a, S> {
    pub fn new(
        mut data: AlignTreeTax,
        storage: &'a S,
        ids: &'a IdDicts,
        tools: ScrapeTools<'a>,
        blast: &BlastConfig,
        filter: &FilterConfig,
    ) -> Self {
        // 原始 OTU 補上 NCBI taxon，方便與搜尋結果比對
        for record in data.otu_dict.values_mut() {
            if record.ncbi_taxon.is_none() {
                record.ncbi_taxon = record.ott_id.and_then(|ott| ids.ott_to_ncbi(ott));
            }
        }

        Self {
            data,
            storage,
            ids,
            tools,
            blast: blast.clone(),
            filter: filter.clone(),
            searched: BTreeSet::new(),
            pending_hits: BTreeMap::new(),
            queries: BTreeMap::new(),
            next_otu: 0,
        }
    }

    pub fn data(&self) -> &AlignTreeTax {
        &self.data
    }

    pub fn into_data(self) -> AlignTreeTax {
        self.data
    }

    /// Runs search, filtering, alignment and tree inference in order.
    /// Returns the number of sequences added to the data.
    pub async fn est_full_tree(&mut self) -> Result<usize> {
        let searched = self.run_blast_wrapper().await?;
        tracing::info!("🔎 Searched {} sequences", searched);

        self.read_blast_wrapper();
        if self.queries.is_empty() {
            tracing::info!("ℹ️ No new sequences passed the filters; keeping the original tree");
            return Ok(0);
        }

        let added = self.queries.len();
        self.write_all_unaligned().await?;
        self.align_query_seqs().await?;
        self.estimate_tree().await?;

        tracing::info!(
            "✅ Added {} sequences, tree now has {} taxa",
            added,
            self.data.len()
        );
        Ok(added)
    }

    /// Searches every aligned OTU not yet searched in this run.
    ///
    /// A cached `blast/{otu}.json` younger than `delay_days` replaces the
    /// remote search.
    pub async fn run_blast_wrapper(&mut self) -> Result<usize> {
        let otu_ids: Vec<String> = self
            .data
            .aln
            .keys()
            .filter(|otu_id| !self.searched.contains(*otu_id))
            .cloned()
            .collect();

        let mut cached = 0;
        for otu_id in otu_ids {
            let Some(sequence) = self.data.ungapped(&otu_id) else {
                continue;
            };

            let hits = match self.cached_hits(&otu_id).await? {
                Some(hits) => {
                    cached += 1;
                    hits
                }
                None => {
                    let query = QuerySequence {
                        otu_id: otu_id.clone(),
                        sequence,
                    };
                    let record = BlastRecord {
                        query_otu: otu_id.clone(),
                        searched_at: Utc::now(),
                        hits: self.tools.search.search(&query).await?,
                    };
                    let json = serde_json::to_string_pretty(&record)?;
                    self.storage
                        .write_file(&blast_cache_path(&otu_id), json.as_bytes())
                        .await?;
                    record.hits
                }
            };

            tracing::debug!("{} has {} hits", otu_id, hits.len());
            self.pending_hits.insert(otu_id.clone(), hits);
            self.searched.insert(otu_id);
        }

        if cached > 0 {
            tracing::info!("♻️ Reused {} cached searches", cached);
        }
        Ok(self.pending_hits.len())
    }

    async fn cached_hits(&self, otu_id: &str) -> Result<Option<Vec<BlastHit>>> {
        let path = blast_cache_path(otu_id);
        if !self.storage.exists(&path).await {
            return Ok(None);
        }

        let bytes = self.storage.read_file(&path).await?;
        let record: BlastRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("⚠️ Ignoring unreadable search cache {}: {}", path, e);
                return Ok(None);
            }
        };

        let age = Utc::now() - record.searched_at;
        // 超出 TimeDelta 範圍的 delay_days 視為永不過期
        let fresh = match TimeDelta::try_days(self.blast.delay_days) {
            Some(delay) => age < delay,
            None => true,
        };
        if fresh {
            tracing::debug!("Reusing search of {} from {}", otu_id, record.searched_at);
            Ok(Some(record.hits))
        } else {
            tracing::debug!("Search cache of {} is {} days old", otu_id, age.num_days());
            Ok(None)
        }
    }

    /// Turns pending hits into `query` OTUs. Returns how many were accepted.
    pub fn read_blast_wrapper(&mut self) -> usize {
        let average = self.data.average_sequence_length();
        let min_len = self.filter.seq_len_perc * average;
        let max_len = self.filter.max_len_perc * average;

        let mut seen_accessions: BTreeSet<String> = self
            .data
            .otu_dict
            .values()
            .filter_map(|record| record.accession.clone())
            .collect();

        let mut accepted = 0;
        for (query_otu, hits) in std::mem::take(&mut self.pending_hits) {
            for hit in hits {
                if hit.evalue >= self.blast.e_value_thresh {
                    continue;
                }
                if hit.accession.is_empty() || !seen_accessions.insert(hit.accession.clone()) {
                    continue;
                }

                let length = hit.sequence.len() as f64;
                if length < min_len || length > max_len {
                    tracing::debug!(
                        "{} ({} bp, hit of {}) outside {:.0}-{:.0} bp",
                        hit.accession,
                        hit.sequence.len(),
                        query_otu,
                        min_len,
                        max_len
                    );
                    continue;
                }

                let record = self.record_for_hit(&hit);
                if self.add_unless_repeat(record, hit.sequence.to_ascii_uppercase()) {
                    accepted += 1;
                }
            }
        }

        tracing::info!(
            "🧹 {} new sequences accepted, {} waiting for alignment",
            accepted,
            self.queries.len()
        );
        accepted
    }

    fn record_for_hit(&self, hit: &BlastHit) -> OtuRecord {
        let ott_id = hit.taxid.and_then(|taxid| self.ids.ncbi_to_ott(taxid));
        let name = ott_id
            .and_then(|ott| self.ids.ott_name(ott))
            .map(str::to_string)
            .or_else(|| hit.sciname.clone());

        OtuRecord {
            original_label: None,
            ott_id,
            ott_taxon_name: name,
            ncbi_taxon: hit.taxid,
            accession: Some(hit.accession.clone()),
            status: OtuStatus::Query,
        }
    }

    /// Drops `sequence` when a sequence of the same taxon already covers it.
    /// Pending queries of that taxon which it strictly contains are replaced.
    fn add_unless_repeat(&mut self, record: OtuRecord, sequence: String) -> bool {
        let mut replaced = Vec::new();

        for (otu_id, existing) in &self.data.otu_dict {
            if existing.status == OtuStatus::Deleted || !same_taxon(existing, &record) {
                continue;
            }
            let existing_sequence = match existing.status {
                OtuStatus::Query => self.queries.get(otu_id).cloned(),
                _ => self.data.ungapped(otu_id).map(|s| s.to_ascii_uppercase()),
            };
            let Some(existing_sequence) = existing_sequence else {
                continue;
            };

            if existing_sequence.contains(&sequence) {
                tracing::debug!("{:?} repeats {}; dropped", record.accession, otu_id);
                return false;
            }
            if existing.status == OtuStatus::Query && sequence.contains(&existing_sequence) {
                replaced.push(otu_id.clone());
            }
        }

        for otu_id in replaced {
            tracing::debug!("{:?} supersedes {}", record.accession, otu_id);
            self.queries.remove(&otu_id);
            if let Some(old) = self.data.otu_dict.get_mut(&otu_id) {
                old.status = OtuStatus::Deleted;
            }
        }

        let otu_id = self.next_otu_id();
        self.data.add_otu(otu_id.clone(), record);
        self.queries.insert(otu_id, sequence);
        true
    }

    fn next_otu_id(&mut self) -> String {
        loop {
            let candidate = format!("{}{}", NEW_OTU_PREFIX, self.next_otu);
            self.next_otu += 1;
            if !self.data.otu_dict.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn queries_path(&self) -> String {
        format!("queries_{}.fas", self.data.tag)
    }

    fn alignment_path(&self) -> String {
        format!("aln_{}.fas", self.data.tag)
    }

    /// Writes the accepted, unaligned sequences to `queries_{tag}.fas`.
    pub async fn write_all_unaligned(&self) -> Result<()> {
        let content = fasta::write(
            self.queries
                .iter()
                .map(|(id, seq)| (id.as_str(), seq.as_str())),
        );
        self.storage
            .write_file(&self.queries_path(), content.as_bytes())
            .await
    }

    /// Aligns the queries into the current alignment, keeping its length.
    pub async fn align_query_seqs(&mut self) -> Result<()> {
        let alignment_path = self.alignment_path();
        self.storage
            .write_file(&alignment_path, self.data.alignment_fasta().as_bytes())
            .await?;

        let merged = self
            .tools
            .aligner
            .add_to_alignment(
                &self.storage.resolve(&alignment_path),
                &self.storage.resolve(&self.queries_path()),
            )
            .await?;

        let aln: BTreeMap<String, String> = fasta::parse(&merged)?
            .into_iter()
            .map(|record| (record.id, record.sequence))
            .collect();
        if let Some(missing) = self.queries.keys().find(|otu_id| !aln.contains_key(*otu_id)) {
            return Err(ScrapeError::tool(
                "aligner",
                format!("sequence {} is missing from the merged alignment", missing),
            ));
        }

        self.data.replace_alignment(aln)?;
        self.storage
            .write_file(&alignment_path, self.data.alignment_fasta().as_bytes())
            .await?;

        for otu_id in std::mem::take(&mut self.queries).into_keys() {
            if let Some(record) = self.data.otu_dict.get_mut(&otu_id) {
                record.status = OtuStatus::Added;
            }
        }
        Ok(())
    }

    /// Re-infers the tree from the merged alignment.
    pub async fn estimate_tree(&mut self) -> Result<()> {
        let start_path = format!("start_{}.tre", self.data.tag);
        self.storage
            .write_file(&start_path, self.data.tree_newick().as_bytes())
            .await?;

        let in_tree: BTreeSet<&str> = self.data.tree.leaf_labels().into_iter().collect();
        let partial = self.data.aln.keys().any(|otu_id| !in_tree.contains(otu_id.as_str()));

        let alignment = self.storage.resolve(&self.alignment_path());
        let starting_tree = self.storage.resolve(&start_path);
        let workdir = self.storage.resolve("");
        let result = self
            .tools
            .estimator
            .estimate(TreeSearchRequest {
                alignment: &alignment,
                starting_tree: &starting_tree,
                partial_starting_tree: partial,
                workdir: &workdir,
                run_name: &self.data.tag,
            })
            .await?;

        let tree = newick::parse(result.trim())?;
        self.data.replace_tree(tree);
        Ok(())
    }
}
