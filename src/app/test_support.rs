//! Stand-ins for the remote search and the external tools.

use crate::domain::model::{BlastHit, QuerySequence};
use crate::domain::ports::{Aligner, SequenceSearch, TreeEstimator, TreeSearchRequest};
use crate::phylo::{fasta, newick};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn hit(accession: &str, taxid: u64, sciname: &str, evalue: f64, sequence: &str) -> BlastHit {
    BlastHit {
        accession: accession.to_string(),
        title: format!("{} cytochrome b gene, partial cds", sciname),
        taxid: Some(taxid),
        sciname: Some(sciname.to_string()),
        evalue,
        bit_score: 200.0,
        identity: sequence.len() as u64,
        align_len: sequence.len() as u64,
        sequence: sequence.to_string(),
    }
}

/// Answers every query from a fixed table and counts the searches.
#[derive(Default)]
pub struct MockSearch {
    hits: HashMap<String, Vec<BlastHit>>,
    calls: AtomicUsize,
}

impl MockSearch {
    pub fn with_hits(otu_id: &str, hits: Vec<BlastHit>) -> Self {
        let mut search = Self::default();
        search.hits.insert(otu_id.to_string(), hits);
        search
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SequenceSearch for MockSearch {
    async fn search(&self, query: &QuerySequence) -> Result<Vec<BlastHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.get(&query.otu_id).cloned().unwrap_or_default())
    }
}

/// Pads or cuts every query to the reference alignment length.
pub struct PaddingAligner;

#[async_trait]
impl Aligner for PaddingAligner {
    async fn add_to_alignment(&self, alignment: &Path, queries: &Path) -> Result<String> {
        let reference = fasta::parse(&tokio::fs::read_to_string(alignment).await?)?;
        let queries = fasta::parse(&tokio::fs::read_to_string(queries).await?)?;
        let width = reference.iter().map(|r| r.sequence.len()).max().unwrap_or(0);

        let padded: Vec<(String, String)> = queries
            .into_iter()
            .map(|q| {
                let mut sequence: String = q.sequence.chars().take(width).collect();
                while sequence.len() < width {
                    sequence.push('-');
                }
                (q.id, sequence)
            })
            .collect();

        Ok(fasta::write(
            reference
                .iter()
                .map(|r| (r.id.as_str(), r.sequence.as_str()))
                .chain(padded.iter().map(|(id, seq)| (id.as_str(), seq.as_str()))),
        ))
    }
}

/// Returns the reference alignment unchanged, losing every query.
pub struct DroppingAligner;

#[async_trait]
impl Aligner for DroppingAligner {
    async fn add_to_alignment(&self, alignment: &Path, _queries: &Path) -> Result<String> {
        Ok(tokio::fs::read_to_string(alignment).await?)
    }
}

/// Attaches aligned taxa missing from the starting tree below its root.
#[derive(Default)]
pub struct GraftingEstimator {
    calls: AtomicUsize,
    partial_flags: Mutex<Vec<bool>>,
}

impl GraftingEstimator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `partial_starting_tree` of every request, in call order.
    pub fn partial_flags(&self) -> Vec<bool> {
        self.partial_flags.lock().unwrap().clone()
    }
}

#[async_trait]
impl TreeEstimator for GraftingEstimator {
    async fn estimate(&self, request: TreeSearchRequest<'_>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.partial_flags
            .lock()
            .unwrap()
            .push(request.partial_starting_tree);
        let start = tokio::fs::read_to_string(request.starting_tree).await?;
        let mut tree = newick::parse(start.trim())?;
        let alignment = fasta::parse(&tokio::fs::read_to_string(request.alignment).await?)?;

        let present: BTreeSet<String> =
            tree.leaf_labels().into_iter().map(str::to_string).collect();
        let root = tree.root();
        for record in alignment {
            if !present.contains(&record.id) {
                tree.add_child(root, Some(record.id), Some(0.05));
            }
        }
        Ok(newick::write(&tree))
    }
}
