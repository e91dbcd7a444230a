use crate::phylo::nexson::Nexml;
use crate::phylo::tree::Tree;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One row of a character matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRow {
    pub taxon: String,
    pub sequence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharMatrix {
    pub title: Option<String>,
    pub data_type: Option<String>,
    pub rows: Vec<MatrixRow>,
}

impl CharMatrix {
    /// Number of rows (taxa) in the matrix.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn nchar(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.sequence.len())
            .max()
            .unwrap_or(0)
    }
}

/// All character matrices of a study, in repository order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub char_matrices: Vec<CharMatrix>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtuStatus {
    /// From the published study.
    Original,
    /// Retrieved by sequence search, not yet aligned.
    Query,
    /// Aligned into the working alignment.
    Added,
    Deleted,
}

/// Taxon-identity information attached to one OTU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtuRecord {
    pub original_label: Option<String>,
    pub ott_id: Option<u64>,
    pub ott_taxon_name: Option<String>,
    pub ncbi_taxon: Option<u64>,
    pub accession: Option<String>,
    pub status: OtuStatus,
}

impl OtuRecord {
    pub fn original(
        original_label: Option<String>,
        ott_id: Option<u64>,
        name: Option<String>,
    ) -> Self {
        Self {
            original_label,
            ott_id,
            ott_taxon_name: name,
            ncbi_taxon: None,
            accession: None,
            status: OtuStatus::Original,
        }
    }

    /// Value for `key`, `None` when the OTU lacks that annotation.
    pub fn label(&self, key: LabelKey, otu_id: &str) -> Option<String> {
        match key {
            LabelKey::OttTaxonName => self.ott_taxon_name.clone(),
            LabelKey::OriginalLabel => self.original_label.clone(),
            LabelKey::OttId => self.ott_id.map(|id| id.to_string()),
            LabelKey::NcbiTaxon => self.ncbi_taxon.map(|id| id.to_string()),
            LabelKey::Accession => self.accession.clone(),
            LabelKey::Otu => Some(otu_id.to_string()),
        }
    }
}

/// Annotation used to label exported tips, named as in NexSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKey {
    OttTaxonName,
    OriginalLabel,
    OttId,
    NcbiTaxon,
    Accession,
    Otu,
}

impl FromStr for LabelKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "^ot:ottTaxonName" => Ok(LabelKey::OttTaxonName),
            "^ot:originalLabel" => Ok(LabelKey::OriginalLabel),
            "^ot:ottId" => Ok(LabelKey::OttId),
            "^ncbi:taxon" => Ok(LabelKey::NcbiTaxon),
            "^ncbi:accession" => Ok(LabelKey::Accession),
            "otu" => Ok(LabelKey::Otu),
            other => Err(format!("unknown label key '{}'", other)),
        }
    }
}

impl fmt::Display for LabelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LabelKey::OttTaxonName => "^ot:ottTaxonName",
            LabelKey::OriginalLabel => "^ot:originalLabel",
            LabelKey::OttId => "^ot:ottId",
            LabelKey::NcbiTaxon => "^ncbi:taxon",
            LabelKey::Accession => "^ncbi:accession",
            LabelKey::Otu => "otu",
        };
        f.write_str(name)
    }
}

/// Ungapped sequence submitted to the similarity search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySequence {
    pub otu_id: String,
    pub sequence: String,
}

/// Best HSP of one search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastHit {
    pub accession: String,
    pub title: String,
    pub taxid: Option<u64>,
    pub sciname: Option<String>,
    pub evalue: f64,
    pub bit_score: f64,
    pub identity: u64,
    pub align_len: u64,
    /// Subject sequence of the HSP with gaps removed.
    pub sequence: String,
}

/// Cached search result for one query OTU (`blast/{otu}.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastRecord {
    pub query_otu: String,
    pub searched_at: DateTime<Utc>,
    pub hits: Vec<BlastHit>,
}

/// Output of the extract phase.
#[derive(Debug, Clone)]
pub struct StudyData {
    pub study_id: String,
    pub tree_id: String,
    pub nexml: Nexml,
    /// Tree with original labels as tips, as published.
    pub tree: Tree,
    pub dataset: DataSet,
}

/// Output of the transform phase.
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub data: crate::domain::att::AlignTreeTax,
    pub original_export: String,
    pub original_taxa: usize,
    pub new_sequences: usize,
}

/// Paths written by the load phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeReport {
    pub original_export: String,
    pub updated_export: String,
    pub checkpoint: String,
    pub original_taxa: usize,
    pub final_taxa: usize,
}
