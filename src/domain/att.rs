//! Alignment, tree and taxon information held together.
//!
//! Tips of [AlignTreeTax::tree] and keys of [AlignTreeTax::aln] are OTU ids;
//! every id also has an entry in the OTU dictionary. Human readable labels
//! are only applied on export, so repeated taxon names never clash inside
//! the working data.

use crate::domain::model::{CharMatrix, LabelKey, OtuRecord, OtuStatus};
use crate::phylo::fasta;
use crate::phylo::newick;
use crate::phylo::nexson::{Nexml, TipLabel};
use crate::phylo::tree::Tree;
use crate::utils::error::{Result, ScrapeError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignTreeTax {
    pub tree: Tree,
    pub aln: BTreeMap<String, String>,
    pub otu_dict: BTreeMap<String, OtuRecord>,
    pub tag: String,
}

/// Labels coming from different sources disagree on blanks vs underscores.
fn normalize_label(label: &str) -> String {
    label
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl AlignTreeTax {
    /// Builds the dataset from a phylesystem study and the chosen matrix.
    ///
    /// Matrix rows are matched to the tree's OTUs via their original labels.
    /// Taxa found only in the tree or only in the matrix are dropped.
    pub fn from_phylesystem(
        nexml: &Nexml,
        tree_id: &str,
        matrix: &CharMatrix,
        tag: &str,
    ) -> Result<Self> {
        let tree = nexml.extract_tree(tree_id, TipLabel::OtuId)?;
        let otus = nexml.otus_for_tree(tree_id)?;
        let tree_otus: BTreeSet<String> =
            tree.leaf_labels().into_iter().map(str::to_string).collect();

        let mut by_label: HashMap<String, &str> = HashMap::new();
        for otu_id in &tree_otus {
            if let Some(label) = otus.get(otu_id).and_then(|o| o.original_label.as_deref()) {
                by_label.entry(normalize_label(label)).or_insert(otu_id.as_str());
            }
        }

        let mut aln = BTreeMap::new();
        for row in &matrix.rows {
            match by_label.get(&normalize_label(&row.taxon)) {
                Some(&otu_id) => {
                    if aln.insert(otu_id.to_string(), row.sequence.clone()).is_some() {
                        tracing::warn!(
                            "⚠️ Taxon '{}' appears twice in the matrix; keeping the last row",
                            row.taxon
                        );
                    }
                }
                None => tracing::warn!(
                    "⚠️ Matrix taxon '{}' is not in tree {}; dropped",
                    row.taxon,
                    tree_id
                ),
            }
        }

        if aln.is_empty() {
            return Err(ScrapeError::processing(format!(
                "no taxon of tree {} matches a row of the selected matrix",
                tree_id
            )));
        }

        let otu_dict = tree_otus
            .iter()
            .filter(|otu_id| aln.contains_key(*otu_id))
            .map(|otu_id| {
                let otu = otus.get(otu_id).cloned().unwrap_or_default();
                (
                    otu_id.clone(),
                    OtuRecord::original(otu.original_label, otu.ott_id, otu.ott_taxon_name),
                )
            })
            .collect();

        let mut att = Self {
            tree,
            aln,
            otu_dict,
            tag: tag.to_string(),
        };
        att.reconcile();
        Ok(att)
    }

    /// Number of taxa in the alignment (equal to the tree's after reconcile).
    pub fn len(&self) -> usize {
        self.aln.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aln.is_empty()
    }

    /// Drops tips without sequence and sequences without tip, and marks
    /// OTUs that left the data as deleted.
    pub fn reconcile(&mut self) {
        let aln = &self.aln;
        let pruned = self.tree.prune_leaves(|otu_id| aln.contains_key(otu_id));
        for otu_id in &pruned {
            tracing::info!("✂️ Tree tip {} has no sequence; pruned", otu_id);
        }

        let in_tree: BTreeSet<String> =
            self.tree.leaf_labels().into_iter().map(str::to_string).collect();
        let orphans: Vec<String> = self
            .aln
            .keys()
            .filter(|otu_id| !in_tree.contains(*otu_id))
            .cloned()
            .collect();
        for otu_id in &orphans {
            tracing::info!("✂️ Sequence {} is not in the tree; removed", otu_id);
            self.aln.remove(otu_id);
        }

        for otu_id in pruned.iter().chain(orphans.iter()) {
            if let Some(record) = self.otu_dict.get_mut(otu_id) {
                record.status = OtuStatus::Deleted;
            }
        }
    }

    /// Adds an OTU record. The sequence is added by the caller once aligned.
    pub fn add_otu(&mut self, otu_id: String, record: OtuRecord) {
        self.otu_dict.insert(otu_id, record);
    }

    pub fn otus_with_status(&self, status: OtuStatus) -> Vec<&str> {
        self.otu_dict
            .iter()
            .filter(|(_, record)| record.status == status)
            .map(|(otu_id, _)| otu_id.as_str())
            .collect()
    }

    /// Sequence of `otu_id` with gaps removed.
    pub fn ungapped(&self, otu_id: &str) -> Option<String> {
        self.aln.get(otu_id).map(|seq| fasta::ungap(seq))
    }

    pub fn average_sequence_length(&self) -> f64 {
        if self.aln.is_empty() {
            return 0.0;
        }
        let total: usize = self.aln.values().map(|seq| fasta::ungap(seq).len()).sum();
        total as f64 / self.aln.len() as f64
    }

    /// Replaces the alignment, e.g. after adding query sequences.
    pub fn replace_alignment(&mut self, aln: BTreeMap<String, String>) -> Result<()> {
        if let Some(unknown) = aln.keys().find(|otu_id| !self.otu_dict.contains_key(*otu_id)) {
            return Err(ScrapeError::ValidationError {
                message: format!("aligned sequence {} has no OTU record", unknown),
            });
        }
        self.aln = aln;
        Ok(())
    }

    /// Replaces the tree (OTU ids as tips) and re-establishes consistency.
    pub fn replace_tree(&mut self, tree: Tree) {
        self.tree = tree;
        self.reconcile();
    }

    /// Export label of every current OTU.
    ///
    /// With `norepeats`, a label already handed out gets the OTU id appended
    /// so that tree viewers see unique tip names.
    pub fn export_labels(&self, key: LabelKey, norepeats: bool) -> HashMap<String, String> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut labels = HashMap::new();

        for otu_id in self.tree.leaf_labels() {
            let record = self.otu_dict.get(otu_id);
            let mut label = record
                .and_then(|r| r.label(key, otu_id).or_else(|| r.original_label.clone()))
                .unwrap_or_else(|| otu_id.to_string());

            if norepeats && seen.contains(&label) {
                label = format!("{} {}", label, otu_id);
            }
            seen.insert(label.clone());
            labels.insert(otu_id.to_string(), label);
        }
        labels
    }

    /// Newick export with human readable tips.
    pub fn labelled_newick(&self, key: LabelKey, norepeats: bool) -> String {
        let labels = self.export_labels(key, norepeats);
        newick::write(&self.tree.with_leaf_labels(&labels))
    }

    /// FASTA export in tree tip order, labelled like [Self::labelled_newick].
    pub fn labelled_fasta(&self, key: LabelKey, norepeats: bool) -> String {
        let labels = self.export_labels(key, norepeats);
        let records: Vec<(&str, &str)> = self
            .tree
            .leaf_labels()
            .into_iter()
            .filter_map(|otu_id| {
                let label = labels.get(otu_id)?;
                let sequence = self.aln.get(otu_id)?;
                Some((label.as_str(), sequence.as_str()))
            })
            .collect();
        fasta::write(records)
    }

    /// Alignment keyed by OTU id, as handed to external tools.
    pub fn alignment_fasta(&self) -> String {
        fasta::write(self.aln.iter().map(|(id, seq)| (id.as_str(), seq.as_str())))
    }

    pub fn tree_newick(&self) -> String {
        newick::write(&self.tree)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::MatrixRow;
    use crate::phylo::nexson::{fixtures, NexsonDocument};

    fn nexml() -> Nexml {
        NexsonDocument::from_json(fixtures::study_json()).unwrap().nexml
    }

    fn row(taxon: &str, sequence: &str) -> MatrixRow {
        MatrixRow {
            taxon: taxon.to_string(),
            sequence: sequence.to_string(),
        }
    }

    fn cytb() -> CharMatrix {
        CharMatrix {
            title: Some("cytb".to_string()),
            data_type: Some("DNA".to_string()),
            rows: vec![
                row("Garrulax canorus", "ACGTACGT"),
                row("Garrulax_sannio", "ACGTACGA"),
                row("Leiothrix lutea", "ACGTAC-T"),
                row("Turdus merula", "ACGTACCC"),
            ],
        }
    }

    #[test]
    fn test_from_phylesystem_matches_and_prunes() {
        let att = AlignTreeTax::from_phylesystem(&nexml(), "Tr53297", &cytb(), "ot_350").unwrap();

        // otu4 has no row, Turdus has no tip
        assert_eq!(att.len(), 3);
        assert_eq!(att.tree.leaf_labels(), vec!["otu1", "otu2", "otu3"]);
        assert_eq!(att.aln["otu2"], "ACGTACGA");
        assert_eq!(att.otu_dict["otu1"].ott_id, Some(1001));
        assert_eq!(att.otu_dict["otu1"].status, OtuStatus::Original);
        assert!(!att.otu_dict.contains_key("otu4"));
    }

    #[test]
    fn test_no_overlap_is_an_error() {
        let matrix = CharMatrix {
            rows: vec![row("Turdus merula", "ACGT")],
            ..CharMatrix::default()
        };
        assert!(AlignTreeTax::from_phylesystem(&nexml(), "Tr53297", &matrix, "t").is_err());
    }

    #[test]
    fn test_labelled_exports_norepeats() {
        let mut att =
            AlignTreeTax::from_phylesystem(&nexml(), "Tr53297", &cytb(), "ot_350").unwrap();
        att.otu_dict.get_mut("otu2").unwrap().ott_taxon_name = Some("Garrulax canorus".to_string());

        let unique = att.labelled_newick(LabelKey::OttTaxonName, true);
        assert_eq!(
            unique,
            "(('Garrulax canorus':1,'Garrulax canorus otu2':1.5):0.1,'Leiothrix lutea':0.2);"
        );

        let repeated = att.export_labels(LabelKey::OttTaxonName, false);
        assert_eq!(repeated["otu1"], repeated["otu2"]);

        let fasta = att.labelled_fasta(LabelKey::OttTaxonName, true);
        assert!(fasta.starts_with(">Garrulax canorus\nACGTACGT\n>Garrulax canorus otu2\n"));
    }

    #[test]
    fn test_missing_label_falls_back_to_original() {
        let mut att =
            AlignTreeTax::from_phylesystem(&nexml(), "Tr53297", &cytb(), "ot_350").unwrap();
        att.otu_dict.get_mut("otu3").unwrap().ott_taxon_name = None;
        let labels = att.export_labels(LabelKey::OttTaxonName, true);
        assert_eq!(labels["otu3"], "Leiothrix_lutea");
    }

    #[test]
    fn test_replace_alignment_requires_records() {
        let mut att =
            AlignTreeTax::from_phylesystem(&nexml(), "Tr53297", &cytb(), "ot_350").unwrap();
        let mut aln = att.aln.clone();
        aln.insert("otuPS1".to_string(), "ACGTACGT".to_string());
        assert!(att.replace_alignment(aln).is_err());
    }

    #[test]
    fn test_json_checkpoint() {
        let att = AlignTreeTax::from_phylesystem(&nexml(), "Tr53297", &cytb(), "ot_350").unwrap();
        let restored = AlignTreeTax::from_json(&att.to_json().unwrap()).unwrap();
        assert_eq!(restored.aln, att.aln);
        assert_eq!(restored.tree_newick(), att.tree_newick());
        assert!((restored.average_sequence_length() - 23.0 / 3.0).abs() < 1e-9);
    }
}
