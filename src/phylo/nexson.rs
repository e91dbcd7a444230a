//! Typed view of NexSON 1.2.1 ("HBF") study documents.
//!
//! Only the parts needed to rebuild trees and OTU annotations are modelled;
//! everything else in the document is ignored during deserialisation.

use crate::phylo::tree::{NodeIndex, Tree};
use crate::utils::error::{Result, ScrapeError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

const FORMAT: &str = "NexSON";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexsonDocument {
    pub nexml: Nexml,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Nexml {
    #[serde(rename = "^ot:studyId", default)]
    pub study_id: Option<String>,

    #[serde(rename = "^ot:dataDeposit", default)]
    pub data_deposit: Option<DataDeposit>,

    #[serde(rename = "otusById", default)]
    pub otus_by_id: BTreeMap<String, OtusGroup>,

    #[serde(rename = "treesById", default)]
    pub trees_by_id: BTreeMap<String, TreesGroup>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataDeposit {
    #[serde(rename = "@href", default)]
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OtusGroup {
    #[serde(rename = "otuById", default)]
    pub otu_by_id: BTreeMap<String, NexsonOtu>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NexsonOtu {
    #[serde(rename = "^ot:originalLabel", default)]
    pub original_label: Option<String>,

    #[serde(rename = "^ot:ottId", default, deserialize_with = "lenient_id")]
    pub ott_id: Option<u64>,

    #[serde(rename = "^ot:ottTaxonName", default)]
    pub ott_taxon_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreesGroup {
    #[serde(rename = "@otus")]
    pub otus: String,

    #[serde(rename = "treeById", default)]
    pub tree_by_id: BTreeMap<String, NexsonTree>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NexsonTree {
    #[serde(rename = "^ot:rootNodeId", default)]
    pub root_node_id: Option<String>,

    #[serde(rename = "nodeById", default)]
    pub node_by_id: BTreeMap<String, NexsonNode>,

    #[serde(rename = "edgeBySourceId", default)]
    pub edge_by_source_id: BTreeMap<String, BTreeMap<String, NexsonEdge>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NexsonNode {
    #[serde(rename = "@otu", default)]
    pub otu: Option<String>,

    #[serde(rename = "@root", default)]
    pub root: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NexsonEdge {
    #[serde(rename = "@source")]
    pub source: String,

    #[serde(rename = "@target")]
    pub target: String,

    #[serde(rename = "@length", default)]
    pub length: Option<f64>,
}

/// Which annotation becomes the tip label of an extracted tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TipLabel {
    OriginalLabel,
    OttTaxonName,
    OttId,
    OtuId,
}

/// OTT ids appear both as numbers and as strings in the wild.
fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

impl NexsonDocument {
    /// Parses a study, accepting both the bare document and the
    /// `{"data": {...}}` envelope returned by the phylesystem API.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let document = match value {
            serde_json::Value::Object(mut map) if map.contains_key("data") => {
                map.remove("data").unwrap_or_default()
            }
            other => other,
        };
        serde_json::from_value(document).map_err(|e| ScrapeError::parse(FORMAT, e.to_string()))
    }
}

impl Nexml {
    /// Locates `tree_id` and the id of the OTU group it refers to.
    pub fn find_tree(&self, tree_id: &str) -> Option<(&str, &NexsonTree)> {
        self.trees_by_id.values().find_map(|group| {
            group
                .tree_by_id
                .get(tree_id)
                .map(|tree| (group.otus.as_str(), tree))
        })
    }

    /// OTUs referenced by the given tree's OTU group.
    pub fn otus_for_tree(&self, tree_id: &str) -> Result<&BTreeMap<String, NexsonOtu>> {
        let (otus_id, _) = self.find_tree(tree_id).ok_or_else(|| missing_tree(tree_id))?;
        self.otus_by_id
            .get(otus_id)
            .map(|group| &group.otu_by_id)
            .ok_or_else(|| ScrapeError::parse(FORMAT, format!("unknown OTU group '{}'", otus_id)))
    }

    pub fn data_deposit_url(&self) -> Option<&str> {
        self.data_deposit
            .as_ref()
            .and_then(|deposit| deposit.href.as_deref())
            .filter(|href| !href.trim().is_empty())
    }

    /// Rebuilds `tree_id` as a [Tree] with tips labelled per `tip_label`.
    /// Tips whose OTU lacks the requested annotation fall back to the OTU id.
    pub fn extract_tree(&self, tree_id: &str, tip_label: TipLabel) -> Result<Tree> {
        let (_, nexson_tree) = self.find_tree(tree_id).ok_or_else(|| missing_tree(tree_id))?;
        let otus = self.otus_for_tree(tree_id)?;

        let root_id = nexson_tree
            .root_node_id
            .clone()
            .or_else(|| {
                nexson_tree
                    .node_by_id
                    .iter()
                    .find(|(_, node)| node.root.unwrap_or(false))
                    .map(|(id, _)| id.clone())
            })
            .ok_or_else(|| {
                ScrapeError::parse(FORMAT, format!("tree '{}' has no root node", tree_id))
            })?;

        let mut tree = Tree::new();
        let root = tree.root();
        let mut stack: Vec<(String, NodeIndex)> = vec![(root_id.clone(), root)];
        let mut visited = 0usize;

        while let Some((node_id, index)) = stack.pop() {
            visited += 1;
            if visited > nexson_tree.node_by_id.len() + 1 {
                return Err(ScrapeError::parse(
                    FORMAT,
                    format!("tree '{}' contains a cycle", tree_id),
                ));
            }

            let node = nexson_tree.node_by_id.get(&node_id).ok_or_else(|| {
                ScrapeError::parse(FORMAT, format!("edge points to unknown node '{}'", node_id))
            })?;

            match nexson_tree.edge_by_source_id.get(&node_id) {
                Some(edges) if !edges.is_empty() => {
                    let mut children = Vec::with_capacity(edges.len());
                    for edge in edges.values() {
                        let child = tree.add_child(index, None, edge.length);
                        children.push((edge.target.clone(), child));
                    }
                    // keep edge order when popping
                    stack.extend(children.into_iter().rev());
                }
                _ => {
                    let otu_id = node.otu.as_deref().ok_or_else(|| {
                        ScrapeError::parse(
                            FORMAT,
                            format!("leaf node '{}' has no OTU", node_id),
                        )
                    })?;
                    tree.node_mut(index).label = Some(tip_label_for(otus, otu_id, tip_label));
                }
            }
        }

        Ok(tree)
    }
}

fn tip_label_for(otus: &BTreeMap<String, NexsonOtu>, otu_id: &str, tip_label: TipLabel) -> String {
    let otu = otus.get(otu_id);
    let label = match tip_label {
        TipLabel::OriginalLabel => otu.and_then(|o| o.original_label.clone()),
        TipLabel::OttTaxonName => otu.and_then(|o| o.ott_taxon_name.clone()),
        TipLabel::OttId => otu.and_then(|o| o.ott_id.map(|id| id.to_string())),
        TipLabel::OtuId => None,
    };
    label.unwrap_or_else(|| otu_id.to_string())
}

fn missing_tree(tree_id: &str) -> ScrapeError {
    ScrapeError::parse(FORMAT, format!("tree '{}' not found in study", tree_id))
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Four-taxon study in the shape returned by the phylesystem API.
    pub fn study_json() -> serde_json::Value {
        serde_json::json!({
            "data": {
                "nexml": {
                    "^ot:studyId": "ot_350",
                    "^ot:dataDeposit": {"@href": "http://purl.org/phylo/treebase/phylows/study/TB2:S13613"},
                    "otusById": {
                        "otus350": {
                            "otuById": {
                                "otu1": {"^ot:originalLabel": "Garrulax_canorus", "^ot:ottId": 1001, "^ot:ottTaxonName": "Garrulax canorus"},
                                "otu2": {"^ot:originalLabel": "Garrulax sannio", "^ot:ottId": "1002", "^ot:ottTaxonName": "Garrulax sannio"},
                                "otu3": {"^ot:originalLabel": "Leiothrix_lutea", "^ot:ottId": 1003, "^ot:ottTaxonName": "Leiothrix lutea"},
                                "otu4": {"^ot:originalLabel": "Liocichla omeiensis"}
                            }
                        }
                    },
                    "treesById": {
                        "trees350": {
                            "@otus": "otus350",
                            "treeById": {
                                "Tr53297": {
                                    "^ot:rootNodeId": "node1",
                                    "nodeById": {
                                        "node1": {"@root": true},
                                        "node2": {},
                                        "node3": {"@otu": "otu1"},
                                        "node4": {"@otu": "otu2"},
                                        "node5": {},
                                        "node6": {"@otu": "otu3"},
                                        "node7": {"@otu": "otu4"}
                                    },
                                    "edgeBySourceId": {
                                        "node1": {
                                            "edge1": {"@source": "node1", "@target": "node2", "@length": 0.1},
                                            "edge4": {"@source": "node1", "@target": "node5", "@length": 0.2}
                                        },
                                        "node2": {
                                            "edge2": {"@source": "node2", "@target": "node3", "@length": 1.0},
                                            "edge3": {"@source": "node2", "@target": "node4", "@length": 1.5}
                                        },
                                        "node5": {
                                            "edge5": {"@source": "node5", "@target": "node6"},
                                            "edge6": {"@source": "node5", "@target": "node7"}
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            },
            "sha": "abc123"
        })
    }
}
