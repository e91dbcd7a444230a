//! Phylogenetic data structures and the file formats they travel in.

pub mod fasta;
pub mod newick;
pub mod nexson;
pub mod nexus;
pub mod tree;

pub use tree::{Node, NodeIndex, Tree};
