use crate::domain::model::{
    BlastHit, DataSet, QuerySequence, ScrapeOutcome, ScrapeReport, StudyData,
};
use crate::phylo::nexson::NexsonDocument;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Working-directory storage. Paths are relative to the storage root.
pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
    /// Location of `path` as seen by external programs.
    fn resolve(&self, path: &str) -> PathBuf;
}

/// Source of study descriptions (Open Tree phylesystem).
#[async_trait]
pub trait StudyRepository: Send + Sync {
    async fn get_nexson(&self, study_id: &str) -> Result<NexsonDocument>;
}

/// Source of character matrices deposited with a study (TreeBASE).
#[async_trait]
pub trait MatrixRepository: Send + Sync {
    async fn get_dataset(&self, deposit_url: &str) -> Result<DataSet>;
}

/// Similarity search for one query sequence (NCBI BLAST).
#[async_trait]
pub trait SequenceSearch: Send + Sync {
    async fn search(&self, query: &QuerySequence) -> Result<Vec<BlastHit>>;
}

/// Adds unaligned sequences to an existing alignment, keeping its columns.
#[async_trait]
pub trait Aligner: Send + Sync {
    /// Returns the merged alignment as FASTA text.
    async fn add_to_alignment(&self, alignment: &Path, queries: &Path) -> Result<String>;
}

pub struct TreeSearchRequest<'a> {
    pub alignment: &'a Path,
    pub starting_tree: &'a Path,
    /// The starting tree lacks some taxa and can only constrain the search.
    pub partial_starting_tree: bool,
    pub workdir: &'a Path,
    pub run_name: &'a str,
}

/// Maximum-likelihood tree inference.
#[async_trait]
pub trait TreeEstimator: Send + Sync {
    /// Returns the best tree in Newick format.
    async fn estimate(&self, request: TreeSearchRequest<'_>) -> Result<String>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<StudyData>;
    async fn transform(&self, data: StudyData) -> Result<ScrapeOutcome>;
    async fn load(&self, outcome: ScrapeOutcome) -> Result<ScrapeReport>;
}
