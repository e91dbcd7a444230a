use crate::adapters::{
    MafftAligner, NcbiBlastClient, OpenTreeClient, RaxmlEstimator, TreeBaseClient,
};
use crate::app::scraper::{ScrapeTools, Scraper};
use crate::config::scrape_config::ScrapeConfig;
use crate::domain::att::AlignTreeTax;
use crate::domain::ids::IdDicts;
use crate::domain::model::{ScrapeOutcome, ScrapeReport, StudyData};
use crate::domain::ports::{
    Aligner, MatrixRepository, Pipeline, SequenceSearch, Storage, StudyRepository, TreeEstimator,
};
use crate::domain::selection::select_matrix_index;
use crate::phylo::nexson::TipLabel;
use crate::utils::error::{Result, ScrapeError};

/// 檢查點檔名
pub const CHECKPOINT_FILE: &str = "att_checkpoint.json";

/// Remote services and external programs used by the pipeline.
pub struct Collaborators {
    pub studies: Box<dyn StudyRepository>,
    pub matrices: Box<dyn MatrixRepository>,
    pub search: Box<dyn SequenceSearch>,
    pub aligner: Box<dyn Aligner>,
    pub estimator: Box<dyn TreeEstimator>,
}

impl Collaborators {
    /// Public services and locally installed tools as configured.
    pub fn from_config(config: &ScrapeConfig) -> Result<Self> {
        Ok(Self {
            studies: Box::new(OpenTreeClient::new(
                &config.phylesystem.api_base,
                config.phylesystem.timeout_seconds,
            )),
            matrices: Box::new(TreeBaseClient::new(
                &config.treebase.phylows_base,
                config.treebase.timeout_seconds,
            )),
            search: Box::new(NcbiBlastClient::new(config.blast.clone())?),
            aligner: Box::new(MafftAligner::new(&config.tools)),
            estimator: Box::new(RaxmlEstimator::new(&config.tools)),
        })
    }
}

/// Fetches a published tree and alignment, exports them, extends the data
/// with newly found sequences and exports the result.
pub struct DataScrapePipeline<S: Storage> {
    storage: S,
    config: ScrapeConfig,
    collaborators: Collaborators,
}

impl<S: Storage> DataScrapePipeline<S> {
    pub fn new(storage: S, config: ScrapeConfig) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::with_collaborators(storage, config, collaborators))
    }

    pub fn with_collaborators(
        storage: S,
        config: ScrapeConfig,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            storage,
            config,
            collaborators,
        }
    }

    fn original_name(&self) -> String {
        format!("{}_original", self.config.run_tag())
    }

    fn updated_name(&self) -> String {
        format!("{}_updated_norepeats", self.config.run_tag())
    }

    /// Writes the labelled tree as `name` and its alignment as `name.fas`.
    async fn write_labelled(&self, data: &AlignTreeTax, name: &str) -> Result<String> {
        let label = self.config.label_key()?;
        self.storage
            .write_file(name, data.labelled_newick(label, true).as_bytes())
            .await?;
        self.storage
            .write_file(&format!("{}.fas", name), data.labelled_fasta(label, true).as_bytes())
            .await?;

        let path = self.storage.resolve(name).display().to_string();
        tracing::info!("📝 Wrote {} ({} taxa, labels {})", path, data.len(), label);
        Ok(path)
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for DataScrapePipeline<S> {
    async fn extract(&self) -> Result<StudyData> {
        let study_id = &self.config.study.study_id;
        let tree_id = &self.config.study.tree_id;

        let document = self.collaborators.studies.get_nexson(study_id).await?;
        let nexml = document.nexml;

        let tree = nexml.extract_tree(tree_id, TipLabel::OriginalLabel)?;
        tracing::info!(
            "🌳 Tree {} of study {} has {} tips",
            tree_id,
            study_id,
            tree.num_leaves()
        );

        let deposit = nexml.data_deposit_url().ok_or_else(|| {
            ScrapeError::processing(format!("study {} has no data deposit", study_id))
        })?;
        let dataset = self.collaborators.matrices.get_dataset(deposit).await?;

        Ok(StudyData {
            study_id: study_id.clone(),
            tree_id: tree_id.clone(),
            nexml,
            tree,
            dataset,
        })
    }

    async fn transform(&self, data: StudyData) -> Result<ScrapeOutcome> {
        let taxon_count = data.tree.taxon_count();
        let index = select_matrix_index(&data.dataset.char_matrices, taxon_count).ok_or_else(|| {
            ScrapeError::processing(format!("study {} has no character matrix", data.study_id))
        })?;
        let matrix = &data.dataset.char_matrices[index];
        if matrix.len() == taxon_count {
            tracing::info!("🧾 Matrix {} matches the {} taxa of the tree", index, taxon_count);
        } else {
            tracing::warn!(
                "⚠️ No matrix has {} rows; using the first one ({} rows)",
                taxon_count,
                matrix.len()
            );
        }

        let att = AlignTreeTax::from_phylesystem(
            &data.nexml,
            &data.tree_id,
            matrix,
            &self.config.run_tag(),
        )?;
        println!("{} taxa in alignment and tree", att.len());

        let original_taxa = att.len();
        let original_export = self.write_labelled(&att, &self.original_name()).await?;

        let ids = IdDicts::from_optional_path(self.config.taxonomy.ott_ncbi.as_deref())?;
        let tools = ScrapeTools {
            search: self.collaborators.search.as_ref(),
            aligner: self.collaborators.aligner.as_ref(),
            estimator: self.collaborators.estimator.as_ref(),
        };
        let mut scraper = Scraper::new(
            att,
            &self.storage,
            &ids,
            tools,
            &self.config.blast,
            &self.config.filter,
        );
        let new_sequences = scraper.est_full_tree().await?;

        Ok(ScrapeOutcome {
            data: scraper.into_data(),
            original_export,
            original_taxa,
            new_sequences,
        })
    }

    async fn load(&self, outcome: ScrapeOutcome) -> Result<ScrapeReport> {
        let updated_export = self.write_labelled(&outcome.data, &self.updated_name()).await?;

        self.storage
            .write_file(CHECKPOINT_FILE, outcome.data.to_json()?.as_bytes())
            .await?;
        tracing::debug!("Checkpoint written to {}", CHECKPOINT_FILE);

        Ok(ScrapeReport {
            original_export: outcome.original_export,
            updated_export,
            checkpoint: self.storage.resolve(CHECKPOINT_FILE).display().to_string(),
            original_taxa: outcome.original_taxa,
            final_taxa: outcome.data.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::{hit, GraftingEstimator, MockSearch, PaddingAligner};
    use crate::config::cli::LocalStorage;
    use crate::phylo::nexson::fixtures;
    use httpmock::prelude::*;
    use tempfile::TempDir;

    const TREEBASE_NEXUS: &str = "#NEXUS
BEGIN CHARACTERS;
    TITLE partial;
    FORMAT DATATYPE=DNA GAP=- MISSING=?;
    MATRIX
    Garrulax_canorus    ACGTACGTACGTACGTACGT
    Leiothrix_lutea     TCGTACGTACGTACGTACGA
    ;
END;
BEGIN CHARACTERS;
    TITLE cytb;
    FORMAT DATATYPE=DNA GAP=- MISSING=?;
    MATRIX
    Garrulax_canorus       ACGTACGTACGTACGTACGT
    'Garrulax sannio'      ACGTTCGTACGAACGTACCT
    Leiothrix_lutea        TCGTACGTACGTACGTACGA
    Liocichla_omeiensis    ACGAACGTACGTACGAACGT
    ;
END;
";

    fn mock_services(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path("/v3/study/ot_350");
            then.status(200).json_body(fixtures::study_json());
        });
        server.mock(|when, then| {
            when.method(GET).path("/phylows/study/TB2:S13613");
            then.status(200).body(TREEBASE_NEXUS);
        });
    }

    fn config(server: &MockServer, workdir: &std::path::Path) -> ScrapeConfig {
        let mut config = ScrapeConfig::default();
        config.phylesystem.api_base = server.url("/v3");
        config.treebase.phylows_base = server.url("/phylows");
        config.study.workdir = workdir.display().to_string();
        config
    }

    fn pipeline(
        storage: LocalStorage,
        config: ScrapeConfig,
        search: MockSearch,
    ) -> DataScrapePipeline<LocalStorage> {
        let collaborators = Collaborators {
            studies: Box::new(OpenTreeClient::new(&config.phylesystem.api_base, Some(5))),
            matrices: Box::new(TreeBaseClient::new(&config.treebase.phylows_base, Some(5))),
            search: Box::new(search),
            aligner: Box::new(PaddingAligner),
            estimator: Box::new(GraftingEstimator::default()),
        };
        DataScrapePipeline::with_collaborators(storage, config, collaborators)
    }

    #[tokio::test]
    async fn test_extract_selects_study_tree_and_matrices() {
        let server = MockServer::start();
        mock_services(&server);
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline(
            LocalStorage::new(temp_dir.path()),
            config(&server, temp_dir.path()),
            MockSearch::default(),
        );

        let data = pipeline.extract().await.unwrap();

        assert_eq!(data.tree.taxon_count(), 4);
        assert_eq!(data.dataset.char_matrices.len(), 2);
        assert_eq!(
            select_matrix_index(&data.dataset.char_matrices, data.tree.taxon_count()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_full_run_writes_both_exports() {
        let server = MockServer::start();
        mock_services(&server);
        let temp_dir = TempDir::new().unwrap();
        let search = MockSearch::with_hits(
            "otu3",
            vec![hit("KY0001", 9300, "Leiothrix argentauris", 1e-80, "TCGTACGTACCTACGTACGA")],
        );
        let storage = LocalStorage::new(temp_dir.path());
        let pipeline = pipeline(storage.clone(), config(&server, temp_dir.path()), search);

        let data = pipeline.extract().await.unwrap();
        let outcome = pipeline.transform(data).await.unwrap();
        assert_eq!(outcome.original_taxa, 4);
        assert_eq!(outcome.new_sequences, 1);

        let report = pipeline.load(outcome).await.unwrap();
        assert_eq!(report.final_taxa, 5);

        assert!(storage.exists("ot_350Tr53297_original").await);
        assert!(storage.exists("ot_350Tr53297_original.fas").await);
        assert!(storage.exists("ot_350Tr53297_updated_norepeats").await);
        assert!(storage.exists(CHECKPOINT_FILE).await);

        let original =
            String::from_utf8(storage.read_file("ot_350Tr53297_original").await.unwrap()).unwrap();
        assert!(original.contains("'Garrulax canorus'"));
        assert!(original.contains("'Liocichla omeiensis'"));

        let updated = String::from_utf8(
            storage
                .read_file("ot_350Tr53297_updated_norepeats")
                .await
                .unwrap(),
        )
        .unwrap();
        assert!(updated.contains("'Leiothrix argentauris'"));

        let checkpoint =
            String::from_utf8(storage.read_file(CHECKPOINT_FILE).await.unwrap()).unwrap();
        let restored = AlignTreeTax::from_json(&checkpoint).unwrap();
        assert_eq!(restored.len(), 5);
    }

    #[tokio::test]
    async fn test_study_without_matrices_fails() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/v3/study/ot_350");
            then.status(200).json_body(fixtures::study_json());
        });
        server.mock(|when, then| {
            when.method(GET).path("/phylows/study/TB2:S13613");
            then.status(200).body("#NEXUS\nBEGIN TREES;\nTREE t = (A,B);\nEND;\n");
        });
        let temp_dir = TempDir::new().unwrap();
        let pipeline = pipeline(
            LocalStorage::new(temp_dir.path()),
            config(&server, temp_dir.path()),
            MockSearch::default(),
        );

        let data = pipeline.extract().await.unwrap();
        let err = pipeline.transform(data).await.unwrap_err();
        assert!(matches!(err, ScrapeError::ProcessingError { .. }));
    }
}
