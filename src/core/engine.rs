use crate::domain::model::ScrapeReport;
use crate::domain::ports::Pipeline;
use crate::utils::error::Result;
use crate::utils::monitor::SystemMonitor;

/// Drives a [Pipeline] through extract, transform and load.
pub struct ScrapeEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> ScrapeEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    pub async fn run(&self) -> Result<ScrapeReport> {
        tracing::info!("🚀 Starting scrape run");
        self.monitor.log_stats("Start");

        // Extract
        tracing::info!("📥 Fetching study tree and alignment...");
        let study = self.pipeline.extract().await?;
        tracing::info!(
            "📥 Study {} tree {}: {} tips, {} character matrices",
            study.study_id,
            study.tree_id,
            study.tree.num_leaves(),
            study.dataset.char_matrices.len()
        );
        self.monitor.log_stats("Extract");

        // Transform
        tracing::info!("🔄 Building dataset and adding new sequences...");
        let outcome = self.pipeline.transform(study).await?;
        tracing::info!(
            "🔄 {} original taxa, {} new sequences",
            outcome.original_taxa,
            outcome.new_sequences
        );
        self.monitor.log_stats("Transform");

        // Load
        tracing::info!("💾 Writing updated tree...");
        let report = self.pipeline.load(outcome).await?;
        tracing::info!("💾 Updated tree saved to: {}", report.updated_export);
        self.monitor.log_stats("Load");

        self.monitor.log_final_stats();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::att::AlignTreeTax;
    use crate::domain::model::{DataSet, ScrapeOutcome, StudyData};
    use crate::phylo::newick;
    use crate::phylo::nexson::{fixtures, NexsonDocument};
    use crate::utils::error::ScrapeError;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingPipeline {
        phases: AtomicUsize,
        fail_transform: bool,
    }

    impl RecordingPipeline {
        fn new(fail_transform: bool) -> Self {
            Self {
                phases: AtomicUsize::new(0),
                fail_transform,
            }
        }
    }

    #[async_trait::async_trait]
    impl Pipeline for RecordingPipeline {
        async fn extract(&self) -> Result<StudyData> {
            self.phases.fetch_add(1, Ordering::SeqCst);
            let nexml = NexsonDocument::from_json(fixtures::study_json())?.nexml;
            Ok(StudyData {
                study_id: "ot_350".to_string(),
                tree_id: "Tr53297".to_string(),
                tree: newick::parse("(a,b);")?,
                nexml,
                dataset: DataSet::default(),
            })
        }

        async fn transform(&self, _data: StudyData) -> Result<ScrapeOutcome> {
            self.phases.fetch_add(1, Ordering::SeqCst);
            if self.fail_transform {
                return Err(ScrapeError::processing("no matrix"));
            }
            Ok(ScrapeOutcome {
                data: AlignTreeTax {
                    tree: newick::parse("(a,b);")?,
                    aln: BTreeMap::new(),
                    otu_dict: BTreeMap::new(),
                    tag: "t".to_string(),
                },
                original_export: "t_original".to_string(),
                original_taxa: 2,
                new_sequences: 0,
            })
        }

        async fn load(&self, outcome: ScrapeOutcome) -> Result<ScrapeReport> {
            self.phases.fetch_add(1, Ordering::SeqCst);
            Ok(ScrapeReport {
                original_export: outcome.original_export,
                updated_export: "t_updated_norepeats".to_string(),
                checkpoint: "att_checkpoint.json".to_string(),
                original_taxa: outcome.original_taxa,
                final_taxa: outcome.data.len(),
            })
        }
    }

    #[tokio::test]
    async fn test_runs_all_phases() {
        let engine = ScrapeEngine::new(RecordingPipeline::new(false));
        let report = engine.run().await.unwrap();

        assert_eq!(engine.pipeline.phases.load(Ordering::SeqCst), 3);
        assert_eq!(report.updated_export, "t_updated_norepeats");
    }

    #[test]
    fn test_stops_at_first_error() {
        let engine = ScrapeEngine::new_with_monitoring(RecordingPipeline::new(true), true);
        let result = tokio_test::block_on(engine.run());

        assert!(matches!(result, Err(ScrapeError::ProcessingError { .. })));
        assert_eq!(engine.pipeline.phases.load(Ordering::SeqCst), 2);
    }
}
