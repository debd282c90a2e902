//! End-to-end experiment runs.
//!
//! A run splits the data, optionally upsamples the training set, fits the
//! configured model, evaluates its relevance matrix and, when configured,
//! evaluates the xQuad re-ranked lists as well.
use ndarray::Array2;

use crate::config::ExperimentConfig;
use crate::data::{self, Split};
use crate::datasets::{self, Dataset};
use crate::evaluation::{Evaluator, MetricsBag, Rankings};
use crate::groups::{self, GroupRepresentation, ItemGroup, ProviderShare};
use crate::models::ProtectedAttribute;
use crate::persistence::ArtifactStore;
use crate::rerank::{self, Partition};
use crate::upsampling::{self, UpsamplingMode, UpsamplingReport};
use crate::RankingModel;

/// Everything a run produced.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Artifact key of the run.
    pub key: String,
    /// The train/test split, before upsampling.
    pub split: Split,
    /// What upsampling did, if it ran.
    pub upsampling: Option<UpsamplingReport>,
    /// Final training loss.
    pub loss: f32,
    /// The model's relevance matrix.
    pub relevance: Array2<f32>,
    /// Metrics of the model's own rankings.
    pub metrics: MetricsBag,
    /// Metrics after re-ranking, if configured.
    pub reranked_metrics: Option<MetricsBag>,
}

impl RunReport {
    /// Key of the re-ranked metrics artifact.
    pub fn reranked_key(&self) -> String {
        format!("{}_xquad", self.key)
    }
}

fn log_metrics(label: &str, metrics: &MetricsBag) {
    for (metric, by_cutoff) in metrics.summary() {
        for (cutoff, value) in by_cutoff {
            info!("{} {}@{}: {:.4}", label, metric, cutoff, value);
        }
    }
}

/// Run an experiment on in-memory data.
pub fn run_dataset(
    config: &ExperimentConfig,
    dataset: &Dataset,
    providers: &[ProviderShare],
) -> Result<RunReport, failure::Error> {
    config.validate()?;

    let representation = GroupRepresentation::estimate(providers, &dataset.items)?;
    let split = data::split(&dataset.interactions, &config.split)?;

    let (train, upsampling) = match config.upsampling.mode {
        UpsamplingMode::None => (split.train.clone(), None),
        mode => {
            let (train, report) =
                upsampling::upsample(&split.train, &representation, config.upsampling.target, mode)?;
            info!(
                "Upsampling ({}): {} rows added, minority proportion {:.4} -> {:.4}",
                mode, report.added_rows, report.original_proportion, report.proportion
            );
            (train, Some(report))
        }
    };

    let mut model = config.model.clone().build();

    if config.model.get_protected_attribute() == ProtectedAttribute::MinorityShare {
        model.set_protected_attribute(representation.minority_shares().to_vec());
    }

    let loss = model.fit(&train)?;
    let relevance = model.predict()?.clone();

    let evaluator = Evaluator::new(&split.train, &split.test, config.cutoffs.clone())
        .with_groups(representation.assignment());
    let metrics = model.test(&evaluator)?.clone();

    log_metrics("model", &metrics);

    let reranked_metrics = match config.reranking.as_ref() {
        None => None,
        Some(reranking) => {
            let categories: Vec<ItemGroup> = match reranking.partition {
                Partition::ProviderGroup => representation.assignment(),
                Partition::Popularity => {
                    groups::head_tail_partition(&split.train.item_popularity(), reranking.head_fraction)
                }
            };

            let max_cutoff = evaluator.cutoffs()?.last().cloned().unwrap_or(0);
            let depth = reranking.xquad.get_rmax().max(max_cutoff);

            let rankings = Rankings::from_scores(&relevance, &split.train, depth)?;
            let reranked = rerank::rerank(&rankings, &categories, &split.train, &reranking.xquad)?;
            let metrics = evaluator.evaluate_rankings(&reranked)?;

            log_metrics("xquad", &metrics);

            Some(metrics)
        }
    };

    Ok(RunReport {
        key: config.artifact_key(),
        split,
        upsampling,
        loss,
        relevance,
        metrics,
        reranked_metrics,
    })
}

/// Load the configured files, run the experiment and persist its artifacts.
pub fn run(config: &ExperimentConfig) -> Result<RunReport, failure::Error> {
    config.validate()?;

    let dataset = datasets::load_interactions(&config.interactions_path)?;
    let providers = match config.providers_path.as_ref() {
        Some(path) => datasets::load_providers(path)?,
        None => {
            warn!("No provider table configured; every item counts as minority");
            Vec::new()
        }
    };

    let report = run_dataset(config, &dataset, &providers)?;

    let store = ArtifactStore::new(&config.output_dir)?;
    let split_key = format!("{}-{}", config.dataset, config.split.mode());

    store.save_split(&split_key, &report.split, &dataset.users, &dataset.items)?;
    store.save_relevance(&report.key, &report.relevance)?;
    store.save_metrics(&report.key, &report.metrics)?;

    if let Some(metrics) = report.reranked_metrics.as_ref() {
        store.save_metrics(&report.reranked_key(), metrics)?;
    }

    info!("Stored artifacts of {} in {}", report.key, config.output_dir.display());

    Ok(report)
}
