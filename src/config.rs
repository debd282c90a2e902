//! Experiment configuration.
//!
//! A run is fully described by an [`ExperimentConfig`], usually read from a
//! JSON file. Every field has a default, so a file only needs to list what
//! differs.
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::data::SplitParameters;
use crate::models::factorization::Hyperparameters;
use crate::models::CorrelationPenalty;
use crate::rerank::{Partition, XQuadParameters};
use crate::upsampling::UpsamplingMode;
use crate::ConfigError;

/// Upsampling applied to the training set before fitting.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpsamplingConfig {
    /// How duplicates are distributed.
    pub mode: UpsamplingMode,
    /// Minority proportion to reach, in `(0, 1)`.
    pub target: f32,
}

impl Default for UpsamplingConfig {
    fn default() -> Self {
        UpsamplingConfig {
            mode: UpsamplingMode::None,
            target: 0.3,
        }
    }
}

/// Re-ranking applied to the model's rankings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RerankConfig {
    /// xQuad parameters.
    pub xquad: XQuadParameters,
    /// Item partition to diversify over.
    pub partition: Partition,
    /// For the popularity partition, the share of interactions covered by
    /// head items.
    pub head_fraction: f32,
}

impl Default for RerankConfig {
    fn default() -> Self {
        RerankConfig {
            xquad: XQuadParameters::default(),
            partition: Partition::ProviderGroup,
            head_fraction: 0.2,
        }
    }
}

/// Everything needed to run one experiment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Dataset name, used in artifact keys.
    pub dataset: String,
    /// Interaction CSV.
    pub interactions_path: PathBuf,
    /// Provider table CSV. Without it every item counts as minority.
    pub providers_path: Option<PathBuf>,
    /// Where artifacts are written.
    pub output_dir: PathBuf,
    /// Train/test split.
    pub split: SplitParameters,
    /// Evaluation cutoffs.
    pub cutoffs: Vec<usize>,
    /// Model hyperparameters.
    pub model: Hyperparameters,
    /// Training-set upsampling.
    pub upsampling: UpsamplingConfig,
    /// Optional re-ranking pass.
    pub reranking: Option<RerankConfig>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            dataset: "ml1m".to_owned(),
            interactions_path: PathBuf::from("data/ml1m-events.csv"),
            providers_path: None,
            output_dir: PathBuf::from("artifacts"),
            split: SplitParameters::default(),
            cutoffs: vec![5, 10, 20],
            model: Hyperparameters::default(),
            upsampling: UpsamplingConfig::default(),
            reranking: None,
        }
    }
}

impl ExperimentConfig {
    /// Read and validate a JSON configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, failure::Error> {
        let reader = BufReader::new(File::open(path)?);
        let config: ExperimentConfig = serde_json::from_reader(reader)?;

        config.validate()?;

        Ok(config)
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, failure::Error> {
        let config: ExperimentConfig = serde_json::from_str(json)?;

        config.validate()?;

        Ok(config)
    }

    /// Check every parameter is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "dataset",
                reason: "must not be empty".to_owned(),
            });
        }

        self.split.validate()?;
        self.model.validate()?;

        if self.cutoffs.is_empty()
            || self.cutoffs[0] == 0
            || self.cutoffs.windows(2).any(|pair| pair[0] >= pair[1])
        {
            return Err(ConfigError::InvalidValue {
                name: "cutoffs",
                reason: format!("{:?} must be positive and strictly increasing", self.cutoffs),
            });
        }

        let target = self.upsampling.target;
        if self.upsampling.mode != UpsamplingMode::None && !(target > 0.0 && target < 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "upsampling target",
                reason: format!("{} is not in (0, 1)", target),
            });
        }

        if let Some(reranking) = self.reranking.as_ref() {
            reranking.xquad.validate()?;

            let head_fraction = reranking.head_fraction;
            if !(head_fraction > 0.0 && head_fraction < 1.0) {
                return Err(ConfigError::InvalidValue {
                    name: "head_fraction",
                    reason: format!("{} is not in (0, 1)", head_fraction),
                });
            }
        }

        Ok(())
    }

    /// Identifies the trained model: its kind plus any treatment.
    pub fn model_identifier(&self) -> String {
        let mut identifier = self.model.model_kind().to_string();

        if self.upsampling.mode != UpsamplingMode::None {
            identifier.push_str(&format!("_up-{}-{:.2}", self.upsampling.mode, self.upsampling.target));
        }

        let weight = self.model.get_regularization_weight();
        if weight > 0.0 {
            identifier.push_str(&format!("_reg-{:?}-{:.2}", self.model.get_protected_attribute(), weight).to_lowercase());

            if self.model.get_correlation_penalty() == CorrelationPenalty::Absolute {
                identifier.push_str("-abs");
            }
        }

        identifier
    }

    /// Key of the artifacts of this run: `dataset-split-model`.
    pub fn artifact_key(&self) -> String {
        format!("{}-{}-{}", self.dataset, self.split.mode(), self.model_identifier())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SplitMode;
    use crate::models::ModelKind;

    #[test]
    fn defaults_are_valid() {
        let config = ExperimentConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.artifact_key(), "ml1m-time_user-pairwise");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ExperimentConfig::from_json(
            r#"{
                "dataset": "toy",
                "split": {"mode": "urandom", "train_ratio": 0.5},
                "cutoffs": [1, 2],
                "model": {"kind": "pointwise", "latent_dim": 4, "regularization_weight": 0.5},
                "upsampling": {"mode": "fake", "target": 0.3}
            }"#,
        )
        .unwrap();

        assert_eq!(config.split.mode(), SplitMode::RandomUser);
        assert_eq!(config.model.model_kind(), ModelKind::Pointwise);
        assert_eq!(config.upsampling.mode, UpsamplingMode::Synthetic);
        assert_eq!(config.output_dir, PathBuf::from("artifacts"));
        assert!(config.reranking.is_none());

        assert_eq!(
            config.artifact_key(),
            "toy-random_user-pointwise_up-synthetic-0.30_reg-popularity-0.50"
        );

        let config = ExperimentConfig::from_json(
            r#"{"model": {"regularization_weight": 0.25, "correlation_penalty": "Absolute"}}"#,
        )
        .unwrap();

        assert_eq!(config.model.get_correlation_penalty(), CorrelationPenalty::Absolute);
        assert_eq!(config.artifact_key(), "ml1m-time_user-pairwise_reg-popularity-0.25-abs");
    }

    #[test]
    fn round_trips_through_json() {
        let mut config = ExperimentConfig::default();
        config.reranking = Some(RerankConfig::default());

        let json = serde_json::to_string(&config).unwrap();

        assert_eq!(ExperimentConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn unknown_names_are_rejected() {
        let error = ExperimentConfig::from_json(r#"{"split": {"mode": "weekly"}}"#).unwrap_err();
        assert!(error.to_string().contains("Unknown split mode"));

        let error = ExperimentConfig::from_json(r#"{"model": {"kind": "mostpop"}}"#).unwrap_err();
        assert!(error.to_string().contains("Unknown model type"));

        let error = ExperimentConfig::from_json(r#"{"upsampling": {"mode": "smote"}}"#).unwrap_err();
        assert!(error.to_string().contains("Unknown upsampling mode"));
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let mut config = ExperimentConfig::default();
        config.cutoffs = vec![10, 5];
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.upsampling = UpsamplingConfig {
            mode: UpsamplingMode::TrueRatio,
            target: 1.2,
        };
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.reranking = Some(RerankConfig {
            xquad: XQuadParameters::new().lambda(-0.1),
            ..RerankConfig::default()
        });
        assert!(config.validate().is_err());

        let error = ExperimentConfig::from_json(r#"{"model": {"learning_rate": 0.0}}"#).unwrap_err();
        match error.downcast_ref::<ConfigError>() {
            Some(ConfigError::InvalidValue { name, .. }) => assert_eq!(*name, "learning_rate"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
