//! Models module.
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

pub mod factorization;

/// The family of model to train.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum ModelKind {
    /// Pairwise learning to rank: observed items should outscore sampled ones.
    Pairwise,
    /// Pointwise classification of observed vs sampled items.
    Pointwise,
}

impl FromStr for ModelKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pairwise" => Ok(ModelKind::Pairwise),
            "pointwise" => Ok(ModelKind::Pointwise),
            other => Err(ConfigError::UnknownModel(other.to_owned())),
        }
    }
}

impl TryFrom<String> for ModelKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelKind> for String {
    fn from(kind: ModelKind) -> String {
        kind.to_string()
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ModelKind::Pairwise => write!(f, "pairwise"),
            ModelKind::Pointwise => write!(f, "pointwise"),
        }
    }
}

/// The loss used for training pairwise models.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Loss {
    /// Bayesian Personalised Ranking.
    BPR,
    /// Pairwise hinge loss.
    Hinge,
}

/// Optimizer used to train the model.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Optimizer {
    /// Plain gradient descent.
    SGD,
    /// Adagrad.
    Adagrad,
}

/// How the batch correlation between margin and attribute is penalized.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CorrelationPenalty {
    /// `weight * corr`: pushes margins towards items low on the attribute.
    Signed,
    /// `weight * |corr|`: pushes the correlation towards zero from either side.
    Absolute,
}

/// Item attribute that the fairness regularizer decorrelates from the
/// ranking margin.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProtectedAttribute {
    /// Number of training interactions of the positive item.
    Popularity,
    /// Minority-provider share of the positive item.
    MinorityShare,
}
