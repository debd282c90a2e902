#![warn(missing_docs)]
//! # fairrec
//!
//! `fairrec` trains implicit-feedback recommenders and measures how fairly
//! they treat item providers. It bundles three mitigation treatments for
//! provider-group bias:
//!
//! - preprocessing: [upsampling](upsampling/index.html) of interactions with
//!   minority-group items,
//! - in-processing: a regularizer that penalises correlation between the
//!   pairwise ranking margin and a protected item attribute,
//! - postprocessing: [xQuad re-ranking](rerank/index.html).
//!
//! ## Example
//! Train a pairwise model on a toy dataset and evaluate it:
//!
//! ```rust
//! # extern crate fairrec;
//! use fairrec::data::{split, Interaction, Interactions, SplitMode, SplitParameters};
//! use fairrec::evaluation::Evaluator;
//! use fairrec::models::factorization::Hyperparameters;
//! use fairrec::RankingModel;
//!
//! let mut rows = Vec::new();
//! for user in 0..10 {
//!     for item in 0..8 {
//!         if (user + item) % 3 != 0 {
//!             rows.push(Interaction::new(user, item, 1.0, user * 10 + item));
//!         }
//!     }
//! }
//! let data = Interactions::from(rows);
//!
//! let params = SplitParameters::new(SplitMode::TimeUser).train_ratio(0.8);
//! let split = split(&data, &params).unwrap();
//!
//! let mut model = Hyperparameters::new()
//!     .embedding_dim(8)
//!     .num_epochs(5)
//!     .seed(42)
//!     .build();
//!
//! let loss = model.fit(&split.train).unwrap();
//! model.predict().unwrap();
//!
//! let evaluator = Evaluator::new(&split.train, &split.test, vec![1, 5]);
//! let metrics = model.test(&evaluator).unwrap();
//!
//! println!("loss {} ndcg@5 {}", loss, metrics.mean("ndcg", 5).unwrap());
//! ```
#[macro_use]
extern crate serde_derive;

#[macro_use]
extern crate itertools;

#[macro_use]
extern crate failure;

#[macro_use]
extern crate log;

extern crate csv;
extern crate ndarray;
extern crate rand;
extern crate rand_distr;
extern crate rand_xorshift;
extern crate rayon;
extern crate serde;
extern crate serde_json;
extern crate siphasher;

pub mod config;
pub mod data;
pub mod datasets;
pub mod evaluation;
pub mod groups;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod rerank;
pub mod upsampling;

use ndarray::Array2;

use evaluation::{Evaluator, MetricsBag};

/// Alias for user indices.
pub type UserId = usize;
/// Alias for item indices.
pub type ItemId = usize;
/// Alias for timestamps.
pub type Timestamp = usize;
/// Alias for the ids used in raw dataset files, before remapping.
pub type RawId = u64;

/// Prediction error types.
#[derive(Debug, Fail)]
pub enum PredictionError {
    /// Failed prediction due to numerical issues.
    #[fail(display = "Invalid prediction value: non-finite or not a number.")]
    InvalidPredictionValue,
    /// The user was not part of the training data.
    #[fail(display = "User {} is out of range for a model with {} users.", _0, _1)]
    UnknownUser(UserId, usize),
    /// The item was not part of the training data.
    #[fail(display = "Item {} is out of range for a model with {} items.", _0, _1)]
    UnknownItem(ItemId, usize),
}

/// Fitting error types.
#[derive(Debug, Fail)]
pub enum FittingError {
    /// No interactions were given.
    #[fail(display = "No interactions were supplied.")]
    NoInteractions,
    /// An interaction references an id outside the declared shape.
    #[fail(
        display = "Interaction ({}, {}) is out of range for shape ({}, {}).",
        user_id, item_id, num_users, num_items
    )]
    OutOfRange {
        /// Offending user id.
        user_id: UserId,
        /// Offending item id.
        item_id: ItemId,
        /// Number of users in the dataset.
        num_users: usize,
        /// Number of items in the dataset.
        num_items: usize,
    },
    /// Regularization needs per-item attribute values that were not supplied.
    #[fail(display = "Regularization requires a protected attribute value for each of {} items.", _0)]
    MissingProtectedAttribute(usize),
    /// Training diverged: the loss or the parameters became non-finite.
    #[fail(display = "Non-finite loss or parameters in epoch {}.", epoch)]
    NumericalInstability {
        /// Epoch in which the problem was detected.
        epoch: usize,
    },
    /// Inputs supplied alongside the interactions are inconsistent with them.
    #[fail(display = "Invalid training input: {}", _0)]
    InvalidData(#[cause] DataError),
}

impl From<DataError> for FittingError {
    fn from(error: DataError) -> Self {
        FittingError::InvalidData(error)
    }
}

/// Errors caused by malformed or inconsistent input data.
#[derive(Debug, Fail)]
pub enum DataError {
    /// The provider table lists the same item twice.
    #[fail(display = "Item {} appears more than once in the provider table.", _0)]
    DuplicateItem(RawId),
    /// Two inputs disagree on their dimensions.
    #[fail(display = "Shape mismatch: expected {:?}, got {:?}.", expected, actual)]
    ShapeMismatch {
        /// The expected `(rows, columns)`.
        expected: (usize, usize),
        /// The shape that was supplied.
        actual: (usize, usize),
    },
    /// The persisted split contains a `set` value other than train/test.
    #[fail(display = "Unknown split set label: {}.", _0)]
    UnknownSetLabel(String),
}

/// Errors in the experiment configuration.
#[derive(Debug, Fail)]
pub enum ConfigError {
    /// Unrecognised split mode name.
    #[fail(display = "Unknown split mode: {}.", _0)]
    UnknownSplitMode(String),
    /// Unrecognised model name.
    #[fail(display = "Unknown model type: {}.", _0)]
    UnknownModel(String),
    /// Unrecognised upsampling mode name.
    #[fail(display = "Unknown upsampling mode: {}.", _0)]
    UnknownUpsamplingMode(String),
    /// A metric was requested at a cutoff that was not computed.
    #[fail(display = "Cutoff {} is not among the evaluated cutoffs.", _0)]
    UnknownCutoff(usize),
    /// A metric name that the bag does not contain.
    #[fail(display = "Unknown metric: {}.", _0)]
    UnknownMetric(String),
    /// A parameter is outside its admissible range.
    #[fail(display = "Invalid value for {}: {}.", name, reason)]
    InvalidValue {
        /// Parameter name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Operations called in the wrong model lifecycle state.
#[derive(Debug, Fail)]
pub enum StateError {
    /// `predict` before `fit`.
    #[fail(display = "Model must be fitted first.")]
    NotFitted,
    /// `test` or `predictions` before `predict`.
    #[fail(display = "Model must compute predictions first.")]
    NotPredicted,
}

/// Lifecycle of a ranking model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelState {
    /// Parameters not yet created.
    Uninitialized,
    /// Parameters fitted, no predictions yet.
    Trained,
    /// Relevance matrix computed.
    Predicted,
    /// Metrics computed from the relevance matrix.
    Evaluated,
}

/// Trait describing models that are fitted on a batch of interactions
/// and then score every (user, item) pair.
pub trait RankingModel {
    /// Fit the model, returning the final training loss. Any previous
    /// predictions are discarded.
    fn fit(&mut self, interactions: &data::Interactions) -> Result<f32, FittingError>;
    /// Compute the dense `num_users x num_items` relevance matrix.
    fn predict(&mut self) -> Result<&Array2<f32>, failure::Error>;
    /// The relevance matrix computed by the last `predict` call.
    fn predictions(&self) -> Result<&Array2<f32>, StateError>;
    /// Evaluate the current predictions.
    fn test(&mut self, evaluator: &Evaluator) -> Result<&MetricsBag, failure::Error>;
    /// Current lifecycle state.
    fn state(&self) -> ModelState;
}
