//! Implicit matrix factorization trained on sampled negatives.
//!
//! Every user and item gets a `latent_dim`-dimensional embedding and the
//! score of a (user, item) pair is the dot product of the two. Each epoch,
//! every observed (user, positive) pair is matched with `num_negatives`
//! items the user has never interacted with, and the embeddings are updated
//! by minibatch gradient descent on either
//!
//! - a pairwise loss on the margin `s(u, i+) - s(u, i-)` (BPR or hinge), or
//! - a pointwise logistic loss labelling positives 1 and negatives 0.
//!
//! With a positive `regularization_weight` the loss of every minibatch also
//! contains
//! ```text
//! regularization_weight * corr(margin, attribute(i+))
//! ```
//! where the correlation runs over the triplets of the minibatch and the
//! attribute is the positive item's popularity or its minority-provider
//! share. `CorrelationPenalty::Absolute` penalizes `|corr|` instead, which
//! only removes the dependence on the attribute without reversing it.
use std::collections::{BTreeMap, HashSet};

use ndarray::{Array1, Array2, ArrayViewMut1};
use rand::distributions::{Distribution, Uniform};
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_xorshift::XorShiftRng;

use super::{CorrelationPenalty, Loss, ModelKind, Optimizer, ProtectedAttribute};
use crate::data::{CompressedInteractions, Interactions, TripletInteractions, TripletMinibatch};
use crate::evaluation::{Evaluator, MetricsBag};
use crate::{
    ConfigError, DataError, FittingError, ItemId, ModelState, PredictionError, RankingModel,
    StateError, UserId,
};

const ADAGRAD_EPSILON: f32 = 1e-8;
const MIN_IMPROVEMENT: f32 = 1e-6;
// Validation negatives are drawn from their own stream so that every epoch
// is scored against the same sample.
const VALIDATION_SEED_OFFSET: u64 = 0x5eed;

fn embedding_init<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f32> {
    let scale = 1.0 / cols as f32;
    Array2::from_shape_fn((rows, cols), |_| rng.sample::<f32, _>(StandardNormal) * scale)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn softplus(x: f32) -> f32 {
    if x > 20.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

/// Hyperparameters describing the factorization model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Hyperparameters {
    kind: ModelKind,
    latent_dim: usize,
    minibatch_size: usize,
    learning_rate: f32,
    l2_penalty: f32,
    num_epochs: usize,
    num_negatives: usize,
    loss: Loss,
    optimizer: Optimizer,
    regularization_weight: f32,
    correlation_penalty: CorrelationPenalty,
    protected_attribute: ProtectedAttribute,
    validation_fraction: f32,
    patience: Option<usize>,
    seed: u64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters::new()
    }
}

impl Hyperparameters {
    /// Build new hyperparameters.
    pub fn new() -> Self {
        Hyperparameters {
            kind: ModelKind::Pairwise,
            latent_dim: 16,
            minibatch_size: 64,
            learning_rate: 0.05,
            l2_penalty: 0.0,
            num_epochs: 10,
            num_negatives: 1,
            loss: Loss::BPR,
            optimizer: Optimizer::Adagrad,
            regularization_weight: 0.0,
            correlation_penalty: CorrelationPenalty::Signed,
            protected_attribute: ProtectedAttribute::Popularity,
            validation_fraction: 0.0,
            patience: None,
            seed: 42,
        }
    }

    /// Set the model family.
    pub fn kind(mut self, kind: ModelKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the embedding dimensionality.
    pub fn embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.latent_dim = embedding_dim;
        self
    }

    /// Set the minibatch size.
    pub fn minibatch_size(mut self, minibatch_size: usize) -> Self {
        self.minibatch_size = minibatch_size;
        self
    }

    /// Set the learning rate.
    pub fn learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the L2 penalty.
    pub fn l2_penalty(mut self, l2_penalty: f32) -> Self {
        self.l2_penalty = l2_penalty;
        self
    }

    /// Set the number of epochs to run per each `fit` call.
    pub fn num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set the number of negatives sampled per positive.
    pub fn num_negatives(mut self, num_negatives: usize) -> Self {
        self.num_negatives = num_negatives;
        self
    }

    /// Set the pairwise loss function.
    pub fn loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    /// Set the optimizer type.
    pub fn optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Set the weight of the correlation regularizer. Zero disables it.
    pub fn regularization_weight(mut self, regularization_weight: f32) -> Self {
        self.regularization_weight = regularization_weight;
        self
    }

    /// Set whether the regularizer penalizes the signed or the absolute
    /// correlation.
    pub fn correlation_penalty(mut self, correlation_penalty: CorrelationPenalty) -> Self {
        self.correlation_penalty = correlation_penalty;
        self
    }

    /// Set the attribute the regularizer decorrelates from the margin.
    pub fn protected_attribute(mut self, protected_attribute: ProtectedAttribute) -> Self {
        self.protected_attribute = protected_attribute;
        self
    }

    /// Hold out this fraction of the training interactions to compute a
    /// validation loss after every epoch.
    pub fn validation_fraction(mut self, validation_fraction: f32) -> Self {
        self.validation_fraction = validation_fraction;
        self
    }

    /// Stop once the validation loss has not improved for `patience` epochs.
    pub fn early_stopping(mut self, patience: usize) -> Self {
        self.patience = Some(patience);
        self
    }

    /// Set the random seed used for initialization and sampling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The model family.
    pub fn model_kind(&self) -> ModelKind {
        self.kind
    }

    /// The weight of the correlation regularizer.
    pub fn get_regularization_weight(&self) -> f32 {
        self.regularization_weight
    }

    /// How the regularizer penalizes the correlation.
    pub fn get_correlation_penalty(&self) -> CorrelationPenalty {
        self.correlation_penalty
    }

    /// The attribute the regularizer decorrelates from the margin.
    pub fn get_protected_attribute(&self) -> ProtectedAttribute {
        self.protected_attribute
    }

    /// Check the hyperparameters are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name, reason: &str| {
            Err(ConfigError::InvalidValue {
                name,
                reason: reason.to_owned(),
            })
        };

        if self.latent_dim == 0 {
            return invalid("latent_dim", "must be positive");
        }
        if self.minibatch_size == 0 {
            return invalid("minibatch_size", "must be positive");
        }
        if !(self.learning_rate > 0.0) {
            return invalid("learning_rate", "must be positive");
        }
        if self.l2_penalty < 0.0 {
            return invalid("l2_penalty", "must not be negative");
        }
        if !(self.regularization_weight >= 0.0) {
            return invalid("regularization_weight", "must not be negative");
        }
        if !(self.validation_fraction >= 0.0 && self.validation_fraction < 1.0) {
            return invalid("validation_fraction", "must be in [0, 1)");
        }

        Ok(())
    }

    /// Build an untrained model.
    pub fn build(self) -> ImplicitFactorizationModel {
        ImplicitFactorizationModel::new(self)
    }
}

#[derive(Clone, Debug)]
struct Parameters {
    user_embedding: Array2<f32>,
    item_embedding: Array2<f32>,
    user_accumulator: Array2<f32>,
    item_accumulator: Array2<f32>,
}

impl Parameters {
    fn new<R: Rng>(num_users: usize, num_items: usize, latent_dim: usize, rng: &mut R) -> Self {
        Parameters {
            user_embedding: embedding_init(num_users, latent_dim, rng),
            item_embedding: embedding_init(num_items, latent_dim, rng),
            user_accumulator: Array2::zeros((num_users, latent_dim)),
            item_accumulator: Array2::zeros((num_items, latent_dim)),
        }
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.user_embedding.nrows(),
            self.item_embedding.nrows(),
            self.user_embedding.ncols(),
        )
    }

    fn score(&self, user_id: UserId, item_id: ItemId) -> f32 {
        self.user_embedding
            .row(user_id)
            .dot(&self.item_embedding.row(item_id))
    }

    fn is_finite(&self) -> bool {
        self.user_embedding.iter().all(|x| x.is_finite())
            && self.item_embedding.iter().all(|x| x.is_finite())
    }
}

/// Draws negatives uniformly from the items a user has not interacted with.
struct NegativeSampler {
    seen: Vec<HashSet<ItemId>>,
    item_range: Uniform<usize>,
    num_items: usize,
}

impl NegativeSampler {
    fn new(interactions: &CompressedInteractions) -> Self {
        let seen = interactions
            .iter_users()
            .map(|user| user.item_ids.iter().cloned().collect())
            .collect();

        NegativeSampler {
            seen,
            item_range: Uniform::new(0, interactions.num_items()),
            num_items: interactions.num_items(),
        }
    }

    /// Fill `negatives` with up to `num_negatives` distinct unseen items.
    fn sample<R: Rng>(
        &self,
        user_id: UserId,
        num_negatives: usize,
        rng: &mut R,
        negatives: &mut Vec<ItemId>,
    ) {
        let seen = &self.seen[user_id];
        let available = self.num_items - seen.len();
        let num_negatives = num_negatives.min(available);

        negatives.clear();

        while negatives.len() < num_negatives {
            let candidate = self.item_range.sample(rng);

            if !seen.contains(&candidate) && !negatives.contains(&candidate) {
                negatives.push(candidate);
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Triplet {
    user_id: UserId,
    positive: ItemId,
    negative: ItemId,
    // Pointwise losses count each positive once across its negatives.
    positive_weight: f32,
}

#[derive(Debug, Default)]
struct BatchGradients {
    loss: f32,
    users: BTreeMap<UserId, Array1<f32>>,
    items: BTreeMap<ItemId, Array1<f32>>,
}

/// Pearson correlation of `x` and `y`, and its gradient with respect to `x`.
///
/// Returns `None` when either input is constant.
fn correlation_gradient(x: &[f32], y: &[f32]) -> Option<(f32, Vec<f32>)> {
    if x.len() < 2 {
        return None;
    }

    let n = x.len() as f64;
    let mean_x = x.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let mean_y = y.iter().map(|&v| f64::from(v)).sum::<f64>() / n;

    let dx: Vec<f64> = x.iter().map(|&v| f64::from(v) - mean_x).collect();
    let dy: Vec<f64> = y.iter().map(|&v| f64::from(v) - mean_y).collect();

    let sxy: f64 = dx.iter().zip(&dy).map(|(a, b)| a * b).sum();
    let sxx: f64 = dx.iter().map(|a| a * a).sum();
    let syy: f64 = dy.iter().map(|b| b * b).sum();

    if sxx < 1e-12 || syy < 1e-12 {
        return None;
    }

    let norm = (sxx * syy).sqrt();
    let corr = sxy / norm;

    let gradient = dx
        .iter()
        .zip(&dy)
        .map(|(a, b)| (b / norm - corr * a / sxx) as f32)
        .collect();

    Some((corr as f32, gradient))
}

fn update_row(
    mut row: ArrayViewMut1<f32>,
    mut accumulator: ArrayViewMut1<f32>,
    gradient: &Array1<f32>,
    learning_rate: f32,
    optimizer: Optimizer,
) {
    match optimizer {
        Optimizer::SGD => row.scaled_add(-learning_rate, gradient),
        Optimizer::Adagrad => {
            for (weight, squared_sum, &grad) in
                izip!(row.iter_mut(), accumulator.iter_mut(), gradient.iter())
            {
                *squared_sum += grad * grad;
                *weight -= learning_rate * grad / (squared_sum.sqrt() + ADAGRAD_EPSILON);
            }
        }
    }
}

/// An implicit-feedback factorization model.
#[derive(Clone, Debug)]
pub struct ImplicitFactorizationModel {
    hyper: Hyperparameters,
    attribute: Option<Vec<f32>>,
    params: Option<Parameters>,
    predictions: Option<Array2<f32>>,
    metrics: Option<MetricsBag>,
    epochs_trained: usize,
    state: ModelState,
}

impl Default for ImplicitFactorizationModel {
    fn default() -> Self {
        ImplicitFactorizationModel::new(Hyperparameters::default())
    }
}

impl ImplicitFactorizationModel {
    /// Build a new, unfitted model.
    pub fn new(hyper: Hyperparameters) -> Self {
        ImplicitFactorizationModel {
            hyper,
            attribute: None,
            params: None,
            predictions: None,
            metrics: None,
            epochs_trained: 0,
            state: ModelState::Uninitialized,
        }
    }

    /// Supply per-item values of the protected attribute.
    ///
    /// Required for `ProtectedAttribute::MinorityShare`; for popularity the
    /// counts of the training data are used unless values are supplied.
    pub fn set_protected_attribute(&mut self, values: Vec<f32>) {
        self.attribute = Some(values);
    }

    /// The hyperparameters.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyper
    }

    /// Number of users, once fitted.
    pub fn num_users(&self) -> Option<usize> {
        self.params.as_ref().map(|params| params.user_embedding.nrows())
    }

    /// Number of items, once fitted.
    pub fn num_items(&self) -> Option<usize> {
        self.params.as_ref().map(|params| params.item_embedding.nrows())
    }

    /// Epochs run by the last `fit` call.
    pub fn epochs_trained(&self) -> usize {
        self.epochs_trained
    }

    /// User embeddings, once fitted.
    pub fn user_embeddings(&self) -> Option<&Array2<f32>> {
        self.params.as_ref().map(|params| &params.user_embedding)
    }

    /// Item embeddings, once fitted.
    pub fn item_embeddings(&self) -> Option<&Array2<f32>> {
        self.params.as_ref().map(|params| &params.item_embedding)
    }

    /// Metrics computed by the last `test` call.
    pub fn metrics(&self) -> Option<&MetricsBag> {
        self.metrics.as_ref()
    }

    /// Score `item_ids` for a single user.
    pub fn score(&self, user_id: UserId, item_ids: &[ItemId]) -> Result<Vec<f32>, failure::Error> {
        let params = self.params.as_ref().ok_or(StateError::NotFitted)?;
        let (num_users, num_items, _) = params.shape();

        if user_id >= num_users {
            return Err(PredictionError::UnknownUser(user_id, num_users).into());
        }

        item_ids
            .iter()
            .map(|&item_id| -> Result<f32, failure::Error> {
                if item_id >= num_items {
                    return Err(PredictionError::UnknownItem(item_id, num_items).into());
                }

                let prediction = params.score(user_id, item_id);

                if prediction.is_finite() {
                    Ok(prediction)
                } else {
                    Err(PredictionError::InvalidPredictionValue.into())
                }
            })
            .collect()
    }

    fn attribute_values(&self, interactions: &Interactions) -> Result<Option<Vec<f32>>, FittingError> {
        if self.hyper.regularization_weight <= 0.0 {
            return Ok(None);
        }

        let num_items = interactions.num_items();

        if let Some(values) = self.attribute.as_ref() {
            if values.len() != num_items {
                return Err(DataError::ShapeMismatch {
                    expected: (num_items, 1),
                    actual: (values.len(), 1),
                }
                .into());
            }

            return Ok(Some(values.clone()));
        }

        match self.hyper.protected_attribute {
            ProtectedAttribute::Popularity => Ok(Some(
                interactions
                    .item_popularity()
                    .into_iter()
                    .map(|count| count as f32)
                    .collect(),
            )),
            ProtectedAttribute::MinorityShare => {
                Err(FittingError::MissingProtectedAttribute(num_items))
            }
        }
    }

    fn sample_triplets<R: Rng>(
        &self,
        batch: &TripletMinibatch,
        sampler: &NegativeSampler,
        rng: &mut R,
    ) -> Vec<Triplet> {
        let mut triplets = Vec::with_capacity(batch.len() * self.hyper.num_negatives);
        let mut negatives = Vec::with_capacity(self.hyper.num_negatives);

        for (&user_id, &positive) in batch.user_ids.iter().zip(batch.item_ids) {
            sampler.sample(user_id, self.hyper.num_negatives, rng, &mut negatives);

            let positive_weight = 1.0 / negatives.len().max(1) as f32;

            triplets.extend(negatives.iter().map(|&negative| Triplet {
                user_id,
                positive,
                negative,
                positive_weight,
            }));
        }

        triplets
    }

    /// Loss of one minibatch of triplets and, optionally, its gradients.
    fn batch_gradients(
        &self,
        params: &Parameters,
        triplets: &[Triplet],
        attribute: Option<&[f32]>,
        with_gradients: bool,
    ) -> BatchGradients {
        let num_triplets = triplets.len() as f32;

        let mut loss = 0.0;
        let mut margins = Vec::with_capacity(triplets.len());
        let mut positive_grads = Vec::with_capacity(triplets.len());
        let mut negative_grads = Vec::with_capacity(triplets.len());

        for triplet in triplets {
            let positive = params.score(triplet.user_id, triplet.positive);
            let negative = params.score(triplet.user_id, triplet.negative);
            let margin = positive - negative;

            let (value, positive_grad, negative_grad) = match (self.hyper.kind, self.hyper.loss) {
                (ModelKind::Pairwise, Loss::BPR) => {
                    let grad = -sigmoid(-margin);
                    (softplus(-margin), grad, -grad)
                }
                (ModelKind::Pairwise, Loss::Hinge) => {
                    if margin < 1.0 {
                        (1.0 - margin, -1.0, 1.0)
                    } else {
                        (0.0, 0.0, 0.0)
                    }
                }
                (ModelKind::Pointwise, _) => (
                    triplet.positive_weight * softplus(-positive) + softplus(negative),
                    -triplet.positive_weight * sigmoid(-positive),
                    sigmoid(negative),
                ),
            };

            loss += value / num_triplets;
            margins.push(margin);
            positive_grads.push(positive_grad / num_triplets);
            negative_grads.push(negative_grad / num_triplets);
        }

        let weight = self.hyper.regularization_weight;

        if let Some(attribute) = attribute.filter(|_| weight > 0.0) {
            let values: Vec<f32> = triplets.iter().map(|x| attribute[x.positive]).collect();

            if let Some((corr, gradient)) = correlation_gradient(&margins, &values) {
                let (penalty, sign) = match self.hyper.correlation_penalty {
                    CorrelationPenalty::Signed => (corr, 1.0),
                    CorrelationPenalty::Absolute => (corr.abs(), corr.signum()),
                };
                loss += weight * penalty;

                for (positive_grad, negative_grad, &grad) in
                    izip!(&mut positive_grads, &mut negative_grads, &gradient)
                {
                    let penalty = weight * sign * grad;
                    *positive_grad += penalty;
                    *negative_grad -= penalty;
                }
            }
        }

        let mut result = BatchGradients {
            loss,
            ..BatchGradients::default()
        };

        if !with_gradients {
            return result;
        }

        let latent_dim = params.user_embedding.ncols();

        for (triplet, &positive_grad, &negative_grad) in
            izip!(triplets, &positive_grads, &negative_grads)
        {
            let user = params.user_embedding.row(triplet.user_id);
            let positive = params.item_embedding.row(triplet.positive);
            let negative = params.item_embedding.row(triplet.negative);

            let user_grad = result
                .users
                .entry(triplet.user_id)
                .or_insert_with(|| Array1::zeros(latent_dim));
            user_grad.scaled_add(positive_grad, &positive);
            user_grad.scaled_add(negative_grad, &negative);

            result
                .items
                .entry(triplet.positive)
                .or_insert_with(|| Array1::zeros(latent_dim))
                .scaled_add(positive_grad, &user);
            result
                .items
                .entry(triplet.negative)
                .or_insert_with(|| Array1::zeros(latent_dim))
                .scaled_add(negative_grad, &user);
        }

        result
    }

    fn apply_gradients(&self, params: &mut Parameters, gradients: BatchGradients) {
        let learning_rate = self.hyper.learning_rate;
        let l2_penalty = self.hyper.l2_penalty;
        let optimizer = self.hyper.optimizer;

        for (user_id, mut gradient) in gradients.users {
            if l2_penalty > 0.0 {
                gradient.scaled_add(l2_penalty, &params.user_embedding.row(user_id));
            }
            update_row(
                params.user_embedding.row_mut(user_id),
                params.user_accumulator.row_mut(user_id),
                &gradient,
                learning_rate,
                optimizer,
            );
        }

        for (item_id, mut gradient) in gradients.items {
            if l2_penalty > 0.0 {
                gradient.scaled_add(l2_penalty, &params.item_embedding.row(item_id));
            }
            update_row(
                params.item_embedding.row_mut(item_id),
                params.item_accumulator.row_mut(item_id),
                &gradient,
                learning_rate,
                optimizer,
            );
        }
    }

    fn validation_loss(
        &self,
        params: &Parameters,
        validation: &TripletInteractions,
        sampler: &NegativeSampler,
        attribute: Option<&[f32]>,
    ) -> f32 {
        let mut rng = XorShiftRng::seed_from_u64(self.hyper.seed.wrapping_add(VALIDATION_SEED_OFFSET));
        let mut loss = 0.0;
        let mut num_batches = 0;

        for batch in validation.iter_minibatch(self.hyper.minibatch_size) {
            let triplets = self.sample_triplets(&batch, sampler, &mut rng);

            if triplets.is_empty() {
                continue;
            }

            loss += self.batch_gradients(params, &triplets, attribute, false).loss;
            num_batches += 1;
        }

        loss / num_batches.max(1) as f32
    }

    fn reset(&mut self) {
        self.params = None;
        self.predictions = None;
        self.metrics = None;
        self.state = ModelState::Uninitialized;
    }

    /// Fit the model on `interactions`, returning the mean training loss of
    /// the last epoch.
    ///
    /// Refitting on data of the same shape continues from the current
    /// parameters.
    pub fn fit(&mut self, interactions: &Interactions) -> Result<f32, FittingError> {
        if interactions.is_empty() {
            return Err(FittingError::NoInteractions);
        }
        interactions.check_bounds()?;

        let attribute = self.attribute_values(interactions)?;
        let attribute = attribute.as_ref().map(|values| values.as_slice());

        let mut rng = XorShiftRng::seed_from_u64(self.hyper.seed);
        let (num_users, num_items) = interactions.shape();

        let mut params = match self.params.take() {
            Some(params) if params.shape() == (num_users, num_items, self.hyper.latent_dim) => params,
            _ => Parameters::new(num_users, num_items, self.hyper.latent_dim, &mut rng),
        };

        let sampler = NegativeSampler::new(&interactions.to_compressed());

        let mut triplets = interactions.to_triplet();
        triplets.shuffle(&mut rng);
        let (mut train, validation) = triplets.split_tail(self.hyper.validation_fraction);

        if train.is_empty() {
            self.reset();
            return Err(FittingError::NoInteractions);
        }

        debug!(
            "Fitting {} model on {} interactions ({} held out) for {} epochs",
            self.hyper.kind,
            train.len(),
            validation.len(),
            self.hyper.num_epochs
        );

        let mut loss = 0.0;
        let mut best_validation = std::f32::INFINITY;
        let mut epochs_without_improvement = 0;
        self.epochs_trained = 0;

        for epoch in 0..self.hyper.num_epochs {
            train.shuffle(&mut rng);

            let mut epoch_loss = 0.0;
            let mut num_batches = 0;

            for batch in train.iter_minibatch(self.hyper.minibatch_size) {
                let triplets = self.sample_triplets(&batch, &sampler, &mut rng);

                if triplets.is_empty() {
                    continue;
                }

                let gradients = self.batch_gradients(&params, &triplets, attribute, true);
                epoch_loss += gradients.loss;
                num_batches += 1;

                self.apply_gradients(&mut params, gradients);
            }

            loss = epoch_loss / num_batches.max(1) as f32;
            self.epochs_trained = epoch + 1;

            if !loss.is_finite() || !params.is_finite() {
                self.reset();
                return Err(FittingError::NumericalInstability { epoch });
            }

            if validation.is_empty() {
                debug!("Epoch {}: loss {:.5}", epoch, loss);
                continue;
            }

            let validation_loss = self.validation_loss(&params, &validation, &sampler, attribute);
            debug!(
                "Epoch {}: loss {:.5}, validation loss {:.5}",
                epoch, loss, validation_loss
            );

            if validation_loss < best_validation - MIN_IMPROVEMENT {
                best_validation = validation_loss;
                epochs_without_improvement = 0;
            } else {
                epochs_without_improvement += 1;
            }

            if let Some(patience) = self.hyper.patience {
                if epochs_without_improvement >= patience {
                    info!("Validation loss plateaued; stopping after epoch {}", epoch);
                    break;
                }
            }
        }

        info!(
            "Fitted {} model: loss {:.5} after {} epochs",
            self.hyper.kind, loss, self.epochs_trained
        );

        self.params = Some(params);
        self.predictions = None;
        self.metrics = None;
        self.state = ModelState::Trained;

        Ok(loss)
    }
}

impl RankingModel for ImplicitFactorizationModel {
    fn fit(&mut self, interactions: &Interactions) -> Result<f32, FittingError> {
        ImplicitFactorizationModel::fit(self, interactions)
    }

    fn predict(&mut self) -> Result<&Array2<f32>, failure::Error> {
        let params = self.params.as_ref().ok_or(StateError::NotFitted)?;
        let predictions = params.user_embedding.dot(&params.item_embedding.t());

        if predictions.iter().any(|x| !x.is_finite()) {
            return Err(PredictionError::InvalidPredictionValue.into());
        }

        self.metrics = None;
        self.state = ModelState::Predicted;

        Ok(&*self.predictions.insert(predictions))
    }

    fn predictions(&self) -> Result<&Array2<f32>, StateError> {
        self.predictions.as_ref().ok_or(StateError::NotPredicted)
    }

    fn test(&mut self, evaluator: &Evaluator) -> Result<&MetricsBag, failure::Error> {
        let predictions = self.predictions.as_ref().ok_or(StateError::NotPredicted)?;
        let metrics = evaluator.evaluate(predictions)?;

        self.state = ModelState::Evaluated;

        Ok(&*self.metrics.insert(metrics))
    }

    fn state(&self) -> ModelState {
        self.state
    }
}
