//! Ranking metrics at multiple cutoffs.
//!
//! Per-user metrics are stored as `[cutoff_index, user_id]` arrays and item
//! coverage as a `[cutoff_index, item_id]` indicator array. Users without
//! test interactions get rows of zeros and are left out of every mean and of
//! coverage. Exposure discounts rank `r` (1-based) by `1 / log2(r + 1)`.
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;

use crate::data::Interactions;
use crate::groups::ItemGroup;
use crate::{ConfigError, DataError, ItemId, PredictionError, UserId};

/// Fraction of the top-k that are test items.
pub const PRECISION: &str = "precision";
/// Fraction of the test items found in the top-k.
pub const RECALL: &str = "recall";
/// Normalized discounted cumulative gain with binary relevance.
pub const NDCG: &str = "ndcg";
/// Mean training popularity of the top-k.
pub const POPULARITY: &str = "popularity";
/// Fraction of the top-k held by minority items.
pub const VISIBILITY: &str = "visibility";
/// Share of the position-discounted top-k mass held by minority items.
pub const EXPOSURE: &str = "exposure";
/// Whether an item appears in the top-k of any evaluated user.
pub const COVERAGE: &str = "coverage";

const USER_METRICS: [&str; 6] = [PRECISION, RECALL, NDCG, POPULARITY, VISIBILITY, EXPOSURE];

fn discount(rank: usize) -> f32 {
    1.0 / ((rank + 2) as f32).log2()
}

fn by_score_then_id(a: &(ItemId, f32), b: &(ItemId, f32)) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then(a.0.cmp(&b.0))
}

/// Per-user ranked lists of `(item, score)`, best first.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Rankings {
    num_items: usize,
    lists: Vec<Vec<(ItemId, f32)>>,
}

impl Rankings {
    /// Rank every user's unseen items by score, keeping the best `max_k`.
    ///
    /// Items the user interacted with in `train` are excluded. Ties go to
    /// the lower item id. Non-finite scores are rejected.
    pub fn from_scores(
        scores: &Array2<f32>,
        train: &Interactions,
        max_k: usize,
    ) -> Result<Self, failure::Error> {
        if scores.dim() != train.shape() {
            return Err(DataError::ShapeMismatch {
                expected: train.shape(),
                actual: scores.dim(),
            }
            .into());
        }
        if !scores.iter().all(|score| score.is_finite()) {
            return Err(PredictionError::InvalidPredictionValue.into());
        }

        train.check_bounds()?;

        let train = train.to_compressed();

        let lists = (0..scores.nrows())
            .into_par_iter()
            .map(|user_id| {
                let seen: HashSet<ItemId> = train
                    .get_user(user_id)
                    .map(|user| user.item_ids.iter().cloned().collect())
                    .unwrap_or_default();

                let mut candidates: Vec<(ItemId, f32)> = scores
                    .row(user_id)
                    .iter()
                    .cloned()
                    .enumerate()
                    .filter(|(item_id, _)| !seen.contains(item_id))
                    .collect();

                candidates.sort_by(by_score_then_id);
                candidates.truncate(max_k);

                candidates
            })
            .collect();

        Ok(Rankings {
            num_items: scores.ncols(),
            lists,
        })
    }

    /// Build from explicit lists, e.g. re-ranked ones.
    pub fn from_lists(num_items: usize, lists: Vec<Vec<(ItemId, f32)>>) -> Self {
        Rankings { num_items, lists }
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.lists.len()
    }

    /// Number of items in the catalog.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// The ranked list of a user.
    pub fn user(&self, user_id: UserId) -> &[(ItemId, f32)] {
        &self.lists[user_id]
    }

    /// All ranked lists, in user order.
    pub fn lists(&self) -> &[Vec<(ItemId, f32)>] {
        &self.lists
    }

    /// Check that every listed item lies in the catalog.
    pub fn check_items(&self) -> Result<(), PredictionError> {
        for &(item_id, _) in self.lists.iter().flatten() {
            if item_id >= self.num_items {
                return Err(PredictionError::UnknownItem(item_id, self.num_items));
            }
        }

        Ok(())
    }
}

/// Metric name to `[cutoff_index, user_or_item]` array.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MetricsBag {
    cutoffs: Vec<usize>,
    evaluated_users: Vec<bool>,
    item_groups: Option<Vec<ItemGroup>>,
    metrics: BTreeMap<String, Array2<f32>>,
}

impl MetricsBag {
    /// The cutoffs, in increasing order.
    pub fn cutoffs(&self) -> &[usize] {
        &self.cutoffs
    }

    /// Names of the metrics present.
    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(|name| name.as_str())
    }

    /// The full array of a metric.
    pub fn get(&self, metric: &str) -> Option<&Array2<f32>> {
        self.metrics.get(metric)
    }

    /// Number of users that had test interactions.
    pub fn num_evaluated_users(&self) -> usize {
        self.evaluated_users.iter().filter(|&&x| x).count()
    }

    /// Whether a user had test interactions.
    pub fn is_evaluated(&self, user_id: UserId) -> bool {
        self.evaluated_users.get(user_id).cloned().unwrap_or(false)
    }

    fn cutoff_index(&self, cutoff: usize) -> Result<usize, ConfigError> {
        self.cutoffs
            .iter()
            .position(|&k| k == cutoff)
            .ok_or(ConfigError::UnknownCutoff(cutoff))
    }

    /// Per-user (or, for coverage, per-item) values at a cutoff.
    pub fn values(&self, metric: &str, cutoff: usize) -> Result<ArrayView1<f32>, ConfigError> {
        let values = self
            .metrics
            .get(metric)
            .ok_or_else(|| ConfigError::UnknownMetric(metric.to_owned()))?;

        Ok(values.row(self.cutoff_index(cutoff)?))
    }

    /// Mean of a metric at a cutoff: over evaluated users, or over items
    /// for coverage. Zero when there is nothing to average.
    pub fn mean(&self, metric: &str, cutoff: usize) -> Result<f32, ConfigError> {
        let values = self.values(metric, cutoff)?;

        if metric == COVERAGE {
            return Ok(if values.is_empty() {
                0.0
            } else {
                values.sum() / values.len() as f32
            });
        }

        let (sum, count) = values
            .iter()
            .zip(&self.evaluated_users)
            .filter(|&(_, &evaluated)| evaluated)
            .fold((0.0f32, 0usize), |(sum, count), (value, _)| (sum + value, count + 1));

        Ok(if count == 0 { 0.0 } else { sum / count as f32 })
    }

    /// Fraction of the catalog recommended to at least one user.
    pub fn catalog_coverage(&self, cutoff: usize) -> Result<f32, ConfigError> {
        self.mean(COVERAGE, cutoff)
    }

    /// Fraction of a group's items recommended to at least one user.
    pub fn group_coverage(&self, cutoff: usize, group: ItemGroup) -> Result<f32, ConfigError> {
        let groups = self
            .item_groups
            .as_ref()
            .ok_or_else(|| ConfigError::UnknownMetric(format!("{}_{:?}", COVERAGE, group).to_lowercase()))?;
        let values = self.values(COVERAGE, cutoff)?;

        let (sum, count) = values
            .iter()
            .zip(groups)
            .filter(|&(_, &item_group)| item_group == group)
            .fold((0.0f32, 0usize), |(sum, count), (value, _)| (sum + value, count + 1));

        Ok(if count == 0 { 0.0 } else { sum / count as f32 })
    }

    /// Every mean, by metric name and cutoff.
    pub fn summary(&self) -> BTreeMap<String, BTreeMap<usize, f32>> {
        self.metrics
            .keys()
            .map(|metric| {
                let by_cutoff = self
                    .cutoffs
                    .iter()
                    .filter_map(|&k| self.mean(metric, k).ok().map(|value| (k, value)))
                    .collect();

                (metric.clone(), by_cutoff)
            })
            .collect()
    }
}

/// Computes a `MetricsBag` for predictions against held-out interactions.
#[derive(Clone, Debug)]
pub struct Evaluator<'a> {
    train: &'a Interactions,
    test: &'a Interactions,
    cutoffs: Vec<usize>,
    groups: Option<Vec<ItemGroup>>,
}

impl<'a> Evaluator<'a> {
    /// Evaluate at the given cutoffs, which must be positive and strictly
    /// increasing. Train interactions are excluded from the rankings and
    /// supply item popularity.
    pub fn new(train: &'a Interactions, test: &'a Interactions, cutoffs: Vec<usize>) -> Self {
        Evaluator {
            train,
            test,
            cutoffs,
            groups: None,
        }
    }

    /// Also compute visibility, exposure and group coverage for these
    /// item groups.
    pub fn with_groups(mut self, groups: Vec<ItemGroup>) -> Self {
        self.groups = Some(groups);
        self
    }

    /// The cutoffs that fit the catalog.
    pub fn cutoffs(&self) -> Result<Vec<usize>, ConfigError> {
        let num_items = self.train.num_items();

        if self.cutoffs.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "cutoffs",
                reason: "at least one cutoff is required".to_owned(),
            });
        }
        if self.cutoffs[0] == 0 || self.cutoffs.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::InvalidValue {
                name: "cutoffs",
                reason: format!("{:?} must be positive and strictly increasing", self.cutoffs),
            });
        }

        let (kept, dropped): (Vec<usize>, Vec<usize>) =
            self.cutoffs.iter().partition(|&&k| k <= num_items);

        if !dropped.is_empty() {
            warn!("Dropping cutoffs {:?} larger than the {} items", dropped, num_items);
        }

        if kept.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "cutoffs",
                reason: format!("none of {:?} fits {} items", self.cutoffs, num_items),
            });
        }

        Ok(kept)
    }

    /// Rank the unseen items of every user by `scores` and evaluate.
    pub fn evaluate(&self, scores: &Array2<f32>) -> Result<MetricsBag, failure::Error> {
        let cutoffs = self.cutoffs()?;
        let max_k = cutoffs.last().cloned().unwrap_or(0);
        let rankings = Rankings::from_scores(scores, self.train, max_k)?;

        self.evaluate_rankings(&rankings)
    }

    /// Evaluate precomputed rankings.
    pub fn evaluate_rankings(&self, rankings: &Rankings) -> Result<MetricsBag, failure::Error> {
        let cutoffs = self.cutoffs()?;
        let shape = self.train.shape();

        if self.test.shape() != shape {
            return Err(DataError::ShapeMismatch {
                expected: shape,
                actual: self.test.shape(),
            }
            .into());
        }
        if (rankings.num_users(), rankings.num_items()) != shape {
            return Err(DataError::ShapeMismatch {
                expected: shape,
                actual: (rankings.num_users(), rankings.num_items()),
            }
            .into());
        }

        self.train.check_bounds()?;
        self.test.check_bounds()?;
        rankings.check_items()?;

        if let Some(groups) = self.groups.as_ref() {
            if groups.len() != shape.1 {
                return Err(DataError::ShapeMismatch {
                    expected: (shape.1, 1),
                    actual: (groups.len(), 1),
                }
                .into());
            }
        }

        let (num_users, num_items) = shape;
        let popularity = self.train.item_popularity();
        let test = self.test.to_compressed();
        let groups = self.groups.as_ref();

        let per_user: Vec<Option<Vec<[f32; 6]>>> = (0..num_users)
            .into_par_iter()
            .map(|user_id| {
                let test_items: HashSet<ItemId> = test
                    .get_user(user_id)
                    .map(|user| user.item_ids.iter().cloned().collect())
                    .unwrap_or_default();

                if test_items.is_empty() {
                    return None;
                }

                let ranking = rankings.user(user_id);

                Some(
                    cutoffs
                        .iter()
                        .map(|&k| user_metrics(&ranking[..k.min(ranking.len())], k, &test_items, &popularity, groups))
                        .collect(),
                )
            })
            .collect();

        let mut metrics: BTreeMap<String, Array2<f32>> = BTreeMap::new();
        let names: Vec<&str> = USER_METRICS
            .iter()
            .cloned()
            .filter(|&name| groups.is_some() || (name != VISIBILITY && name != EXPOSURE))
            .collect();

        for (metric_idx, name) in USER_METRICS.iter().enumerate() {
            if !names.contains(name) {
                continue;
            }

            let mut values = Array2::zeros((cutoffs.len(), num_users));

            for (user_id, user) in per_user.iter().enumerate() {
                if let Some(user) = user {
                    for (cutoff_idx, row) in user.iter().enumerate() {
                        values[(cutoff_idx, user_id)] = row[metric_idx];
                    }
                }
            }

            metrics.insert((*name).to_owned(), values);
        }

        let mut coverage = Array2::zeros((cutoffs.len(), num_items));

        for (user_id, _) in per_user.iter().enumerate().filter(|(_, user)| user.is_some()) {
            let ranking = rankings.user(user_id);

            for (cutoff_idx, &k) in cutoffs.iter().enumerate() {
                for &(item_id, _) in ranking.iter().take(k) {
                    coverage[(cutoff_idx, item_id)] = 1.0;
                }
            }
        }

        metrics.insert(COVERAGE.to_owned(), coverage);

        let evaluated_users: Vec<bool> = per_user.iter().map(|user| user.is_some()).collect();

        debug!(
            "Evaluated {} of {} users at cutoffs {:?}",
            evaluated_users.iter().filter(|&&x| x).count(),
            num_users,
            cutoffs
        );

        Ok(MetricsBag {
            cutoffs,
            evaluated_users,
            item_groups: self.groups.clone(),
            metrics,
        })
    }
}

/// Metrics of one user's top-k, in `USER_METRICS` order.
fn user_metrics(
    top: &[(ItemId, f32)],
    k: usize,
    test_items: &HashSet<ItemId>,
    popularity: &[usize],
    groups: Option<&Vec<ItemGroup>>,
) -> [f32; 6] {
    let mut hits = 0;
    let mut dcg = 0.0;
    let mut total_popularity = 0;
    let mut minority = 0;
    let mut minority_exposure = 0.0;
    let mut total_exposure = 0.0;

    for (rank, &(item_id, _)) in top.iter().enumerate() {
        if test_items.contains(&item_id) {
            hits += 1;
            dcg += discount(rank);
        }

        total_popularity += popularity[item_id];
        total_exposure += discount(rank);

        if groups.map_or(false, |groups| groups[item_id] == ItemGroup::Minority) {
            minority += 1;
            minority_exposure += discount(rank);
        }
    }

    let ideal: f32 = (0..k.min(test_items.len())).map(discount).sum();
    let listed = top.len() as f32;
    let share = |value: f32, total: f32| if total > 0.0 { value / total } else { 0.0 };

    [
        hits as f32 / k as f32,
        hits as f32 / test_items.len() as f32,
        share(dcg, ideal),
        share(total_popularity as f32, listed),
        share(minority as f32, listed),
        share(minority_exposure, total_exposure),
    ]
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::data::Interaction;

    fn interactions(pairs: &[(UserId, ItemId)]) -> Interactions {
        Interactions::from_parts(
            3,
            5,
            pairs
                .iter()
                .map(|&(user_id, item_id)| Interaction::new(user_id, item_id, 1.0, 0))
                .collect(),
        )
    }

    fn fixture() -> (Interactions, Interactions, Array2<f32>) {
        let train = interactions(&[(0, 0), (1, 1), (2, 0)]);
        // User 2 has no test interactions.
        let test = interactions(&[(0, 2), (0, 4), (1, 3)]);
        let scores = ndarray::arr2(&[
            [9.0, 1.0, 5.0, 2.0, 3.0],
            [4.0, 9.0, 1.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.0],
        ]);

        (train, test, scores)
    }

    fn groups() -> Vec<ItemGroup> {
        use crate::groups::ItemGroup::*;
        vec![Majority, Majority, Minority, Minority, Majority]
    }

    #[test]
    fn rankings_skip_train_items_and_break_ties_by_id() {
        let (train, _, scores) = fixture();
        let rankings = Rankings::from_scores(&scores, &train, 3).unwrap();

        let items = |user_id| rankings.user(user_id).iter().map(|x| x.0).collect::<Vec<_>>();

        assert_eq!(items(0), vec![2, 4, 3]);
        assert_eq!(items(1), vec![0, 2, 3]);
        assert_eq!(items(2), vec![1, 2, 3]);
    }

    #[test]
    fn accuracy_metrics() {
        let (train, test, scores) = fixture();
        let bag = Evaluator::new(&train, &test, vec![1, 3]).evaluate(&scores).unwrap();

        assert_eq!(bag.num_evaluated_users(), 2);

        let ndcg = bag.values(NDCG, 1).unwrap();
        assert_abs_diff_eq!(ndcg[0], 1.0, epsilon = 1e-6);
        assert_eq!(ndcg[1], 0.0);

        let ndcg = bag.values(NDCG, 3).unwrap();
        assert_abs_diff_eq!(ndcg[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(ndcg[1], 0.5, epsilon = 1e-6);

        assert_abs_diff_eq!(bag.mean(NDCG, 3).unwrap(), 0.75, epsilon = 1e-6);
        assert_abs_diff_eq!(bag.mean(PRECISION, 1).unwrap(), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(bag.mean(PRECISION, 3).unwrap(), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(bag.mean(RECALL, 3).unwrap(), 1.0, epsilon = 1e-6);

        let popularity = bag.values(POPULARITY, 1).unwrap();
        assert_eq!(popularity[0], 0.0);
        assert_eq!(popularity[1], 2.0);

        // No groups, no group metrics.
        assert!(bag.get(VISIBILITY).is_none());
        assert!(bag.group_coverage(3, ItemGroup::Minority).is_err());
    }

    #[test]
    fn users_without_test_items_are_zero_and_excluded() {
        let (train, test, scores) = fixture();
        let bag = Evaluator::new(&train, &test, vec![1, 3]).evaluate(&scores).unwrap();

        assert!(!bag.is_evaluated(2));

        for metric in bag.metric_names().filter(|&name| name != COVERAGE) {
            for &k in bag.cutoffs() {
                assert_eq!(bag.values(metric, k).unwrap()[2], 0.0);
            }
        }

        // User 2 would have covered item 1.
        assert_eq!(bag.values(COVERAGE, 3).unwrap()[1], 0.0);
    }

    #[test]
    fn coverage_is_bounded_and_grows_with_cutoff() {
        let (train, test, scores) = fixture();
        let bag = Evaluator::new(&train, &test, vec![1, 2, 3, 4])
            .with_groups(groups())
            .evaluate(&scores)
            .unwrap();

        assert_abs_diff_eq!(bag.catalog_coverage(1).unwrap(), 0.4, epsilon = 1e-6);
        assert_abs_diff_eq!(bag.catalog_coverage(3).unwrap(), 0.8, epsilon = 1e-6);

        let mut previous = 0.0;
        for &k in bag.cutoffs() {
            let coverage = bag.catalog_coverage(k).unwrap();
            assert!(coverage >= previous && coverage <= 1.0);
            previous = coverage;
        }

        assert_abs_diff_eq!(bag.group_coverage(3, ItemGroup::Minority).unwrap(), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(
            bag.group_coverage(3, ItemGroup::Majority).unwrap(),
            2.0 / 3.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn visibility_and_exposure() {
        let (train, test, scores) = fixture();
        let bag = Evaluator::new(&train, &test, vec![3])
            .with_groups(groups())
            .evaluate(&scores)
            .unwrap();

        let visibility = bag.values(VISIBILITY, 3).unwrap();
        assert_abs_diff_eq!(visibility[0], 2.0 / 3.0, epsilon = 1e-6);

        let exposure = bag.values(EXPOSURE, 3).unwrap();
        let total = 1.0 + 1.0 / 3.0f32.log2() + 0.5;
        assert_abs_diff_eq!(exposure[0], 1.5 / total, epsilon = 1e-6);

        // User 1 sees [0, 2, 3]: minority at ranks 2 and 3.
        assert_abs_diff_eq!(exposure[1], (1.0 / 3.0f32.log2() + 0.5) / total, epsilon = 1e-6);
        assert!(exposure[1] < visibility[1]);
    }

    #[test]
    fn cutoffs_are_checked() {
        let (train, test, scores) = fixture();

        let bag = Evaluator::new(&train, &test, vec![1, 3, 10]).evaluate(&scores).unwrap();
        assert_eq!(bag.cutoffs(), &[1, 3]);

        match bag.mean(NDCG, 10) {
            Err(ConfigError::UnknownCutoff(10)) => {}
            other => panic!("unexpected {:?}", other),
        }
        match bag.mean("serendipity", 1) {
            Err(ConfigError::UnknownMetric(_)) => {}
            other => panic!("unexpected {:?}", other),
        }

        assert!(Evaluator::new(&train, &test, vec![3, 1]).evaluate(&scores).is_err());
        assert!(Evaluator::new(&train, &test, vec![0]).evaluate(&scores).is_err());
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let (train, test, _) = fixture();
        let scores = Array2::zeros((3, 4));

        let error = Evaluator::new(&train, &test, vec![1]).evaluate(&scores).unwrap_err();

        match error.downcast_ref::<DataError>() {
            Some(DataError::ShapeMismatch { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn out_of_range_ids_are_reported() {
        let (train, _, scores) = fixture();
        let test = Interactions::from_parts(3, 5, vec![Interaction::new(5, 1, 1.0, 0)]);

        let error = Evaluator::new(&train, &test, vec![1]).evaluate(&scores).unwrap_err();

        match error.downcast_ref::<crate::FittingError>() {
            Some(crate::FittingError::OutOfRange { user_id, .. }) => assert_eq!(*user_id, 5),
            other => panic!("unexpected {:?}", other),
        }

        let train = Interactions::from_parts(3, 5, vec![Interaction::new(0, 9, 1.0, 0)]);
        assert!(Rankings::from_scores(&scores, &train, 3).is_err());
    }

    #[test]
    fn unknown_ranked_items_are_reported() {
        let (train, test, _) = fixture();
        let rankings = Rankings::from_lists(5, vec![vec![(0, 1.0)], vec![(7, 1.0)], vec![]]);

        let error = Evaluator::new(&train, &test, vec![1])
            .evaluate_rankings(&rankings)
            .unwrap_err();

        match error.downcast_ref::<PredictionError>() {
            Some(PredictionError::UnknownItem(item_id, 5)) => assert_eq!(*item_id, 7),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn non_finite_scores_are_rejected() {
        let (train, test, mut scores) = fixture();
        scores[(1, 2)] = std::f32::NAN;

        let error = Evaluator::new(&train, &test, vec![1]).evaluate(&scores).unwrap_err();

        match error.downcast_ref::<PredictionError>() {
            Some(PredictionError::InvalidPredictionValue) => {}
            other => panic!("unexpected {:?}", other),
        }

        scores[(1, 2)] = std::f32::INFINITY;
        assert!(Rankings::from_scores(&scores, &train, 3).is_err());
    }

    #[test]
    fn serializes() {
        let (train, test, scores) = fixture();
        let bag = Evaluator::new(&train, &test, vec![1, 3])
            .with_groups(groups())
            .evaluate(&scores)
            .unwrap();

        let json = serde_json::to_string(&bag).unwrap();
        let restored: MetricsBag = serde_json::from_str(&json).unwrap();

        assert_eq!(bag, restored);
    }
}
