//! xQuad re-ranking over two item categories.
//!
//! For every user the first `rmax` entries of the ranking form the candidate
//! pool. Items are picked greedily, each step taking the candidate that
//! maximizes
//! ```text
//! (1 - lambda) * rel(i) + lambda * sum_c P(c|u) * [i in c] * coverage(c, S)
//! ```
//! where `rel` is the min-max normalized score within the pool and `S` the
//! items picked so far. The binary variant sets `coverage(c, S)` to 1 until
//! `S` holds an item of `c` and to 0 afterwards; the smooth variant uses
//! `1 - |S ∩ c| / |S|`. Ties go to the earlier original position, and items
//! beyond the pool keep their order.
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;

use crate::data::Interactions;
use crate::evaluation::Rankings;
use crate::groups::ItemGroup;
use crate::{ConfigError, DataError, ItemId};

/// How category coverage is rewarded.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// A category is rewarded only until it is represented.
    Binary,
    /// A category is rewarded in proportion to its shortfall.
    Smooth,
}

/// Where the user's category preference `P(c|u)` comes from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    /// Both categories weigh the same.
    Uniform,
    /// Category shares of the user's training interactions.
    Profile,
}

/// The item partition the re-ranker diversifies over.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum Partition {
    /// Minority versus majority provider group.
    ProviderGroup,
    /// Long-tail versus head items by training popularity.
    Popularity,
}

impl FromStr for Partition {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "group" | "provider_group" => Ok(Partition::ProviderGroup),
            "popularity" | "head_tail" => Ok(Partition::Popularity),
            other => Err(ConfigError::InvalidValue {
                name: "partition",
                reason: format!("unknown partition {}", other),
            }),
        }
    }
}

impl TryFrom<String> for Partition {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Partition> for String {
    fn from(partition: Partition) -> String {
        partition.to_string()
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Partition::ProviderGroup => write!(f, "group"),
            Partition::Popularity => write!(f, "popularity"),
        }
    }
}

/// Parameters of the re-ranker.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct XQuadParameters {
    lambda: f32,
    rmax: usize,
    variant: Variant,
    preference: Preference,
}

impl Default for XQuadParameters {
    fn default() -> Self {
        XQuadParameters::new()
    }
}

impl XQuadParameters {
    /// Defaults: `lambda = 0.5`, a pool of 100, smooth, uniform preference.
    pub fn new() -> Self {
        XQuadParameters {
            lambda: 0.5,
            rmax: 100,
            variant: Variant::Smooth,
            preference: Preference::Uniform,
        }
    }

    /// Weight of the diversity term, in `[0, 1]`.
    pub fn lambda(mut self, lambda: f32) -> Self {
        self.lambda = lambda;
        self
    }

    /// Size of the candidate pool.
    pub fn rmax(mut self, rmax: usize) -> Self {
        self.rmax = rmax;
        self
    }

    /// Set the coverage variant.
    pub fn variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    /// Set the source of the category preference.
    pub fn preference(mut self, preference: Preference) -> Self {
        self.preference = preference;
        self
    }

    /// The weight of the diversity term.
    pub fn get_lambda(&self) -> f32 {
        self.lambda
    }

    /// The candidate pool size.
    pub fn get_rmax(&self) -> usize {
        self.rmax
    }

    /// Check the parameters are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.lambda >= 0.0 && self.lambda <= 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "lambda",
                reason: format!("{} is not in [0, 1]", self.lambda),
            });
        }
        if self.rmax == 0 {
            return Err(ConfigError::InvalidValue {
                name: "rmax",
                reason: "must be positive".to_owned(),
            });
        }

        Ok(())
    }
}

/// Re-rank the pool of one user's ranking.
///
/// `preference` holds `P(c|u)` indexed by `ItemGroup::index`.
pub fn rerank_user(
    ranking: &[(ItemId, f32)],
    categories: &[ItemGroup],
    preference: [f32; 2],
    params: &XQuadParameters,
) -> Vec<(ItemId, f32)> {
    let pool_size = params.rmax.min(ranking.len());
    let (pool, rest) = ranking.split_at(pool_size);

    let min = pool.iter().map(|x| x.1).fold(std::f32::INFINITY, f32::min);
    let max = pool.iter().map(|x| x.1).fold(std::f32::NEG_INFINITY, f32::max);
    let relevance = |score: f32| if max > min { (score - min) / (max - min) } else { 0.0 };

    let mut remaining: Vec<(ItemId, f32)> = pool.to_vec();
    let mut selected = Vec::with_capacity(ranking.len());
    let mut counts = [0usize; 2];

    while !remaining.is_empty() {
        let coverage = |group: ItemGroup| {
            let count = counts[group.index()];
            match params.variant {
                Variant::Binary => {
                    if count == 0 {
                        1.0
                    } else {
                        0.0
                    }
                }
                Variant::Smooth => {
                    if selected.is_empty() {
                        1.0
                    } else {
                        1.0 - count as f32 / selected.len() as f32
                    }
                }
            }
        };

        let mut best = 0;
        let mut best_value = std::f32::NEG_INFINITY;

        for (idx, &(item_id, score)) in remaining.iter().enumerate() {
            let group = categories[item_id];
            let diversity = preference[group.index()] * coverage(group);
            let value = (1.0 - params.lambda) * relevance(score) + params.lambda * diversity;

            if value > best_value {
                best = idx;
                best_value = value;
            }
        }

        let chosen = remaining.remove(best);
        counts[categories[chosen.0].index()] += 1;
        selected.push(chosen);
    }

    selected.extend_from_slice(rest);

    selected
}

fn profile_preference(item_ids: &[ItemId], categories: &[ItemGroup]) -> [f32; 2] {
    if item_ids.is_empty() {
        return [0.5, 0.5];
    }

    let mut counts = [0.0; 2];
    for &item_id in item_ids {
        counts[categories[item_id].index()] += 1.0;
    }

    let total = item_ids.len() as f32;
    [counts[0] / total, counts[1] / total]
}

/// Re-rank every user's list.
///
/// `train` supplies the profile preference and must have the shape of
/// `rankings`.
pub fn rerank(
    rankings: &Rankings,
    categories: &[ItemGroup],
    train: &Interactions,
    params: &XQuadParameters,
) -> Result<Rankings, failure::Error> {
    params.validate()?;

    if categories.len() != rankings.num_items() {
        return Err(DataError::ShapeMismatch {
            expected: (rankings.num_items(), 1),
            actual: (categories.len(), 1),
        }
        .into());
    }
    if train.shape() != (rankings.num_users(), rankings.num_items()) {
        return Err(DataError::ShapeMismatch {
            expected: (rankings.num_users(), rankings.num_items()),
            actual: train.shape(),
        }
        .into());
    }

    train.check_bounds()?;
    rankings.check_items()?;

    let train = train.to_compressed();

    let lists = rankings
        .lists()
        .par_iter()
        .enumerate()
        .map(|(user_id, ranking)| {
            let preference = match params.preference {
                Preference::Uniform => [0.5, 0.5],
                Preference::Profile => train
                    .get_user(user_id)
                    .map_or([0.5, 0.5], |user| profile_preference(user.item_ids, categories)),
            };

            rerank_user(ranking, categories, preference, params)
        })
        .collect();

    debug!(
        "Re-ranked {} users with lambda {}, rmax {} ({:?}, {:?})",
        rankings.num_users(),
        params.lambda,
        params.rmax,
        params.variant,
        params.preference
    );

    Ok(Rankings::from_lists(rankings.num_items(), lists))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Interaction;
    use crate::groups::ItemGroup::{Majority, Minority};

    // Items 0..3 are majority, 3..6 minority; scores fall with the item id.
    fn ranking() -> (Vec<(ItemId, f32)>, Vec<ItemGroup>) {
        let ranking = (0..6).map(|item_id| (item_id, 1.0 - item_id as f32 * 0.1)).collect();
        let categories = vec![Majority, Majority, Majority, Minority, Minority, Minority];

        (ranking, categories)
    }

    fn items(ranking: &[(ItemId, f32)]) -> Vec<ItemId> {
        ranking.iter().map(|x| x.0).collect()
    }

    #[test]
    fn zero_lambda_keeps_order() {
        let (ranking, categories) = ranking();

        for &variant in &[Variant::Binary, Variant::Smooth] {
            let params = XQuadParameters::new().lambda(0.0).rmax(4).variant(variant);
            let reranked = rerank_user(&ranking, &categories, [0.5, 0.5], &params);

            assert_eq!(reranked, ranking);
        }
    }

    #[test]
    fn full_lambda_alternates_categories() {
        let (ranking, categories) = ranking();
        let params = XQuadParameters::new().lambda(1.0).rmax(6).variant(Variant::Smooth);

        let reranked = rerank_user(&ranking, &categories, [0.5, 0.5], &params);

        assert_eq!(items(&reranked), vec![0, 3, 1, 4, 2, 5]);

        let params = params.variant(Variant::Binary);
        let reranked = rerank_user(&ranking, &categories, [0.5, 0.5], &params);

        assert_eq!(items(&reranked)[..2], [0, 3]);
    }

    #[test]
    fn only_the_pool_is_reordered() {
        let (ranking, categories) = ranking();
        let params = XQuadParameters::new().lambda(1.0).rmax(3);

        let reranked = rerank_user(&ranking, &categories, [0.5, 0.5], &params);

        assert_eq!(items(&reranked), vec![0, 1, 2, 3, 4, 5]);

        let (mut ranking, _) = self::ranking();
        ranking.swap(1, 4);
        let reranked = rerank_user(&ranking, &categories, [0.5, 0.5], &params);

        // Pool [0, 4, 2]; 3 and 1 stay at the tail.
        assert_eq!(items(&reranked), vec![0, 4, 2, 3, 1, 5]);
    }

    #[test]
    fn intermediate_lambda_promotes_minority() {
        let (ranking, categories) = ranking();
        let params = XQuadParameters::new().lambda(0.5).rmax(6).variant(Variant::Binary);

        let reranked = rerank_user(&ranking, &categories, [0.5, 0.5], &params);

        // Item 3 (rel 0.4) beats item 1 (rel 0.8) once a majority item is placed.
        assert_eq!(items(&reranked)[..3], [0, 3, 1]);
    }

    #[test]
    fn profile_preference_uses_training_shares() {
        let (ranking, categories) = ranking();
        let train = Interactions::from_parts(
            2,
            6,
            vec![
                Interaction::new(0, 3, 1.0, 0),
                Interaction::new(0, 4, 1.0, 1),
                Interaction::new(0, 5, 1.0, 2),
            ],
        );
        let rankings = Rankings::from_lists(6, vec![ranking.clone(), ranking]);

        let params = XQuadParameters::new()
            .lambda(1.0)
            .rmax(6)
            .variant(Variant::Smooth)
            .preference(Preference::Profile);
        let reranked = rerank(&rankings, &categories, &train, &params).unwrap();

        // User 0 only ever interacted with minority items.
        assert_eq!(reranked.user(0)[0].0, 3);
        // User 1 has no profile and falls back to a uniform preference.
        assert_eq!(items(reranked.user(1))[..2], [0, 3]);
    }

    #[test]
    fn invalid_parameters() {
        let (ranking, categories) = ranking();
        let train = Interactions::new(1, 6);
        let rankings = Rankings::from_lists(6, vec![ranking]);

        assert!(rerank(&rankings, &categories, &train, &XQuadParameters::new().lambda(1.5)).is_err());
        assert!(rerank(&rankings, &categories, &train, &XQuadParameters::new().rmax(0)).is_err());
        assert!(rerank(&rankings, &categories[..5], &train, &XQuadParameters::new()).is_err());
    }

    #[test]
    fn out_of_range_ids_are_reported() {
        let (ranking, categories) = ranking();
        let params = XQuadParameters::new();

        let train = Interactions::from_parts(1, 6, vec![Interaction::new(0, 6, 1.0, 0)]);
        let rankings = Rankings::from_lists(6, vec![ranking.clone()]);
        assert!(rerank(&rankings, &categories, &train, &params).is_err());

        let mut listed = ranking;
        listed.push((9, 0.0));
        let rankings = Rankings::from_lists(6, vec![listed]);
        let error = rerank(&rankings, &categories, &Interactions::new(1, 6), &params).unwrap_err();

        assert!(error.downcast_ref::<crate::PredictionError>().is_some());
    }
}
