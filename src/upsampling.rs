//! Upsampling of minority-group interactions.
//!
//! The transform appends exact copies of training interactions whose item
//! is associated with the minority group until minority rows make up at
//! least `target` of all rows. Which rows get copied, and how often, depends
//! on the [`UpsamplingMode`]. The number of copies is computed exactly and
//! apportioned with the largest-remainder method, so the result is fully
//! deterministic.
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use crate::data::Interactions;
use crate::groups::GroupRepresentation;
use crate::{ConfigError, DataError};

// Tolerance when comparing proportions, so that an f32 target such as 0.3
// is reached by the row count that reaches it exactly.
const PROPORTION_EPSILON: f64 = 1e-6;

/// How duplicates are distributed over minority rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UpsamplingMode {
    /// Leave the data untouched.
    None,
    /// Weight rows by the item's observed minority share.
    TrueRatio,
    /// Weight rows by `minority / (minority + majority)`: items with a larger
    /// minority contingent and a smaller majority contingent get more copies.
    Synthetic,
    /// Synthetic weight scaled by the item's relative popularity.
    Popularity,
}

impl FromStr for UpsamplingMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(UpsamplingMode::None),
            "true_ratio" | "real" => Ok(UpsamplingMode::TrueRatio),
            "synthetic" | "fake" => Ok(UpsamplingMode::Synthetic),
            "popularity" | "fake_by_pop" => Ok(UpsamplingMode::Popularity),
            other => Err(ConfigError::UnknownUpsamplingMode(other.to_owned())),
        }
    }
}

impl TryFrom<String> for UpsamplingMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UpsamplingMode> for String {
    fn from(mode: UpsamplingMode) -> String {
        mode.to_string()
    }
}

impl fmt::Display for UpsamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            UpsamplingMode::None => "none",
            UpsamplingMode::TrueRatio => "true_ratio",
            UpsamplingMode::Synthetic => "synthetic",
            UpsamplingMode::Popularity => "popularity",
        };

        write!(f, "{}", name)
    }
}

/// Summary of an upsampling run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpsamplingReport {
    /// Rows before the transform.
    pub original_rows: usize,
    /// Duplicated rows appended.
    pub added_rows: usize,
    /// Minority proportion before the transform.
    pub original_proportion: f32,
    /// Minority proportion after the transform.
    pub proportion: f32,
}

/// Fraction of rows whose item is associated with the minority group.
pub fn minority_proportion(interactions: &Interactions, representation: &GroupRepresentation) -> f32 {
    if interactions.is_empty() {
        return 0.0;
    }

    let minority_rows = interactions
        .data()
        .iter()
        .filter(|x| representation.is_minority(x.item_id()))
        .count();

    minority_rows as f32 / interactions.len() as f32
}

/// Duplication weight of a single row.
///
/// `popularity` is relative to the most popular item, in `[0, 1]`, and is
/// only used by `UpsamplingMode::Popularity`. Rows of majority items always
/// weigh zero.
pub fn duplication_weight(mode: UpsamplingMode, minority: f32, majority: f32, popularity: f32) -> f64 {
    if minority <= 0.0 {
        return 0.0;
    }

    let minority = f64::from(minority);
    let majority = f64::from(majority.max(0.0));

    match mode {
        UpsamplingMode::None => 0.0,
        UpsamplingMode::TrueRatio => minority,
        UpsamplingMode::Synthetic => minority / (minority + majority),
        UpsamplingMode::Popularity => minority / (minority + majority) * f64::from(popularity),
    }
}

/// Smallest number of extra minority rows that lifts the proportion to `target`.
fn required_rows(minority_rows: usize, total_rows: usize, target: f64) -> usize {
    let reached = |extra: usize| {
        (minority_rows + extra) as f64 / (total_rows + extra) as f64 + PROPORTION_EPSILON >= target
    };

    let estimate = (target * total_rows as f64 - minority_rows as f64) / (1.0 - target);
    let mut extra = estimate.max(0.0).floor() as usize;

    while !reached(extra) {
        extra += 1;
    }
    while extra > 0 && reached(extra - 1) {
        extra -= 1;
    }

    extra
}

/// Distribute `total` copies over rows proportionally to `weights`.
fn apportion(weights: &[f64], total: usize) -> Vec<usize> {
    let weight_sum: f64 = weights.iter().sum();

    let quotas: Vec<f64> = weights
        .iter()
        .map(|weight| total as f64 * weight / weight_sum)
        .collect();
    let mut counts: Vec<usize> = quotas.iter().map(|quota| quota.floor() as usize).collect();

    let assigned: usize = counts.iter().sum();
    let remainder = total.saturating_sub(assigned);

    let mut order: Vec<usize> = (0..weights.len()).filter(|&idx| weights[idx] > 0.0).collect();
    order.sort_by(|&a, &b| {
        let fraction_a = quotas[a] - quotas[a].floor();
        let fraction_b = quotas[b] - quotas[b].floor();

        fraction_b
            .partial_cmp(&fraction_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    for &idx in order.iter().cycle().take(remainder) {
        counts[idx] += 1;
    }

    counts
}

/// Upsample minority rows until they make up at least `target` of the data.
///
/// Returns a new set of interactions: the original rows, unchanged and in
/// order, followed by the duplicates, each with rating 1.0. If the minority
/// proportion already reaches `target` the input is returned as is.
pub fn upsample(
    interactions: &Interactions,
    representation: &GroupRepresentation,
    target: f32,
    mode: UpsamplingMode,
) -> Result<(Interactions, UpsamplingReport), failure::Error> {
    if !(target > 0.0 && target < 1.0) {
        return Err(ConfigError::InvalidValue {
            name: "upsampling target",
            reason: format!("{} is not in (0, 1)", target),
        }
        .into());
    }

    if representation.num_items() != interactions.num_items() {
        return Err(DataError::ShapeMismatch {
            expected: (interactions.num_items(), 1),
            actual: (representation.num_items(), 1),
        }
        .into());
    }

    interactions.check_bounds()?;

    let original_proportion = minority_proportion(interactions, representation);
    let unchanged = |interactions: &Interactions| {
        (
            interactions.clone(),
            UpsamplingReport {
                original_rows: interactions.len(),
                added_rows: 0,
                original_proportion,
                proportion: original_proportion,
            },
        )
    };

    let minority_rows: Vec<usize> = interactions
        .data()
        .iter()
        .enumerate()
        .filter(|(_, x)| representation.is_minority(x.item_id()))
        .map(|(idx, _)| idx)
        .collect();

    let extra = required_rows(minority_rows.len(), interactions.len(), f64::from(target));

    if mode == UpsamplingMode::None || extra == 0 {
        debug!(
            "Minority proportion {:.4} needs no upsampling towards {:.4}",
            original_proportion, target
        );
        return Ok(unchanged(interactions));
    }

    let popularity = interactions.item_popularity();
    let max_popularity = popularity.iter().cloned().max().unwrap_or(1).max(1) as f32;

    let weights: Vec<f64> = minority_rows
        .iter()
        .map(|&idx| {
            let item_id = interactions.data()[idx].item_id();

            duplication_weight(
                mode,
                representation.minority_share(item_id),
                representation.majority_share(item_id),
                popularity[item_id] as f32 / max_popularity,
            )
        })
        .collect();

    if !weights.iter().any(|&weight| weight > 0.0) {
        warn!(
            "No minority interactions to upsample; proportion stays at {:.4}",
            original_proportion
        );
        return Ok(unchanged(interactions));
    }

    let copies = apportion(&weights, extra);

    let mut rows = interactions.data().to_owned();
    rows.reserve(extra);

    for (&idx, &count) in minority_rows.iter().zip(copies.iter()) {
        let duplicate = interactions.data()[idx].implicit();
        rows.extend(std::iter::repeat(duplicate).take(count));
    }

    let upsampled = Interactions::from_parts(interactions.num_users(), interactions.num_items(), rows);
    let proportion = minority_proportion(&upsampled, representation);

    info!(
        "{} upsampling: {} -> {} rows, minority proportion {:.4} -> {:.4}",
        mode,
        interactions.len(),
        upsampled.len(),
        original_proportion,
        proportion
    );

    let report = UpsamplingReport {
        original_rows: interactions.len(),
        added_rows: extra,
        original_proportion,
        proportion,
    };

    Ok((upsampled, report))
}
