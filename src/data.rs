//! Interaction containers and train/test splitting.
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::convert::TryFrom;
use std::fmt;
use std::hash::Hasher;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use siphasher::sip::SipHasher;

use crate::{ConfigError, FittingError, ItemId, RawId, Timestamp, UserId};

/// A single implicit-feedback interaction.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Interaction {
    user_id: UserId,
    item_id: ItemId,
    rating: f32,
    timestamp: Timestamp,
}

impl Interaction {
    /// Build a new interaction.
    pub fn new(user_id: UserId, item_id: ItemId, rating: f32, timestamp: Timestamp) -> Self {
        Interaction {
            user_id,
            item_id,
            rating,
            timestamp,
        }
    }

    /// Copy of this interaction with the rating collapsed to an implicit positive.
    pub fn implicit(&self) -> Self {
        Interaction {
            rating: 1.0,
            ..self.clone()
        }
    }

    /// User id.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }
    /// Item id.
    pub fn item_id(&self) -> ItemId {
        self.item_id
    }
    /// Rating.
    pub fn rating(&self) -> f32 {
        self.rating
    }
    /// Timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
}

/// Which side of a split an interaction ended up in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetLabel {
    /// Training set.
    Train,
    /// Held-out test set.
    Test,
}

/// How interactions are divided into train and test sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SplitMode {
    /// Per user, the earliest interactions are train and the latest test.
    TimeUser,
    /// A single global timestamp separates train from test.
    FixedTimestamp,
    /// Per user, a seeded random subset is held out.
    RandomUser,
}

impl FromStr for SplitMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "time_user" | "utime" => Ok(SplitMode::TimeUser),
            "fixed_timestamp" | "fixed" => Ok(SplitMode::FixedTimestamp),
            "random_user" | "urandom" => Ok(SplitMode::RandomUser),
            other => Err(ConfigError::UnknownSplitMode(other.to_owned())),
        }
    }
}

impl TryFrom<String> for SplitMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SplitMode> for String {
    fn from(mode: SplitMode) -> String {
        mode.to_string()
    }
}

impl fmt::Display for SplitMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SplitMode::TimeUser => "time_user",
            SplitMode::FixedTimestamp => "fixed_timestamp",
            SplitMode::RandomUser => "random_user",
        };

        write!(f, "{}", name)
    }
}

/// Parameters of a train/test split.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SplitParameters {
    mode: SplitMode,
    train_ratio: f32,
    min_train: usize,
    min_test: usize,
    timestamp: Option<Timestamp>,
    seed: u64,
}

impl Default for SplitParameters {
    fn default() -> Self {
        SplitParameters::new(SplitMode::TimeUser)
    }
}

impl SplitParameters {
    /// Defaults: 80% train, at least one train and one test interaction per user.
    pub fn new(mode: SplitMode) -> Self {
        SplitParameters {
            mode,
            train_ratio: 0.8,
            min_train: 1,
            min_test: 1,
            timestamp: None,
            seed: 42,
        }
    }

    /// Set the fraction of each user's (or, for fixed splits, all)
    /// interactions that go to the training set.
    pub fn train_ratio(mut self, train_ratio: f32) -> Self {
        self.train_ratio = train_ratio;
        self
    }

    /// Set the minimum number of training interactions per user.
    pub fn min_train(mut self, min_train: usize) -> Self {
        self.min_train = min_train;
        self
    }

    /// Set the minimum number of test interactions per user.
    pub fn min_test(mut self, min_test: usize) -> Self {
        self.min_test = min_test;
        self
    }

    /// Set the global cutoff timestamp used by `SplitMode::FixedTimestamp`.
    /// When absent, the `train_ratio` quantile of all timestamps is used.
    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the seed for random splits.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The split mode.
    pub fn mode(&self) -> SplitMode {
        self.mode
    }

    /// Check the parameters are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.train_ratio > 0.0 && self.train_ratio < 1.0) {
            return Err(ConfigError::InvalidValue {
                name: "train_ratio",
                reason: format!("{} is not in (0, 1)", self.train_ratio),
            });
        }

        Ok(())
    }
}

/// Result of a train/test split. Both sides keep the shape of the input.
#[derive(Clone, Debug)]
pub struct Split {
    /// Training interactions.
    pub train: Interactions,
    /// Test interactions.
    pub test: Interactions,
}

/// Split `interactions` into train and test sets.
///
/// Users that cannot provide `min_train` training and `min_test` test
/// interactions are dropped from both sets; their ids stay valid but have
/// no interactions. Ids outside the declared shape are an error.
pub fn split(interactions: &Interactions, params: &SplitParameters) -> Result<Split, failure::Error> {
    params.validate()?;
    interactions.check_bounds()?;

    let split = match params.mode {
        SplitMode::TimeUser => per_user_split(interactions, params, |user| user.sorted_by_time()),
        SplitMode::RandomUser => {
            let mut rng = XorShiftRng::seed_from_u64(params.seed);
            let (key_0, key_1) = (rng.gen::<u64>(), rng.gen::<u64>());

            per_user_split(interactions, params, |user| {
                let mut rows = user.sorted_by_time();
                rows.sort_by_key(|&(item_id, timestamp)| {
                    let mut hasher = SipHasher::new_with_keys(key_0, key_1);
                    hasher.write_usize(user.user_id);
                    hasher.write_usize(item_id);
                    hasher.write_usize(timestamp);
                    hasher.finish()
                });
                rows
            })
        }
        SplitMode::FixedTimestamp => fixed_timestamp_split(interactions, params),
    };

    info!(
        "{} split: {} train and {} test interactions",
        params.mode,
        split.train.len(),
        split.test.len()
    );

    Ok(split)
}

fn per_user_split<F>(interactions: &Interactions, params: &SplitParameters, order: F) -> Split
where
    F: Fn(&CompressedInteractionsUser) -> Vec<(ItemId, Timestamp)>,
{
    let mut train = Interactions::new(interactions.num_users(), interactions.num_items());
    let mut test = Interactions::new(interactions.num_users(), interactions.num_items());
    let mut dropped = 0;

    let compressed = interactions.to_compressed();

    for user in compressed.iter_users() {
        if user.is_empty() {
            continue;
        }

        let num_interactions = user.len();

        if num_interactions < params.min_train + params.min_test {
            dropped += 1;
            continue;
        }

        let num_train = ((num_interactions as f32 * params.train_ratio).floor() as usize)
            .max(params.min_train)
            .min(num_interactions - params.min_test);

        for (idx, (item_id, timestamp)) in order(&user).into_iter().enumerate() {
            let interaction = Interaction::new(user.user_id, item_id, 1.0, timestamp);

            if idx < num_train {
                train.push(interaction);
            } else {
                test.push(interaction);
            }
        }
    }

    if dropped > 0 {
        debug!(
            "Dropped {} users with fewer than {} interactions",
            dropped,
            params.min_train + params.min_test
        );
    }

    Split { train, test }
}

fn fixed_timestamp_split(interactions: &Interactions, params: &SplitParameters) -> Split {
    let cutoff = params.timestamp.unwrap_or_else(|| {
        let mut timestamps: Vec<Timestamp> =
            interactions.data().iter().map(|x| x.timestamp()).collect();
        timestamps.sort_unstable();

        let idx = (timestamps.len() as f32 * params.train_ratio) as usize;
        timestamps.get(idx).cloned().unwrap_or(Timestamp::max_value())
    });

    let mut counts: HashMap<UserId, (usize, usize)> = HashMap::new();

    for interaction in interactions.data() {
        let entry = counts.entry(interaction.user_id()).or_insert((0, 0));

        if interaction.timestamp() < cutoff {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }

    let is_eligible = |user_id: UserId| {
        counts
            .get(&user_id)
            .map(|&(num_train, num_test)| num_train >= params.min_train && num_test >= params.min_test)
            .unwrap_or(false)
    };

    debug!(
        "Fixed timestamp split at {}: {} of {} users eligible",
        cutoff,
        counts.keys().filter(|&&user_id| is_eligible(user_id)).count(),
        counts.len()
    );

    let (train, test) = interactions
        .split_by(|x| is_eligible(x.user_id()))
        .0
        .split_by(|x| x.timestamp() < cutoff);

    Split {
        train: train.implicit(),
        test: test.implicit(),
    }
}

/// Maps raw dataset ids onto dense `[0, n)` indices.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IdMapping {
    raw_ids: Vec<RawId>,
    dense_ids: HashMap<RawId, usize>,
}

impl IdMapping {
    /// Build a mapping over the distinct values of `raw_ids`, in ascending order.
    pub fn fit<I: IntoIterator<Item = RawId>>(raw_ids: I) -> Self {
        let raw_ids: Vec<RawId> = raw_ids
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let dense_ids = raw_ids
            .iter()
            .enumerate()
            .map(|(dense, &raw)| (raw, dense))
            .collect();

        IdMapping { raw_ids, dense_ids }
    }

    /// Dense id of a raw id.
    pub fn dense(&self, raw_id: RawId) -> Option<usize> {
        self.dense_ids.get(&raw_id).cloned()
    }

    /// Raw id of a dense id.
    pub fn raw(&self, dense_id: usize) -> Option<RawId> {
        self.raw_ids.get(dense_id).cloned()
    }

    /// Number of distinct ids.
    pub fn len(&self) -> usize {
        self.raw_ids.len()
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.raw_ids.is_empty()
    }
}

/// A collection of interactions with a fixed `(num_users, num_items)` shape.
#[derive(Clone, Debug)]
pub struct Interactions {
    num_users: usize,
    num_items: usize,
    interactions: Vec<Interaction>,
}

impl Interactions {
    /// Empty interactions of a given shape.
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Interactions {
            num_users,
            num_items,
            interactions: Vec::new(),
        }
    }

    /// Interactions of a given shape.
    pub fn from_parts(num_users: usize, num_items: usize, interactions: Vec<Interaction>) -> Self {
        Interactions {
            num_users,
            num_items,
            interactions,
        }
    }

    /// The raw interactions.
    pub fn data(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Number of interactions.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether there are no interactions.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Append an interaction.
    pub fn push(&mut self, interaction: Interaction) {
        self.interactions.push(interaction);
    }

    /// Shuffle the interactions in place.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        self.interactions.shuffle(rng);
    }

    /// Split into interactions that satisfy `func` and those that don't.
    pub fn split_by<F: Fn(&Interaction) -> bool>(&self, func: F) -> (Self, Self) {
        let (head, tail): (Vec<_>, Vec<_>) = self.interactions.iter().cloned().partition(|x| func(x));

        (
            Interactions::from_parts(self.num_users, self.num_items, head),
            Interactions::from_parts(self.num_users, self.num_items, tail),
        )
    }

    /// Copy with every rating collapsed to 1.0.
    pub fn implicit(&self) -> Self {
        Interactions::from_parts(
            self.num_users,
            self.num_items,
            self.interactions.iter().map(|x| x.implicit()).collect(),
        )
    }

    /// Number of interactions per item.
    pub fn item_popularity(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_items];

        for interaction in &self.interactions {
            if let Some(count) = counts.get_mut(interaction.item_id()) {
                *count += 1;
            }
        }

        counts
    }

    /// Check that every interaction lies within the declared shape.
    pub fn check_bounds(&self) -> Result<(), FittingError> {
        for interaction in &self.interactions {
            if interaction.user_id() >= self.num_users || interaction.item_id() >= self.num_items {
                return Err(FittingError::OutOfRange {
                    user_id: interaction.user_id(),
                    item_id: interaction.item_id(),
                    num_users: self.num_users,
                    num_items: self.num_items,
                });
            }
        }

        Ok(())
    }

    /// Columnar view for minibatch training.
    pub fn to_triplet(&self) -> TripletInteractions {
        TripletInteractions::from(self)
    }

    /// Per-user view sorted by timestamp.
    pub fn to_compressed(&self) -> CompressedInteractions {
        CompressedInteractions::from(self)
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// `(num_users, num_items)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

impl From<Vec<Interaction>> for Interactions {
    fn from(data: Vec<Interaction>) -> Interactions {
        let num_users = data.iter().map(|x| x.user_id()).max().map_or(0, |x| x + 1);
        let num_items = data.iter().map(|x| x.item_id()).max().map_or(0, |x| x + 1);

        Interactions {
            num_users,
            num_items,
            interactions: data,
        }
    }
}

fn cmp_timestamp(x: &Interaction, y: &Interaction) -> Ordering {
    let uid_comparison = x.user_id().cmp(&y.user_id());

    if uid_comparison == Ordering::Equal {
        x.timestamp()
            .cmp(&y.timestamp())
            .then(x.item_id().cmp(&y.item_id()))
    } else {
        uid_comparison
    }
}

/// Interactions grouped by user, each user's items sorted by timestamp.
#[derive(Clone, Debug)]
pub struct CompressedInteractions {
    num_users: usize,
    num_items: usize,
    user_pointers: Vec<usize>,
    item_ids: Vec<ItemId>,
    timestamps: Vec<Timestamp>,
}

impl<'a> From<&'a Interactions> for CompressedInteractions {
    fn from(interactions: &Interactions) -> CompressedInteractions {
        let mut data = interactions.data().to_owned();

        data.sort_by(cmp_timestamp);

        let mut user_pointers = vec![0; interactions.num_users + 1];
        let mut item_ids = Vec::with_capacity(data.len());
        let mut timestamps = Vec::with_capacity(data.len());

        for datum in &data {
            item_ids.push(datum.item_id());
            timestamps.push(datum.timestamp());

            user_pointers[datum.user_id() + 1] += 1;
        }

        for idx in 1..user_pointers.len() {
            user_pointers[idx] += user_pointers[idx - 1];
        }

        CompressedInteractions {
            num_users: interactions.num_users,
            num_items: interactions.num_items,
            user_pointers,
            item_ids,
            timestamps,
        }
    }
}

impl CompressedInteractions {
    /// Iterate over all users, including those without interactions.
    pub fn iter_users(&self) -> CompressedInteractionsUserIterator {
        CompressedInteractionsUserIterator {
            interactions: &self,
            idx: 0,
        }
    }

    /// Interactions of a single user.
    pub fn get_user(&self, user_id: UserId) -> Option<CompressedInteractionsUser> {
        if user_id >= self.num_users {
            return None;
        }

        let start = self.user_pointers[user_id];
        let stop = self.user_pointers[user_id + 1];

        Some(CompressedInteractionsUser {
            user_id,
            item_ids: &self.item_ids[start..stop],
            timestamps: &self.timestamps[start..stop],
        })
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// `(num_users, num_items)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

/// Iterator over the users of `CompressedInteractions`.
pub struct CompressedInteractionsUserIterator<'a> {
    interactions: &'a CompressedInteractions,
    idx: usize,
}

/// A single user's interactions.
#[derive(Debug)]
pub struct CompressedInteractionsUser<'a> {
    /// User id.
    pub user_id: UserId,
    /// Items, oldest first.
    pub item_ids: &'a [ItemId],
    /// Timestamps matching `item_ids`.
    pub timestamps: &'a [Timestamp],
}

impl<'a> CompressedInteractionsUser<'a> {
    /// Number of interactions.
    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    /// Whether the user has no interactions.
    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }

    fn sorted_by_time(&self) -> Vec<(ItemId, Timestamp)> {
        self.item_ids
            .iter()
            .cloned()
            .zip(self.timestamps.iter().cloned())
            .collect()
    }
}

impl<'a> Iterator for CompressedInteractionsUserIterator<'a> {
    type Item = CompressedInteractionsUser<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        let value = self.interactions.get_user(self.idx);

        self.idx += 1;

        value
    }
}

/// Columnar interactions used for minibatch training.
#[derive(Clone, Debug)]
pub struct TripletInteractions {
    num_users: usize,
    num_items: usize,
    user_ids: Vec<UserId>,
    item_ids: Vec<ItemId>,
}

impl TripletInteractions {
    /// Number of interactions.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether there are no interactions.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// Shuffle rows, keeping user and item columns aligned.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);

        self.user_ids = order.iter().map(|&idx| self.user_ids[idx]).collect();
        self.item_ids = order.iter().map(|&idx| self.item_ids[idx]).collect();
    }

    /// Split off the last `fraction` of rows, e.g. for validation.
    pub fn split_tail(&self, fraction: f32) -> (Self, Self) {
        let num_tail = ((self.len() as f32 * fraction).round() as usize).min(self.len());
        let idx = self.len() - num_tail;

        let head = TripletInteractions {
            num_users: self.num_users,
            num_items: self.num_items,
            user_ids: self.user_ids[..idx].to_owned(),
            item_ids: self.item_ids[..idx].to_owned(),
        };
        let tail = TripletInteractions {
            num_users: self.num_users,
            num_items: self.num_items,
            user_ids: self.user_ids[idx..].to_owned(),
            item_ids: self.item_ids[idx..].to_owned(),
        };

        (head, tail)
    }

    /// Iterate in minibatches; the last one may be shorter.
    pub fn iter_minibatch(&self, minibatch_size: usize) -> TripletMinibatchIterator {
        TripletMinibatchIterator {
            interactions: &self,
            idx: 0,
            minibatch_size: minibatch_size.max(1),
        }
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.num_users
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.num_items
    }

    /// `(num_users, num_items)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_items)
    }
}

/// Minibatch iterator over `TripletInteractions`.
#[derive(Clone, Debug)]
pub struct TripletMinibatchIterator<'a> {
    interactions: &'a TripletInteractions,
    idx: usize,
    minibatch_size: usize,
}

/// A minibatch of (user, positive item) pairs.
#[derive(Debug)]
pub struct TripletMinibatch<'a> {
    /// User ids.
    pub user_ids: &'a [UserId],
    /// Positive item ids.
    pub item_ids: &'a [ItemId],
}

impl<'a> TripletMinibatch<'a> {
    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }
}

impl<'a> Iterator for TripletMinibatchIterator<'a> {
    type Item = TripletMinibatch<'a>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.interactions.len() {
            return None;
        }

        let start = self.idx;
        let stop = (self.idx + self.minibatch_size).min(self.interactions.len());

        self.idx = stop;

        Some(TripletMinibatch {
            user_ids: &self.interactions.user_ids[start..stop],
            item_ids: &self.interactions.item_ids[start..stop],
        })
    }
}

impl<'a> From<&'a Interactions> for TripletInteractions {
    fn from(interactions: &'a Interactions) -> Self {
        let user_ids = interactions.data().iter().map(|x| x.user_id()).collect();
        let item_ids = interactions.data().iter().map(|x| x.item_id()).collect();

        TripletInteractions {
            num_users: interactions.num_users,
            num_items: interactions.num_items,
            user_ids,
            item_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Interactions {
        // User 0: 5 interactions, user 1: 3, user 2: 1.
        let mut rows = Vec::new();
        for (item, ts) in [(0, 50), (1, 10), (2, 40), (3, 20), (4, 30)].iter() {
            rows.push(Interaction::new(0, *item, 4.0, *ts));
        }
        for (item, ts) in [(1, 5), (2, 15), (5, 25)].iter() {
            rows.push(Interaction::new(1, *item, 3.0, *ts));
        }
        rows.push(Interaction::new(2, 0, 5.0, 60));

        Interactions::from(rows)
    }

    #[test]
    fn time_split_keeps_latest_for_test() {
        let data = sample();
        let params = SplitParameters::new(SplitMode::TimeUser).train_ratio(0.6);

        let split = split(&data, &params).unwrap();

        let test = split.test.to_compressed();
        assert_eq!(test.get_user(0).unwrap().item_ids, &[2, 0]);
        assert_eq!(test.get_user(1).unwrap().item_ids, &[2, 5]);

        let train = split.train.to_compressed();
        assert_eq!(train.get_user(0).unwrap().item_ids, &[1, 3, 4]);

        // User 2 is below min_train + min_test.
        assert!(train.get_user(2).unwrap().is_empty());
        assert!(test.get_user(2).unwrap().is_empty());

        assert_eq!(split.train.shape(), data.shape());
        assert!(split.train.data().iter().all(|x| x.rating() == 1.0));
    }

    #[test]
    fn minimum_counts_are_respected() {
        let data = sample();
        let params = SplitParameters::new(SplitMode::TimeUser)
            .train_ratio(0.9)
            .min_train(2)
            .min_test(2);

        let split = split(&data, &params).unwrap();

        // User 0 has 5 interactions: 0.9 * 5 = 4 train, capped to 3.
        let test = split.test.to_compressed();
        assert_eq!(test.get_user(0).unwrap().len(), 2);
        // User 1 has only 3 < 4 interactions and is dropped.
        assert!(test.get_user(1).unwrap().is_empty());
        assert_eq!(split.train.len() + split.test.len(), 5);
    }

    #[test]
    fn random_split_is_seeded_and_disjoint() {
        let data = sample();
        let params = SplitParameters::new(SplitMode::RandomUser)
            .train_ratio(0.6)
            .seed(7);

        let first = split(&data, &params).unwrap();
        let second = split(&data, &params).unwrap();

        assert_eq!(first.train.data(), second.train.data());
        assert_eq!(first.test.data(), second.test.data());

        for test_row in first.test.data() {
            assert!(!first
                .train
                .data()
                .iter()
                .any(|x| x.user_id() == test_row.user_id() && x.item_id() == test_row.item_id()));
        }
        assert_eq!(first.train.len() + first.test.len(), 8);
    }

    #[test]
    fn fixed_timestamp_split_drops_ineligible_users() {
        let data = sample();
        let params = SplitParameters::new(SplitMode::FixedTimestamp).timestamp(30);

        let split = split(&data, &params).unwrap();

        assert!(split.train.data().iter().all(|x| x.timestamp() < 30));
        assert!(split.test.data().iter().all(|x| x.timestamp() >= 30));
        // User 1 has nothing after the cutoff, user 2 nothing before it.
        assert!(split
            .train
            .data()
            .iter()
            .chain(split.test.data())
            .all(|x| x.user_id() == 0));
    }

    #[test]
    fn unknown_split_mode() {
        let error = "by_genre".parse::<SplitMode>().unwrap_err();
        assert_eq!(format!("{}", error), "Unknown split mode: by_genre.");
        assert_eq!("utime".parse::<SplitMode>().unwrap(), SplitMode::TimeUser);
    }

    #[test]
    fn minibatches_cover_all_rows() {
        let triplets = sample().to_triplet();
        let sizes: Vec<usize> = triplets.iter_minibatch(4).map(|x| x.len()).collect();

        assert_eq!(sizes, vec![4, 4, 1]);
    }

    #[test]
    fn id_mapping_is_dense_and_sorted() {
        let mapping = IdMapping::fit(vec![30, 10, 20, 10]);

        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.dense(10), Some(0));
        assert_eq!(mapping.dense(30), Some(2));
        assert_eq!(mapping.raw(1), Some(20));
        assert_eq!(mapping.dense(99), None);
    }

    #[test]
    fn out_of_range_interactions() {
        let data = Interactions::from_parts(2, 2, vec![Interaction::new(0, 3, 1.0, 0)]);

        match data.check_bounds() {
            Err(FittingError::OutOfRange { item_id, .. }) => assert_eq!(item_id, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn splitting_out_of_range_interactions_fails() {
        let data = Interactions::from_parts(
            2,
            3,
            vec![Interaction::new(0, 0, 1.0, 0), Interaction::new(7, 1, 1.0, 1)],
        );

        for &mode in &[SplitMode::TimeUser, SplitMode::RandomUser, SplitMode::FixedTimestamp] {
            let error = split(&data, &SplitParameters::new(mode)).unwrap_err();

            match error.downcast_ref::<FittingError>() {
                Some(FittingError::OutOfRange { user_id, .. }) => assert_eq!(*user_id, 7),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
