//! Provider-group representation of items.
//!
//! Each item has a `minority_share`, the fraction of its providers that
//! belong to the protected group, and a `majority_share` for the other
//! group. Providers of unknown gender are counted towards the minority, so
//! a missing protected fraction resolves to 1.0 and a missing majority
//! fraction to 0.0. The two shares therefore need not sum to one.
use std::collections::HashMap;

use crate::data::IdMapping;
use crate::{DataError, ItemId, RawId};

/// Share of an item's providers in the protected group when it is unknown.
pub const DEFAULT_MINORITY_SHARE: f32 = 1.0;
/// Share of an item's providers in the majority group when it is unknown.
pub const DEFAULT_MAJORITY_SHARE: f32 = 0.0;

/// Group an item is associated with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemGroup {
    /// Over-represented group; for popularity partitions, the head items.
    Majority,
    /// Protected group; for popularity partitions, the long-tail items.
    Minority,
}

impl ItemGroup {
    /// Both groups, in a fixed order.
    pub const ALL: [ItemGroup; 2] = [ItemGroup::Majority, ItemGroup::Minority];

    /// Position in `ALL`.
    pub fn index(self) -> usize {
        match self {
            ItemGroup::Majority => 0,
            ItemGroup::Minority => 1,
        }
    }
}

/// One row of the provider table. Empty cells are `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderShare {
    /// Raw item id.
    pub item_id: RawId,
    /// Fraction of providers in the protected group.
    pub gender_1_fraction: Option<f32>,
    /// Fraction of providers in the majority group.
    pub gender_2_fraction: Option<f32>,
}

/// Per-item group shares, indexed by dense item id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupRepresentation {
    minority_share: Vec<f32>,
    majority_share: Vec<f32>,
}

impl GroupRepresentation {
    /// Estimate shares for every item in `items`.
    ///
    /// Items absent from `table` get the default shares. Rows whose item is
    /// not in `items` are ignored. A table that lists an item twice is
    /// rejected.
    pub fn estimate(table: &[ProviderShare], items: &IdMapping) -> Result<Self, DataError> {
        let mut rows: HashMap<RawId, &ProviderShare> = HashMap::with_capacity(table.len());

        for row in table {
            if rows.insert(row.item_id, row).is_some() {
                return Err(DataError::DuplicateItem(row.item_id));
            }
        }

        let mut minority_share = vec![DEFAULT_MINORITY_SHARE; items.len()];
        let mut majority_share = vec![DEFAULT_MAJORITY_SHARE; items.len()];
        let mut unmatched = 0;

        for (item_id, (minority, majority)) in minority_share
            .iter_mut()
            .zip(majority_share.iter_mut())
            .enumerate()
        {
            let row = items.raw(item_id).and_then(|raw_id| rows.get(&raw_id));

            match row {
                Some(row) => {
                    *minority = row.gender_1_fraction.unwrap_or(DEFAULT_MINORITY_SHARE);
                    *majority = row.gender_2_fraction.unwrap_or(DEFAULT_MAJORITY_SHARE);
                }
                None => unmatched += 1,
            }
        }

        if unmatched > 0 {
            debug!(
                "{} of {} items have no provider row and default to the minority group",
                unmatched,
                items.len()
            );
        }

        Ok(GroupRepresentation {
            minority_share,
            majority_share,
        })
    }

    /// Build directly from dense per-item shares.
    pub fn from_shares(minority_share: Vec<f32>, majority_share: Vec<f32>) -> Result<Self, DataError> {
        if minority_share.len() != majority_share.len() {
            return Err(DataError::ShapeMismatch {
                expected: (minority_share.len(), 1),
                actual: (majority_share.len(), 1),
            });
        }

        Ok(GroupRepresentation {
            minority_share,
            majority_share,
        })
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.minority_share.len()
    }

    /// Minority share of an item.
    pub fn minority_share(&self, item_id: ItemId) -> f32 {
        self.minority_share[item_id]
    }

    /// Majority share of an item.
    pub fn majority_share(&self, item_id: ItemId) -> f32 {
        self.majority_share[item_id]
    }

    /// All minority shares.
    pub fn minority_shares(&self) -> &[f32] {
        &self.minority_share
    }

    /// Whether an item is associated with the minority group.
    pub fn is_minority(&self, item_id: ItemId) -> bool {
        self.minority_share[item_id] > 0.0
    }

    /// Group assignment of every item: minority iff its minority share is positive.
    pub fn assignment(&self) -> Vec<ItemGroup> {
        (0..self.num_items())
            .map(|item_id| {
                if self.is_minority(item_id) {
                    ItemGroup::Minority
                } else {
                    ItemGroup::Majority
                }
            })
            .collect()
    }
}

/// Partition items into head (`Majority`) and long tail (`Minority`).
///
/// Items are taken in decreasing popularity until they account for
/// `head_fraction` of all interactions; those form the head. Items with
/// equal popularity are ordered by id.
pub fn head_tail_partition(popularity: &[usize], head_fraction: f32) -> Vec<ItemGroup> {
    let total: usize = popularity.iter().sum();
    let budget = (total as f64 * head_fraction as f64).ceil() as usize;

    let mut order: Vec<ItemId> = (0..popularity.len()).collect();
    order.sort_by(|&a, &b| popularity[b].cmp(&popularity[a]).then(a.cmp(&b)));

    let mut groups = vec![ItemGroup::Minority; popularity.len()];
    let mut covered = 0;

    for item_id in order {
        if covered >= budget || popularity[item_id] == 0 {
            break;
        }

        groups[item_id] = ItemGroup::Majority;
        covered += popularity[item_id];
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(item_id: RawId, first: Option<f32>, second: Option<f32>) -> ProviderShare {
        ProviderShare {
            item_id,
            gender_1_fraction: first,
            gender_2_fraction: second,
        }
    }

    #[test]
    fn missing_fractions_use_defaults() {
        let items = IdMapping::fit(vec![10, 20, 30, 40]);
        let table = vec![
            row(10, Some(0.25), Some(0.75)),
            row(20, None, Some(0.5)),
            row(30, Some(0.0), None),
        ];

        let representation = GroupRepresentation::estimate(&table, &items).unwrap();

        assert_eq!(representation.minority_share(0), 0.25);
        assert_eq!(representation.majority_share(0), 0.75);
        // Missing group-1 fraction counts as fully minority.
        assert_eq!(representation.minority_share(1), 1.0);
        assert_eq!(representation.majority_share(1), 0.5);
        // Missing group-2 fraction counts as zero.
        assert_eq!(representation.minority_share(2), 0.0);
        assert_eq!(representation.majority_share(2), 0.0);
        // No row at all.
        assert_eq!(representation.minority_share(3), 1.0);
        assert_eq!(representation.majority_share(3), 0.0);

        // Shares need not sum to one.
        assert_eq!(representation.minority_share(1) + representation.majority_share(1), 1.5);

        assert_eq!(
            representation.assignment(),
            vec![
                ItemGroup::Minority,
                ItemGroup::Minority,
                ItemGroup::Majority,
                ItemGroup::Minority
            ]
        );
    }

    #[test]
    fn duplicate_items_are_rejected() {
        let items = IdMapping::fit(vec![10]);
        let table = vec![row(10, Some(0.5), None), row(10, Some(0.1), None)];

        match GroupRepresentation::estimate(&table, &items) {
            Err(DataError::DuplicateItem(10)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn head_tail() {
        let popularity = vec![1, 10, 0, 5, 4];

        let groups = head_tail_partition(&popularity, 0.5);

        // 20 interactions: item 1 alone covers half of them.
        assert_eq!(
            groups,
            vec![
                ItemGroup::Minority,
                ItemGroup::Majority,
                ItemGroup::Minority,
                ItemGroup::Minority,
                ItemGroup::Minority
            ]
        );

        let groups = head_tail_partition(&popularity, 0.6);
        assert_eq!(groups[3], ItemGroup::Majority);
        assert_eq!(groups[4], ItemGroup::Minority);
    }
}
