//! Readers for the interaction dataset and the provider table.
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::data::{IdMapping, Interaction, Interactions};
use crate::groups::ProviderShare;
use crate::{RawId, Timestamp};

/// A row of the interaction file. Extra columns such as `type` and
/// `type_id` are ignored.
#[derive(Debug, Deserialize)]
struct RawInteraction {
    user_id: RawId,
    item_id: RawId,
    #[serde(default = "default_rating")]
    rating: f32,
    #[serde(default)]
    timestamp: Timestamp,
}

fn default_rating() -> f32 {
    1.0
}

/// Deserialize every well-formed row. Malformed rows (unparsable fields,
/// missing ids, wrong field counts) are skipped; I/O errors are not.
fn read_rows<T: DeserializeOwned, R: Read>(reader: R, what: &str) -> Result<Vec<T>, failure::Error> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    let mut skipped = 0;

    for row in reader.deserialize() {
        match row {
            Ok(row) => rows.push(row),
            Err(error) => {
                if error.is_io_error() {
                    return Err(error.into());
                }
                debug!("Skipping malformed {} row: {}", what, error);
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {} malformed {} rows", skipped, what);
    }

    Ok(rows)
}

/// Interactions with dense ids and the mappings back to the raw ones.
#[derive(Clone, Debug)]
pub struct Dataset {
    /// Interactions over dense ids.
    pub interactions: Interactions,
    /// Raw user ids.
    pub users: IdMapping,
    /// Raw item ids.
    pub items: IdMapping,
}

/// Read interactions from CSV with a `user_id,item_id,rating,timestamp`
/// header, remapping raw ids onto dense ones. Malformed rows are dropped.
pub fn read_interactions<R: Read>(reader: R) -> Result<Dataset, failure::Error> {
    let rows: Vec<RawInteraction> = read_rows(reader, "interaction")?;

    let users = IdMapping::fit(rows.iter().map(|x| x.user_id));
    let items = IdMapping::fit(rows.iter().map(|x| x.item_id));

    let mut interactions = Interactions::new(users.len(), items.len());

    for row in &rows {
        // Both mappings were fitted on these rows.
        if let (Some(user_id), Some(item_id)) = (users.dense(row.user_id), items.dense(row.item_id)) {
            interactions.push(Interaction::new(user_id, item_id, row.rating, row.timestamp));
        }
    }

    info!(
        "Read {} interactions of {} users with {} items",
        interactions.len(),
        users.len(),
        items.len()
    );

    Ok(Dataset {
        interactions,
        users,
        items,
    })
}

/// Load an interaction CSV file.
pub fn load_interactions<P: AsRef<Path>>(path: P) -> Result<Dataset, failure::Error> {
    debug!("Loading interactions from {}", path.as_ref().display());

    read_interactions(File::open(path)?)
}

/// Read the provider table: `item_id,gender_1_fraction,gender_2_fraction`,
/// with empty cells for unknown fractions. Rows without a parsable item id
/// are dropped; duplicates are left for `GroupRepresentation::estimate`.
pub fn read_providers<R: Read>(reader: R) -> Result<Vec<ProviderShare>, failure::Error> {
    let rows: Vec<ProviderShare> = read_rows(reader, "provider")?;

    let incomplete = rows
        .iter()
        .filter(|x| x.gender_1_fraction.is_none() || x.gender_2_fraction.is_none())
        .count();

    info!("Read {} provider rows, {} with missing fractions", rows.len(), incomplete);

    Ok(rows)
}

/// Load a provider table file.
pub fn load_providers<P: AsRef<Path>>(path: P) -> Result<Vec<ProviderShare>, failure::Error> {
    debug!("Loading provider table from {}", path.as_ref().display());

    read_providers(File::open(path)?)
}
