//! Keyed artifacts of an experiment run.
//!
//! Splits are stored as CSV with a `set` column and the original ids next
//! to the dense ones. Relevance matrices and metric bags are stored as JSON
//! under a `dataset-split-model` key.
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::data::{IdMapping, Interaction, Interactions, SetLabel, Split};
use crate::evaluation::MetricsBag;
use crate::{DataError, ItemId, RawId, Timestamp, UserId};

#[derive(Debug, Serialize, Deserialize)]
struct SplitRow {
    user_id: UserId,
    item_id: ItemId,
    rating: f32,
    timestamp: Timestamp,
    set: String,
    original_user_id: Option<RawId>,
    original_item_id: Option<RawId>,
}

fn set_name(label: SetLabel) -> &'static str {
    match label {
        SetLabel::Train => "train",
        SetLabel::Test => "test",
    }
}

fn parse_set(name: &str) -> Result<SetLabel, DataError> {
    match name {
        "train" => Ok(SetLabel::Train),
        "test" => Ok(SetLabel::Test),
        other => Err(DataError::UnknownSetLabel(other.to_owned())),
    }
}

/// Write a split as CSV, train rows first.
pub fn write_split<W: Write>(
    writer: W,
    split: &Split,
    users: &IdMapping,
    items: &IdMapping,
) -> Result<(), failure::Error> {
    let mut writer = csv::Writer::from_writer(writer);

    for (label, interactions) in &[(SetLabel::Train, &split.train), (SetLabel::Test, &split.test)] {
        for interaction in interactions.data() {
            writer.serialize(SplitRow {
                user_id: interaction.user_id(),
                item_id: interaction.item_id(),
                rating: interaction.rating(),
                timestamp: interaction.timestamp(),
                set: set_name(*label).to_owned(),
                original_user_id: users.raw(interaction.user_id()),
                original_item_id: items.raw(interaction.item_id()),
            })?;
        }
    }

    writer.flush()?;

    Ok(())
}

/// Read a split written by `write_split`. Both sides get `shape`.
pub fn read_split<R: Read>(reader: R, shape: (usize, usize)) -> Result<Split, failure::Error> {
    let mut reader = csv::Reader::from_reader(reader);
    let (num_users, num_items) = shape;

    let mut train = Interactions::new(num_users, num_items);
    let mut test = Interactions::new(num_users, num_items);

    for row in reader.deserialize() {
        let row: SplitRow = row?;
        let interaction = Interaction::new(row.user_id, row.item_id, row.rating, row.timestamp);

        match parse_set(&row.set)? {
            SetLabel::Train => train.push(interaction),
            SetLabel::Test => test.push(interaction),
        }
    }

    train.check_bounds()?;
    test.check_bounds()?;

    Ok(Split { train, test })
}

/// Directory of keyed artifacts.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Store artifacts under `root`, creating it if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, failure::Error> {
        let root = root.as_ref().to_owned();

        if !root.exists() {
            create_dir_all(&root)?;
        }

        Ok(ArtifactStore { root })
    }

    /// Path of an artifact.
    pub fn path(&self, key: &str, kind: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{}.{}.{}", key, kind, extension))
    }

    fn save_json<T: Serialize>(&self, path: PathBuf, value: &T) -> Result<PathBuf, failure::Error> {
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;

        debug!("Wrote {}", path.display());

        Ok(path)
    }

    fn load_json<T: DeserializeOwned>(&self, path: PathBuf) -> Result<T, failure::Error> {
        let reader = BufReader::new(File::open(&path)?);

        Ok(serde_json::from_reader(reader)?)
    }

    /// Persist a split under `key`.
    pub fn save_split(
        &self,
        key: &str,
        split: &Split,
        users: &IdMapping,
        items: &IdMapping,
    ) -> Result<PathBuf, failure::Error> {
        let path = self.path(key, "split", "csv");
        write_split(BufWriter::new(File::create(&path)?), split, users, items)?;

        debug!("Wrote {}", path.display());

        Ok(path)
    }

    /// Load a split persisted under `key`.
    pub fn load_split(&self, key: &str, shape: (usize, usize)) -> Result<Split, failure::Error> {
        read_split(BufReader::new(File::open(self.path(key, "split", "csv"))?), shape)
    }

    /// Persist a relevance matrix under `key`.
    pub fn save_relevance(&self, key: &str, relevance: &Array2<f32>) -> Result<PathBuf, failure::Error> {
        self.save_json(self.path(key, "relevance", "json"), relevance)
    }

    /// Load a relevance matrix persisted under `key`.
    pub fn load_relevance(&self, key: &str) -> Result<Array2<f32>, failure::Error> {
        self.load_json(self.path(key, "relevance", "json"))
    }

    /// Persist a metrics bag under `key`.
    pub fn save_metrics(&self, key: &str, metrics: &MetricsBag) -> Result<PathBuf, failure::Error> {
        self.save_json(self.path(key, "metrics", "json"), metrics)
    }

    /// Load a metrics bag persisted under `key`.
    pub fn load_metrics(&self, key: &str) -> Result<MetricsBag, failure::Error> {
        self.load_json(self.path(key, "metrics", "json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split() -> Split {
        let train = Interactions::from_parts(
            2,
            3,
            vec![Interaction::new(0, 0, 1.0, 1), Interaction::new(1, 2, 1.0, 2)],
        );
        let test = Interactions::from_parts(2, 3, vec![Interaction::new(0, 1, 1.0, 5)]);

        Split { train, test }
    }

    #[test]
    fn split_csv_keeps_sets_and_original_ids() {
        let users = IdMapping::fit(vec![7, 9]);
        let items = IdMapping::fit(vec![100, 200, 300]);

        let mut buffer = Vec::new();
        write_split(&mut buffer, &split(), &users, &items).unwrap();

        let text = String::from_utf8(buffer.clone()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("user_id,item_id,rating,timestamp,set,original_user_id,original_item_id")
        );
        assert_eq!(lines.next(), Some("0,0,1.0,1,train,7,100"));
        assert_eq!(text.lines().last(), Some("0,1,1.0,5,test,7,200"));

        let restored = read_split(buffer.as_slice(), (2, 3)).unwrap();
        assert_eq!(restored.train.data(), split().train.data());
        assert_eq!(restored.test.data(), split().test.data());
    }

    #[test]
    fn unknown_set_label_fails() {
        let data = "\
user_id,item_id,rating,timestamp,set,original_user_id,original_item_id
0,0,1.0,1,validation,7,100
";
        let error = read_split(data.as_bytes(), (1, 1)).unwrap_err();

        match error.downcast_ref::<DataError>() {
            Some(DataError::UnknownSetLabel(label)) => assert_eq!(label, "validation"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn relevance_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("artifacts")).unwrap();
        let relevance = ndarray::arr2(&[[0.5, -1.25], [3.0, 0.0]]);

        let path = store.save_relevance("toy-time_user-pairwise", &relevance).unwrap();

        assert!(path.ends_with("toy-time_user-pairwise.relevance.json"));
        assert_eq!(store.load_relevance("toy-time_user-pairwise").unwrap(), relevance);
        assert!(store.load_relevance("toy-time_user-pointwise").is_err());
    }
}
