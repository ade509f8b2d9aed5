use ndarray::Array1;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{Error, Result};
use crate::properties::{PropertyKey, PropertyValue};
use crate::UnitId;

/// Spike-sorting result: spike trains per unit plus a property/feature store.
pub trait Sorting: Send + Sync {
    fn unit_ids(&self) -> Vec<UnitId>;

    /// Ascending frame indices of the unit's spikes
    fn spike_train(&self, unit_id: UnitId) -> Result<Vec<u64>>;

    fn get_property(&self, unit_id: UnitId, key: &PropertyKey) -> Option<&PropertyValue>;

    fn set_property(&mut self, unit_id: UnitId, key: PropertyKey, value: PropertyValue)
    -> Result<()>;

    /// Per-spike feature; its length equals the unit's spike count
    fn get_spike_feature(&self, unit_id: UnitId, name: &str) -> Option<&Array1<f32>>;

    fn set_spike_feature(&mut self, unit_id: UnitId, name: &str, values: Array1<f32>)
    -> Result<()>;

    /// Property keys set on a unit
    fn property_keys(&self, unit_id: UnitId) -> Vec<PropertyKey>;

    /// Spike feature names set on a unit
    fn spike_feature_names(&self, unit_id: UnitId) -> Vec<String>;
}

#[derive(Debug, Clone, Default)]
struct UnitEntry {
    spike_train: Vec<u64>,
    properties: BTreeMap<PropertyKey, PropertyValue>,
    features: BTreeMap<String, Array1<f32>>,
}

/// Sorting result held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySorting {
    units: BTreeMap<UnitId, UnitEntry>,
    sampling_frequency: Option<f64>,
}

/// On-disk layout accepted by [`InMemorySorting::from_json_file`]
#[derive(Debug, Deserialize)]
struct SortingFile {
    #[serde(default)]
    sampling_frequency: Option<f64>,
    units: HashMap<String, Vec<u64>>,
}

impl InMemorySorting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sampling_frequency(sampling_frequency: f64) -> Self {
        Self {
            units: BTreeMap::new(),
            sampling_frequency: Some(sampling_frequency),
        }
    }

    pub fn sampling_frequency(&self) -> Option<f64> {
        self.sampling_frequency
    }

    /// Add (or replace) a unit. The spike train must be ascending.
    pub fn add_unit(&mut self, unit_id: UnitId, spike_train: Vec<u64>) -> Result<()> {
        if spike_train.windows(2).any(|pair| pair[0] > pair[1]) {
            return Err(Error::sorting(format!(
                "spike train of unit {unit_id} is not in ascending order"
            )));
        }
        self.units.insert(
            unit_id,
            UnitEntry {
                spike_train,
                ..Default::default()
            },
        );
        Ok(())
    }

    /// Load `{"sampling_frequency": f, "units": {"<id>": [frames...]}}`
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: SortingFile = serde_json::from_str(&contents)?;

        let mut sorting = Self {
            units: BTreeMap::new(),
            sampling_frequency: file.sampling_frequency,
        };
        for (id, mut train) in file.units {
            let unit_id: UnitId = id
                .trim()
                .parse()
                .map_err(|_| Error::sorting(format!("invalid unit id '{id}'")))?;
            train.sort_unstable();
            sorting.add_unit(unit_id, train)?;
        }
        Ok(sorting)
    }

    fn entry(&self, unit_id: UnitId) -> Result<&UnitEntry> {
        self.units
            .get(&unit_id)
            .ok_or_else(|| Error::sorting(format!("unknown unit id {unit_id}")))
    }

    fn entry_mut(&mut self, unit_id: UnitId) -> Result<&mut UnitEntry> {
        self.units
            .get_mut(&unit_id)
            .ok_or_else(|| Error::sorting(format!("unknown unit id {unit_id}")))
    }
}

impl Sorting for InMemorySorting {
    fn unit_ids(&self) -> Vec<UnitId> {
        self.units.keys().copied().collect()
    }

    fn spike_train(&self, unit_id: UnitId) -> Result<Vec<u64>> {
        Ok(self.entry(unit_id)?.spike_train.clone())
    }

    fn get_property(&self, unit_id: UnitId, key: &PropertyKey) -> Option<&PropertyValue> {
        self.units.get(&unit_id)?.properties.get(key)
    }

    fn set_property(
        &mut self,
        unit_id: UnitId,
        key: PropertyKey,
        value: PropertyValue,
    ) -> Result<()> {
        self.entry_mut(unit_id)?.properties.insert(key, value);
        Ok(())
    }

    fn get_spike_feature(&self, unit_id: UnitId, name: &str) -> Option<&Array1<f32>> {
        self.units.get(&unit_id)?.features.get(name)
    }

    fn set_spike_feature(
        &mut self,
        unit_id: UnitId,
        name: &str,
        values: Array1<f32>,
    ) -> Result<()> {
        let entry = self.entry_mut(unit_id)?;
        if values.len() != entry.spike_train.len() {
            return Err(Error::sorting(format!(
                "feature '{name}' has {} values but unit {unit_id} has {} spikes",
                values.len(),
                entry.spike_train.len()
            )));
        }
        entry.features.insert(name.to_string(), values);
        Ok(())
    }

    fn property_keys(&self, unit_id: UnitId) -> Vec<PropertyKey> {
        self.units
            .get(&unit_id)
            .map(|entry| entry.properties.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn spike_feature_names(&self, unit_id: UnitId) -> Vec<String> {
        self.units
            .get(&unit_id)
            .map(|entry| entry.features.keys().cloned().collect())
            .unwrap_or_default()
    }
}
