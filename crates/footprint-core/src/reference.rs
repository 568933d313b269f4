//! In-process reference data.
//!
//! [`WattageTable`] and [`ProfileDirectory`] back the collaborator ports with
//! data loaded from configuration. Both are immutable once built and are
//! safe to share between threads.

use crate::carbon::{DeviceClass, DeviceProfile};
use crate::ports::{DevicePowerLookup, UserProfiles};
use crate::{FootprintError, LookupError, Milliwatts, UserId};
use serde::Deserialize;
use std::collections::BTreeMap;

type RawTable = BTreeMap<String, BTreeMap<String, Milliwatts>>;

/// Average wattage per component model, per device class.
///
/// Deserializes from a map of class name to `{ model = watts }`:
///
/// ```toml
/// [wattage.desktop]
/// "Ryzen 7 5800X" = 105
/// "DDR4 16GB" = "6.5"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct WattageTable {
    classes: BTreeMap<DeviceClass, BTreeMap<String, Milliwatts>>,
}

impl TryFrom<RawTable> for WattageTable {
    type Error = FootprintError;

    fn try_from(raw: RawTable) -> Result<Self, Self::Error> {
        let mut classes = BTreeMap::new();
        for (class, models) in raw {
            classes.insert(class.parse::<DeviceClass>()?, models);
        }
        Ok(Self { classes })
    }
}

impl WattageTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, class: DeviceClass, model: &str, watts: Milliwatts) -> Self {
        self.insert(class, model, watts);
        self
    }

    pub fn insert(&mut self, class: DeviceClass, model: &str, watts: Milliwatts) {
        self.classes
            .entry(class)
            .or_default()
            .insert(model.to_string(), watts);
    }

    /// Number of model entries across all classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DevicePowerLookup for WattageTable {
    fn wattage(&self, model: &str, class: DeviceClass) -> Result<Milliwatts, LookupError> {
        self.classes
            .get(&class)
            .and_then(|models| models.get(model))
            .copied()
            .ok_or_else(|| LookupError::UnknownModel {
                model: model.to_string(),
                class: class.to_string(),
            })
    }
}

/// Active device per user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileDirectory {
    devices: BTreeMap<UserId, DeviceProfile>,
}

impl ProfileDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Later profiles for the same user replace earlier ones.
    pub fn from_profiles(profiles: impl IntoIterator<Item = DeviceProfile>) -> Self {
        let mut directory = Self::new();
        for profile in profiles {
            directory.insert(profile);
        }
        directory
    }

    pub fn insert(&mut self, profile: DeviceProfile) {
        self.devices.insert(profile.user_id, profile);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl UserProfiles for ProfileDirectory {
    fn active_device(&self, user: UserId) -> Result<DeviceProfile, LookupError> {
        self.devices
            .get(&user)
            .cloned()
            .ok_or(LookupError::NoActiveDevice(user))
    }
}
