//! # Carbon Estimator
//!
//! Converts session time on a user's device into energy and emissions and
//! adds the delta to a project instance.
//!
//! ## Arithmetic
//!
//! All values are integers:
//!
//! ```text
//! energy (mWh)  = power (mW) × seconds / 3600
//! carbon (µg)   = power (mW) × seconds × factor (g/kWh) / 3600
//! ```
//!
//! Intermediate products are computed in `u128` and saturate on the way
//! back to `u64`. A desktop drawing 720 W for one hour at 475 g/kWh emits
//! exactly 342 000 000 µg (0.342 kg).

use crate::ports::{DevicePowerLookup, UserProfiles};
use crate::retry::RetryPolicy;
use crate::store::{LedgerRead, Store};
use crate::{
    CarbonMass, EnergyMwh, FootprintError, InstanceId, LookupError, Milliwatts, ProjectInstance,
    UserId, primitives,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// =============================================================================
// DEVICE MODEL
// =============================================================================

/// Class of the device a user works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Laptop,
    Mobile,
}

/// How a device class sums its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerFormula {
    /// `cpu + gpu + ram + psu` with the PSU counted at its nameplate rating.
    WithSupply,
    /// `cpu + gpu + ram`.
    ComponentsOnly,
}

impl DeviceClass {
    #[must_use]
    pub const fn formula(self) -> PowerFormula {
        match self {
            DeviceClass::Desktop => PowerFormula::WithSupply,
            DeviceClass::Laptop | DeviceClass::Mobile => PowerFormula::ComponentsOnly,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Laptop => "laptop",
            DeviceClass::Mobile => "mobile",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = FootprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(DeviceClass::Desktop),
            "laptop" => Ok(DeviceClass::Laptop),
            "mobile" => Ok(DeviceClass::Mobile),
            other => Err(FootprintError::InvalidInput(format!(
                "unknown device class '{other}'"
            ))),
        }
    }
}

/// A user's active device: its class and component models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub user_id: UserId,
    pub class: DeviceClass,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub gpu: Option<String>,
    #[serde(default)]
    pub ram: Option<String>,
    #[serde(default)]
    pub psu: Option<String>,
}

impl DeviceProfile {
    fn component(&self, name: &'static str) -> Result<&str, LookupError> {
        let model = match name {
            "cpu" => self.cpu.as_deref(),
            "gpu" => self.gpu.as_deref(),
            "ram" => self.ram.as_deref(),
            _ => self.psu.as_deref(),
        };
        model
            .filter(|m| !m.trim().is_empty())
            .ok_or(LookupError::MissingComponent {
                user: self.user_id,
                component: name,
            })
    }
}

// =============================================================================
// EMISSIONS
// =============================================================================

/// Grid emissions factor in grams CO₂e per kWh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmissionsFactor {
    pub grams_per_kwh: u64,
}

impl Default for EmissionsFactor {
    fn default() -> Self {
        Self {
            grams_per_kwh: primitives::DEFAULT_EMISSIONS_G_PER_KWH,
        }
    }
}

/// Resolved per-component draw of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerDraw {
    pub cpu: Milliwatts,
    pub gpu: Milliwatts,
    pub ram: Milliwatts,
    /// Only present for classes whose formula includes the supply.
    pub psu: Option<Milliwatts>,
}

impl PowerDraw {
    #[must_use]
    pub fn total(&self) -> Milliwatts {
        let base = self.cpu.saturating_add(self.gpu).saturating_add(self.ram);
        match self.psu {
            Some(psu) => base.saturating_add(psu),
            None => base,
        }
    }
}

/// Energy and emissions for one stretch of session time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Emissions {
    pub energy: EnergyMwh,
    pub carbon: CarbonMass,
}

fn saturate(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Emissions of `power` sustained for `seconds`.
#[must_use]
pub fn estimate(power: Milliwatts, seconds: u64, factor: EmissionsFactor) -> Emissions {
    let milliwatt_seconds = u128::from(power.value()) * u128::from(seconds);
    let energy = EnergyMwh(saturate(milliwatt_seconds / 3600));
    let carbon = CarbonMass(saturate(
        milliwatt_seconds.saturating_mul(u128::from(factor.grams_per_kwh)) / 3600,
    ));
    Emissions { energy, carbon }
}

/// Result of a successful accrual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accrual {
    /// Instance row after the increment.
    pub instance: ProjectInstance,
    pub user_id: UserId,
    pub device: DeviceClass,
    pub power: PowerDraw,
    pub elapsed_seconds: u64,
    pub delta: Emissions,
}

// =============================================================================
// ESTIMATOR
// =============================================================================

/// Applies session accruals to instances.
pub struct CarbonEstimator<S: Store> {
    store: Arc<S>,
    power: Arc<dyn DevicePowerLookup>,
    profiles: Arc<dyn UserProfiles>,
    factor: EmissionsFactor,
    retry: RetryPolicy,
}

impl<S: Store> fmt::Debug for CarbonEstimator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarbonEstimator")
            .field("factor", &self.factor)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn check_accrual_target<T: LedgerRead + ?Sized>(
    txn: &T,
    instance_id: InstanceId,
    user_id: UserId,
) -> Result<ProjectInstance, FootprintError> {
    let instance = txn
        .instance(instance_id)?
        .ok_or(FootprintError::InstanceNotFound(instance_id))?;
    instance.ensure_active()?;
    if txn.member(instance_id, user_id)?.is_none() {
        return Err(FootprintError::NotAMember {
            instance: instance_id,
            user: user_id,
        });
    }
    Ok(instance)
}

impl<S: Store> CarbonEstimator<S> {
    pub fn new(
        store: Arc<S>,
        power: Arc<dyn DevicePowerLookup>,
        profiles: Arc<dyn UserProfiles>,
        factor: EmissionsFactor,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            power,
            profiles,
            factor,
            retry,
        }
    }

    #[must_use]
    pub fn factor(&self) -> EmissionsFactor {
        self.factor
    }

    /// Resolve every component the device's formula needs.
    ///
    /// A missing component or unknown model is an error; nothing is
    /// substituted with zero.
    pub fn power_draw(&self, profile: &DeviceProfile) -> Result<PowerDraw, LookupError> {
        let lookup = |name: &'static str| -> Result<Milliwatts, LookupError> {
            let model = profile.component(name)?;
            self.power.wattage(model, profile.class)
        };

        let cpu = lookup("cpu")?;
        let gpu = lookup("gpu")?;
        let ram = lookup("ram")?;
        let psu = match profile.class.formula() {
            PowerFormula::WithSupply => Some(lookup("psu")?),
            PowerFormula::ComponentsOnly => None,
        };
        Ok(PowerDraw { cpu, gpu, ram, psu })
    }

    /// Emissions for `user_id`'s active device running `elapsed_seconds`.
    pub fn estimate_for(
        &self,
        user_id: UserId,
        elapsed_seconds: u64,
    ) -> Result<(DeviceClass, PowerDraw, Emissions), FootprintError> {
        let profile = self.profiles.active_device(user_id)?;
        let power = self.power_draw(&profile)?;
        let delta = estimate(power.total(), elapsed_seconds, self.factor);
        Ok((profile.class, power, delta))
    }

    /// Add a session's energy and emissions to an instance.
    ///
    /// Membership and status are checked before the external lookups and
    /// again inside the write transaction. The counters are incremented in
    /// place, so concurrent accruals from different members all land.
    pub fn accrue(
        &self,
        instance_id: InstanceId,
        user_id: UserId,
        elapsed_seconds: u64,
    ) -> Result<Accrual, FootprintError> {
        if elapsed_seconds > primitives::MAX_ACCRUAL_SECONDS {
            return Err(FootprintError::InvalidInput(format!(
                "elapsed time {elapsed_seconds}s exceeds the {}s limit",
                primitives::MAX_ACCRUAL_SECONDS
            )));
        }

        self.store
            .read(|txn| check_accrual_target(txn, instance_id, user_id))?;

        let (device, power, delta) = self.estimate_for(user_id, elapsed_seconds)?;

        let instance = self.retry.run("accrue", || {
            self.store.write(|txn| {
                check_accrual_target(&*txn, instance_id, user_id)?;
                txn.add_usage(instance_id, elapsed_seconds, delta.carbon)
            })
        })?;

        tracing::info!(
            instance_id = instance_id.0,
            user_id = user_id.0,
            device = %device,
            elapsed_seconds,
            power_mw = power.total().value(),
            carbon_ug = delta.carbon.micrograms(),
            "accrued session emissions"
        );

        Ok(Accrual {
            instance,
            user_id,
            device,
            power,
            elapsed_seconds,
            delta,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_hour_matches_reference_figures() {
        let power = PowerDraw {
            cpu: Milliwatts::from_watts(100),
            gpu: Milliwatts::from_watts(150),
            ram: Milliwatts::from_watts(20),
            psu: Some(Milliwatts::from_watts(450)),
        };
        assert_eq!(power.total(), Milliwatts::from_watts(720));

        let out = estimate(power.total(), 3600, EmissionsFactor::default());
        assert_eq!(out.energy, EnergyMwh(720_000));
        assert_eq!(out.energy.watt_hours(), 720);
        assert_eq!(out.carbon, CarbonMass(342_000_000));
    }

    #[test]
    fn split_sessions_sum_exactly() {
        let power = Milliwatts::from_watts(720);
        let factor = EmissionsFactor::default();
        let half = estimate(power, 1800, factor);
        let whole = estimate(power, 3600, factor);
        assert_eq!(half.carbon.saturating_add(half.carbon), whole.carbon);
    }

    #[test]
    fn laptop_formula_ignores_supply() {
        assert_eq!(DeviceClass::Laptop.formula(), PowerFormula::ComponentsOnly);
        assert_eq!(DeviceClass::Mobile.formula(), PowerFormula::ComponentsOnly);
        assert_eq!(DeviceClass::Desktop.formula(), PowerFormula::WithSupply);
    }

    #[test]
    fn zero_elapsed_is_zero_delta() {
        let out = estimate(Milliwatts::from_watts(500), 0, EmissionsFactor::default());
        assert_eq!(out.carbon, CarbonMass::ZERO);
        assert_eq!(out.energy, EnergyMwh(0));
    }

    #[test]
    fn huge_values_saturate() {
        let out = estimate(Milliwatts(u64::MAX), u64::MAX, EmissionsFactor::default());
        assert_eq!(out.carbon, CarbonMass(u64::MAX));
    }

    #[test]
    fn blank_component_counts_as_missing() {
        let profile = DeviceProfile {
            user_id: UserId(4),
            class: DeviceClass::Laptop,
            cpu: Some("  ".to_string()),
            gpu: None,
            ram: None,
            psu: None,
        };
        assert_eq!(
            profile.component("cpu"),
            Err(LookupError::MissingComponent {
                user: UserId(4),
                component: "cpu"
            })
        );
    }

    #[test]
    fn device_class_parse() {
        assert_eq!(
            "desktop".parse::<DeviceClass>().expect("parse"),
            DeviceClass::Desktop
        );
        assert!("Desktop".parse::<DeviceClass>().is_err());
    }
}
