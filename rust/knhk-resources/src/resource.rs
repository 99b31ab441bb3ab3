//! A single node of the resource tree: its static capacity and its live
//! power/thermal profile. Per-view usage lives in the accounter, not here,
//! since the same resource is shared across every view.

use crate::error::{ResourceError, Result};
use crate::path::ResourcePath;

/// Exponential moving average over a configured sample window, used for
/// every sampled power/thermal signal attached to a resource.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ema {
    value: f64,
    window: u32,
    samples_seen: u64,
}

impl Ema {
    pub fn new(window: u32) -> Self {
        Self {
            value: 0.0,
            window: window.max(1),
            samples_seen: 0,
        }
    }

    /// Folds in a new sample. The first sample seeds the average directly.
    pub fn update(&mut self, sample: f64) -> f64 {
        if self.samples_seen == 0 {
            self.value = sample;
        } else {
            let alpha = 2.0 / (self.window as f64 + 1.0);
            self.value = alpha * sample + (1.0 - alpha) * self.value;
        }
        self.samples_seen += 1;
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// The sampled info types the power monitor tracks per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoKind {
    Temperature,
    Load,
    Frequency,
    Power,
    Energy,
}

/// Power/thermal profile sampled on a resource, per §4.G. Each field is an
/// EMA over the configured monitor window; `None` until first sampled.
#[derive(Debug, Clone, Default)]
pub struct PowerProfile {
    pub temperature_c: Option<Ema>,
    pub load_pct: Option<Ema>,
    pub frequency_khz: Option<Ema>,
    pub power_mw: Option<Ema>,
    pub energy_uj: Option<Ema>,
}

impl PowerProfile {
    pub fn with_window(window: u32) -> Self {
        Self {
            temperature_c: Some(Ema::new(window)),
            load_pct: Some(Ema::new(window)),
            frequency_khz: Some(Ema::new(window)),
            power_mw: Some(Ema::new(window)),
            energy_uj: Some(Ema::new(window)),
        }
    }

    fn slot(&mut self, kind: InfoKind) -> &mut Option<Ema> {
        match kind {
            InfoKind::Temperature => &mut self.temperature_c,
            InfoKind::Load => &mut self.load_pct,
            InfoKind::Frequency => &mut self.frequency_khz,
            InfoKind::Power => &mut self.power_mw,
            InfoKind::Energy => &mut self.energy_uj,
        }
    }

    /// Folds a fresh sample into the EMA for `kind`, creating it with
    /// `window` on first use, and returns the updated average.
    pub fn sample(&mut self, kind: InfoKind, value: f64, window: u32) -> f64 {
        let slot = self.slot(kind);
        slot.get_or_insert_with(|| Ema::new(window)).update(value)
    }

    pub fn get(&self, kind: InfoKind) -> Option<f64> {
        match kind {
            InfoKind::Temperature => self.temperature_c.map(|e| e.value()),
            InfoKind::Load => self.load_pct.map(|e| e.value()),
            InfoKind::Frequency => self.frequency_khz.map(|e| e.value()),
            InfoKind::Power => self.power_mw.map(|e| e.value()),
            InfoKind::Energy => self.energy_uj.map(|e| e.value()),
        }
    }
}

/// A registered node in the resource tree. Capacities are canonical
/// non-negative integers (bytes, Hz, 1%-of-PE units, ...).
#[derive(Debug, Clone)]
pub struct Resource {
    path: ResourcePath,
    total: u64,
    reserved: u64,
    online: bool,
    model: String,
    pub power_profile: PowerProfile,
}

impl Resource {
    pub fn new(path: ResourcePath, total: u64, model: impl Into<String>) -> Self {
        Self {
            path,
            total,
            reserved: 0,
            online: true,
            model: model.into(),
            power_profile: PowerProfile::default(),
        }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    pub fn unreserved(&self) -> u64 {
        self.total - self.reserved
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    /// Updates total capacity given how much is currently booked against
    /// this resource in the system view. Shrinking below what is already
    /// committed is rejected with `Overflow` rather than silently
    /// retracting live allocations.
    pub fn update_total(&mut self, new_total: u64, used: u64) -> Result<()> {
        if new_total < used {
            return Err(ResourceError::Overflow);
        }
        self.total = new_total;
        if self.reserved > new_total {
            self.reserved = new_total;
        }
        Ok(())
    }

    /// Clamps free capacity. Idempotent: repeated calls overwrite rather
    /// than accumulate.
    pub fn reserve(&mut self, amount: u64) -> Result<()> {
        if amount > self.total {
            return Err(ResourceError::Overflow);
        }
        self.reserved = amount;
        Ok(())
    }

    /// Folds a power-monitor sample into this resource's profile.
    pub fn sample_power(&mut self, kind: InfoKind, value: f64, window: u32) -> f64 {
        self.power_profile.sample(kind, value, window)
    }
}
