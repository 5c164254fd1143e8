//! Per-channel delay-polynomial configuration.
//!
//! The YAML/JSON document is deserialized into [`PolynomialDocument`] with
//! every field optional, then validated into [`PolynomialConfig`]. Validation
//! fails on the first missing or malformed field so nothing downstream ever
//! sees a partially populated channel.

use crate::prelude::{ModelError, ModelResult, MAX_VIRTUAL_CHANNELS};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coefficients c0..c5 of the delay polynomial.
pub const POLY_COEFFICIENTS: usize = 6;

/// Valid flag as written in configuration files, either `true`/`false` or `0`/`1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValidFlag {
    Bool(bool),
    Int(i64),
}

impl ValidFlag {
    pub fn is_set(self) -> bool {
        match self {
            ValidFlag::Bool(flag) => flag,
            ValidFlag::Int(value) => value != 0,
        }
    }

    /// Signed 32-bit value stored in the valid word; booleans become 0/1.
    pub fn word(self) -> Option<i32> {
        match self {
            ValidFlag::Bool(flag) => Some(i32::from(flag)),
            ValidFlag::Int(value) => i32::try_from(value).ok(),
        }
    }
}

/// One channel entry exactly as it appears in the configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelEntryDocument {
    pub virtual_channel: Option<i64>,
    pub poly0: Option<Vec<f64>>,
    pub sky_freq0: Option<f64>,
    pub buf_offset0: Option<f64>,
    #[serde(rename = "Ypol_offset0")]
    pub ypol_offset0: Option<f64>,
    pub integration0: Option<i64>,
    pub valid0: Option<ValidFlag>,
    pub poly1: Option<Vec<f64>>,
    pub sky_freq1: Option<f64>,
    pub buf_offset1: Option<f64>,
    #[serde(rename = "Ypol_offset1")]
    pub ypol_offset1: Option<f64>,
    pub integration1: Option<i64>,
    pub valid1: Option<ValidFlag>,
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolynomialDocument {
    pub polynomials: Option<BTreeMap<u32, ChannelEntryDocument>>,
    pub integration_start: Option<u32>,
    pub sim_frames: Option<u32>,
}

/// One half of the double-buffered channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Slot {
    /// c0..c5 in ns/s^k.
    pub coefficients: [f64; POLY_COEFFICIENTS],
    pub sky_freq_ghz: f64,
    /// Seconds from the polynomial epoch to the start of the validity integration.
    pub buffer_offset_s: f64,
    /// Y polarisation delay relative to X, in ns.
    pub ypol_offset_ns: f64,
    pub validity_integration: u32,
    /// Valid word as configured; any non-zero value marks the slot valid.
    pub valid_word: i32,
}

impl Slot {
    /// A slot takes effect once it is flagged valid and its integration has been reached.
    pub fn is_active(&self, integration: u32) -> bool {
        self.is_valid() && integration >= self.validity_integration
    }

    pub fn is_valid(&self) -> bool {
        self.valid_word != 0
    }

    /// Evaluates c0 + c1 t + ... + c5 t^5 in ns, term by term in ascending order.
    pub fn delay_ns(&self, t: f64) -> f64 {
        let mut power = 1.0;
        let mut delay = 0.0;
        for &coefficient in &self.coefficients {
            delay += coefficient * power;
            power *= t;
        }
        delay
    }
}

/// Validated configuration for one virtual channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VirtualChannelConfig {
    pub virtual_channel: u32,
    pub slot0: Slot,
    pub slot1: Slot,
}

impl VirtualChannelConfig {
    pub fn new(virtual_channel: u32, slot0: Slot, slot1: Slot) -> Self {
        Self {
            virtual_channel,
            slot0,
            slot1,
        }
    }
}

/// Validated configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolynomialConfig {
    /// Entries keyed by their document index.
    pub entries: BTreeMap<u32, VirtualChannelConfig>,
    pub integration_start: u32,
    pub sim_frames: u32,
}

impl PolynomialConfig {
    pub fn channels(&self) -> impl Iterator<Item = &VirtualChannelConfig> {
        self.entries.values()
    }

    /// Sorted, de-duplicated virtual channel ids.
    pub fn channel_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.channels().map(|c| c.virtual_channel).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Finds the single entry for `virtual_channel`.
    pub fn lookup(&self, virtual_channel: u32) -> ModelResult<&VirtualChannelConfig> {
        let mut matches = self
            .channels()
            .filter(|entry| entry.virtual_channel == virtual_channel);
        match (matches.next(), matches.count()) {
            (Some(entry), 0) => Ok(entry),
            (None, _) => Err(ModelError::ConfigLookup {
                channel: virtual_channel,
                matches: 0,
            }),
            (Some(_), extra) => Err(ModelError::ConfigLookup {
                channel: virtual_channel,
                matches: extra + 1,
            }),
        }
    }
}

fn required<T>(value: Option<T>, index: u32, field: &str) -> ModelResult<T> {
    value.ok_or_else(|| {
        ModelError::Config(format!("polynomials[{}] missing required field {}", index, field))
    })
}

fn coefficients(values: Vec<f64>, index: u32, field: &str) -> ModelResult<[f64; POLY_COEFFICIENTS]> {
    let count = values.len();
    values.try_into().map_err(|_| {
        ModelError::Config(format!(
            "polynomials[{}].{} has {} coefficients, expected {}",
            index, field, count, POLY_COEFFICIENTS
        ))
    })
}

fn valid_word(flag: ValidFlag, index: u32, field: &str) -> ModelResult<i32> {
    flag.word().ok_or_else(|| {
        ModelError::Config(format!(
            "polynomials[{}].{} = {:?} does not fit a 32-bit word",
            index, field, flag
        ))
    })
}

fn validity_integration(value: i64, index: u32, field: &str) -> ModelResult<u32> {
    u32::try_from(value).map_err(|_| {
        ModelError::Config(format!(
            "polynomials[{}].{} = {} is not a 32-bit integration index",
            index, field, value
        ))
    })
}

impl ChannelEntryDocument {
    /// Converts the loosely typed entry at document `index` into a checked record.
    pub fn validate(self, index: u32) -> ModelResult<VirtualChannelConfig> {
        let vc = required(self.virtual_channel, index, "virtual_channel")?;
        let virtual_channel = u32::try_from(vc).map_err(|_| {
            ModelError::Config(format!(
                "polynomials[{}].virtual_channel = {} is negative or too large",
                index, vc
            ))
        })?;
        if virtual_channel as usize >= MAX_VIRTUAL_CHANNELS {
            return Err(ModelError::ChannelRange(virtual_channel));
        }

        let slot0 = Slot {
            coefficients: coefficients(required(self.poly0, index, "poly0")?, index, "poly0")?,
            sky_freq_ghz: required(self.sky_freq0, index, "sky_freq0")?,
            buffer_offset_s: required(self.buf_offset0, index, "buf_offset0")?,
            ypol_offset_ns: required(self.ypol_offset0, index, "Ypol_offset0")?,
            validity_integration: validity_integration(
                required(self.integration0, index, "integration0")?,
                index,
                "integration0",
            )?,
            valid_word: valid_word(required(self.valid0, index, "valid0")?, index, "valid0")?,
        };
        let slot1 = Slot {
            coefficients: coefficients(required(self.poly1, index, "poly1")?, index, "poly1")?,
            sky_freq_ghz: required(self.sky_freq1, index, "sky_freq1")?,
            buffer_offset_s: required(self.buf_offset1, index, "buf_offset1")?,
            ypol_offset_ns: required(self.ypol_offset1, index, "Ypol_offset1")?,
            validity_integration: validity_integration(
                required(self.integration1, index, "integration1")?,
                index,
                "integration1",
            )?,
            valid_word: valid_word(required(self.valid1, index, "valid1")?, index, "valid1")?,
        };

        Ok(VirtualChannelConfig::new(virtual_channel, slot0, slot1))
    }
}

impl PolynomialDocument {
    pub fn validate(self) -> ModelResult<PolynomialConfig> {
        let polynomials = self.polynomials.ok_or_else(|| {
            ModelError::Config("configuration missing required key polynomials".into())
        })?;

        let mut entries = BTreeMap::new();
        for (index, entry) in polynomials {
            let channel = entry.validate(index)?;
            debug!(
                "polynomials[{}] -> virtual channel {}",
                index, channel.virtual_channel
            );
            entries.insert(index, channel);
        }

        let config = PolynomialConfig {
            entries,
            integration_start: self.integration_start.unwrap_or(0),
            sim_frames: self.sim_frames.unwrap_or(1),
        };
        let total = config.entries.len();
        let unique = config.channel_ids().len();
        if unique != total {
            warn!(
                "{} entries share a virtual channel id; lookups for those channels will fail",
                total - unique
            );
        }
        Ok(config)
    }
}
