use crate::generator::stimulus::StimulusConfig;
use anyhow::Context;
use ct1core::config::{PolynomialConfig, PolynomialDocument};
use ct1core::processing::{DerippleFilter, FilterOptions, FilterbankConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Loads and validates a polynomial configuration file.
pub fn load_polynomials<P: AsRef<Path>>(path: P) -> anyhow::Result<PolynomialConfig> {
    let path_ref = path.as_ref();
    let contents = fs::read_to_string(path_ref)
        .with_context(|| format!("reading polynomial config {}", path_ref.display()))?;
    let document: PolynomialDocument = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing polynomial config {}", path_ref.display()))?;
    let config = document
        .validate()
        .with_context(|| format!("validating polynomial config {}", path_ref.display()))?;
    log::info!(
        "loaded {} channel entries from {}",
        config.entries.len(),
        path_ref.display()
    );
    Ok(config)
}

/// Reads a 31-tap deripple table; the built-in table is used when `path` is `None`.
pub fn load_deripple(path: Option<&Path>) -> anyhow::Result<DerippleFilter> {
    let Some(path) = path else {
        return Ok(DerippleFilter::new());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading deripple taps {}", path.display()))?;
    let filter = DerippleFilter::from_text(&text)
        .with_context(|| format!("parsing deripple taps {}", path.display()))?;
    log::info!("loaded deripple taps from {}", path.display());
    Ok(filter)
}

/// Settings for a filterbank run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelizeConfig {
    pub filterbank: FilterbankConfig,
    pub options: FilterOptions,
    pub stimulus: StimulusConfig,
    /// Whitespace separated prototype taps; a windowed sinc is used when absent.
    pub fir_path: Option<PathBuf>,
    /// Correction filter taps for `options.pre_filter`.
    pub correction_path: Option<PathBuf>,
}

impl ChannelizeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading channelize config {}", path_ref.display()))?;
        let config: ChannelizeConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing channelize config {}", path_ref.display()))?;
        Ok(config)
    }
}
