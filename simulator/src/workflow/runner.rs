use crate::generator::prototype::windowed_sinc;
use crate::generator::stimulus::build_stimulus;
use crate::workflow::config::ChannelizeConfig;
use anyhow::Context;
use ct1core::config::{MemoryImage, PolynomialConfig};
use ct1core::delay::{evaluate, evaluate_frame, DelayResult};
use ct1core::processing::channelizer::parse_fir_taps;
use ct1core::processing::{DerippleFilter, PolyphaseFilterbank, SaturationReport};
use ct1core::trace::{decode_records, parse_trace_reader, summarize, DebugSummary, HardwareTraceRecord};
use ct1core::verification::{write_trace, ComparisonReport, Comparator, SweepConfig};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

pub const SPARSE_DUMP_FILE: &str = "ct1_poly_sparse.txt";
pub const DENSE_DUMP_FILE: &str = "ct1_poly_dense.txt";

/// Centre tap of the generated prototype filter.
const PROTOTYPE_PEAK: f64 = 8192.0;

#[derive(Debug, Clone)]
pub struct DumpPaths {
    pub sparse: PathBuf,
    pub dense: PathBuf,
}

/// Drives the model components for one polynomial configuration.
#[derive(Clone)]
pub struct Runner {
    config: PolynomialConfig,
    deripple: DerippleFilter,
}

impl Runner {
    pub fn new(config: PolynomialConfig) -> Self {
        Self {
            config,
            deripple: DerippleFilter::new(),
        }
    }

    /// Uses `deripple` for synthesized and expected sample data.
    pub fn with_deripple(mut self, deripple: DerippleFilter) -> Self {
        self.deripple = deripple;
        self
    }

    pub fn config(&self) -> &PolynomialConfig {
        &self.config
    }

    /// Compiles the memory image and writes both dump formats into `out_dir`.
    pub fn compile(&self, out_dir: &Path) -> anyhow::Result<DumpPaths> {
        let image = MemoryImage::compile(self.config.channels())
            .context("compiling polynomial memory image")?;
        fs::create_dir_all(out_dir)
            .with_context(|| format!("creating output directory {}", out_dir.display()))?;

        let paths = DumpPaths {
            sparse: out_dir.join(SPARSE_DUMP_FILE),
            dense: out_dir.join(DENSE_DUMP_FILE),
        };
        fs::write(&paths.sparse, image.sparse_dump())
            .with_context(|| format!("writing {}", paths.sparse.display()))?;
        fs::write(&paths.dense, image.dense_dump())
            .with_context(|| format!("writing {}", paths.dense.display()))?;
        log::info!(
            "wrote {} and {}",
            paths.sparse.display(),
            paths.dense.display()
        );
        Ok(paths)
    }

    /// One packet, or the whole frame when `packet` is `None`.
    pub fn evaluate(
        &self,
        virtual_channel: u32,
        integration: u32,
        frame: u8,
        packet: Option<u8>,
    ) -> anyhow::Result<Vec<DelayResult>> {
        let entry = self.config.lookup(virtual_channel)?;
        let results = match packet {
            Some(packet) => vec![evaluate(entry, integration, frame, packet)?],
            None => evaluate_frame(entry, integration, frame)?,
        };
        Ok(results)
    }

    pub fn synthesize(
        &self,
        sweep: &SweepConfig,
        packets: Range<u8>,
        out: &Path,
    ) -> anyhow::Result<()> {
        let file =
            File::create(out).with_context(|| format!("creating trace {}", out.display()))?;
        let mut writer = BufWriter::new(file);
        write_trace(&mut writer, &self.config, sweep, packets, &self.deripple)
            .with_context(|| format!("writing trace {}", out.display()))?;
        writer
            .flush()
            .with_context(|| format!("flushing trace {}", out.display()))?;
        Ok(())
    }

    pub fn verify(&self, trace_path: &Path, sweep: &SweepConfig) -> anyhow::Result<ComparisonReport> {
        let file = File::open(trace_path)
            .with_context(|| format!("opening trace {}", trace_path.display()))?;
        let trace = parse_trace_reader(BufReader::new(file))
            .with_context(|| format!("reading trace {}", trace_path.display()))?;
        log::info!(
            "parsed {} packets from {} ({} bad records)",
            trace.len(),
            trace_path.display(),
            trace.parse_errors()
        );
        Ok(Comparator::with_deripple(&self.config, self.deripple.clone()).run(&trace, sweep))
    }
}

pub fn write_report(report: &ComparisonReport, path: &Path) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("creating report {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .with_context(|| format!("writing report {}", path.display()))?;
    Ok(())
}

pub fn read_debug_records(path: &Path) -> anyhow::Result<(Vec<HardwareTraceRecord>, DebugSummary)> {
    let bytes = fs::read(path).with_context(|| format!("reading debug capture {}", path.display()))?;
    let records = decode_records(&bytes);
    let summary = summarize(&records);
    Ok((records, summary))
}

/// Condensed filterbank output.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelizeSummary {
    pub time_steps: usize,
    pub channels: usize,
    pub saturation: SaturationReport,
    /// Mean |X|^2 per kept channel.
    pub mean_power: Vec<f64>,
    pub peak_channel: Option<usize>,
}

fn read_taps(path: &Path) -> anyhow::Result<Vec<f64>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading taps {}", path.display()))?;
    let taps = parse_fir_taps(&text).with_context(|| format!("parsing taps {}", path.display()))?;
    Ok(taps)
}

pub fn run_channelizer(config: &ChannelizeConfig) -> anyhow::Result<ChannelizeSummary> {
    let shape = &config.filterbank;
    let fir = match &config.fir_path {
        Some(path) => read_taps(path)?,
        None => windowed_sinc(shape.fft_length, shape.taps_per_window, PROTOTYPE_PEAK),
    };
    let correction = config.correction_path.as_deref().map(read_taps).transpose()?;

    let filterbank = PolyphaseFilterbank::new(shape.clone(), fir, correction)
        .context("building filterbank")?;
    let stimulus = build_stimulus(&config.stimulus)?;
    let output = filterbank
        .filter(&stimulus, &config.options)
        .context("running filterbank")?;

    let spectrogram = &output.spectrogram;
    let time_steps = spectrogram.nrows();
    let mean_power: Vec<f64> = spectrogram
        .columns()
        .into_iter()
        .map(|column| {
            if time_steps == 0 {
                0.0
            } else {
                column.iter().map(|c| c.norm_sqr()).sum::<f64>() / time_steps as f64
            }
        })
        .collect();
    let peak_channel = mean_power
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(index, _)| index);

    Ok(ChannelizeSummary {
        time_steps,
        channels: spectrogram.ncols(),
        saturation: output.saturation,
        mean_power,
        peak_channel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::stimulus::StimulusConfig;
    use ct1core::config::PolynomialDocument;
    use ct1core::processing::{FilterOptions, FilterbankConfig};

    fn runner() -> Runner {
        let document: PolynomialDocument = serde_json::from_str(
            r#"{"polynomials": {"0": {
                "virtual_channel": 3,
                "poly0": [1500, 10, 0, 0, 0, 0], "sky_freq0": 0.07, "buf_offset0": 0,
                "Ypol_offset0": 1, "integration0": 0, "valid0": 1,
                "poly1": [0, 0, 0, 0, 0, 0], "sky_freq1": 0, "buf_offset1": 0,
                "Ypol_offset1": 0, "integration1": 0, "valid1": 0
            }}, "sim_frames": 2}"#,
        )
        .unwrap();
        Runner::new(document.validate().unwrap())
    }

    #[test]
    fn compile_writes_both_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let paths = runner().compile(dir.path()).unwrap();

        let sparse = fs::read_to_string(&paths.sparse).unwrap();
        assert!(sparse.starts_with("[000000f0]"));
        assert_eq!(sparse.lines().count(), 42);

        let dense = fs::read_to_string(&paths.dense).unwrap();
        assert_eq!(dense.lines().count(), 40 * 1025);
    }

    #[test]
    fn evaluate_returns_frame_or_packet() {
        let runner = runner();
        assert_eq!(runner.evaluate(3, 0, 0, None).unwrap().len(), 75);
        let single = runner.evaluate(3, 0, 0, Some(0)).unwrap();
        assert_eq!(single[0].delay_x_ns, 1500.0);
        assert!(runner.evaluate(4, 0, 0, None).is_err());
    }

    #[test]
    fn synthesized_trace_verifies_clean_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner();
        let sweep = SweepConfig::from_config(runner.config());
        let trace_path = dir.path().join("trace.txt");
        runner.synthesize(&sweep, 10..12, &trace_path).unwrap();

        let report = runner.verify(&trace_path, &sweep).unwrap();
        assert!(report.is_clean(), "{}", report);
        assert_eq!(report.packets_compared, 4);

        let report_path = dir.path().join("report.json");
        write_report(&report, &report_path).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(json["packets_compared"], 4);
    }

    #[test]
    fn debug_capture_ignores_trailing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        fs::write(&path, vec![0u8; 32 * 3 + 5]).unwrap();
        let (records, summary) = read_debug_records(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(summary.record_count, 3);
    }

    #[test]
    fn channelizer_finds_the_tone() {
        let config = ChannelizeConfig {
            filterbank: FilterbankConfig {
                fft_length: 64,
                taps_per_window: 4,
                ..Default::default()
            },
            options: FilterOptions {
                keep: 64,
                filter_scale: 1.0,
                fft_scale: 1.0,
                saturate: false,
                ..Default::default()
            },
            stimulus: StimulusConfig {
                samples: 64 * 12,
                tone_frequency: 8.0 / 64.0,
                amplitude: 1.0,
                noise: 0.0,
                seed: 1,
            },
            ..Default::default()
        };
        let summary = run_channelizer(&config).unwrap();
        assert_eq!(summary.channels, 64);
        assert_eq!(summary.time_steps, 9);
        // DC sits at column 32 after centring.
        assert_eq!(summary.peak_channel, Some(40));
    }
}
