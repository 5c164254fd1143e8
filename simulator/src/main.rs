use clap::{Parser, Subcommand};
use ct1core::delay::evaluator::PACKETS_PER_FRAME;
use ct1core::verification::SweepConfig;
use std::path::PathBuf;
use workflow::config::{load_deripple, load_polynomials, ChannelizeConfig};
use workflow::runner::{read_debug_records, run_channelizer, write_report, Runner};

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Corner-turn delay model driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct SweepArgs {
    /// First integration of the sweep (overrides the config file)
    #[arg(long)]
    integration_start: Option<u32>,
    /// Number of corner-turn frames to sweep (overrides the config file)
    #[arg(long)]
    sim_frames: Option<u32>,
}

impl SweepArgs {
    fn resolve(&self, base: SweepConfig) -> SweepConfig {
        SweepConfig {
            integration_start: self.integration_start.unwrap_or(base.integration_start),
            sim_frames: self.sim_frames.unwrap_or(base.sim_frames),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Compile a polynomial config into sparse and dense memory dumps
    Compile {
        config: PathBuf,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Print the model's delay and phase for one channel
    Evaluate {
        config: PathBuf,
        #[arg(long)]
        channel: u32,
        #[arg(long, default_value_t = 0)]
        integration: u32,
        #[arg(long, default_value_t = 0)]
        frame: u8,
        /// Single packet; the whole frame when omitted
        #[arg(long)]
        packet: Option<u8>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Write the trace the hardware should produce for the sweep
    SynthTrace {
        config: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 0)]
        first_packet: u8,
        #[arg(long, default_value_t = PACKETS_PER_FRAME)]
        end_packet: u8,
        /// 31 integer deripple taps replacing the built-in table
        #[arg(long)]
        deripple: Option<PathBuf>,
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Compare a hardware trace against the model
    Verify {
        config: PathBuf,
        trace: PathBuf,
        /// Write the report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
        /// 31 integer deripple taps replacing the built-in table
        #[arg(long)]
        deripple: Option<PathBuf>,
        #[command(flatten)]
        sweep: SweepArgs,
    },
    /// Decode a binary delay-debug capture
    DebugRead {
        input: PathBuf,
        /// Records to print before the summary
        #[arg(long, default_value_t = 10)]
        show: usize,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Run the polyphase filterbank on a synthetic stimulus
    Channelize {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Compile { config, out_dir } => {
            let runner = Runner::new(load_polynomials(&config)?);
            let paths = runner.compile(&out_dir)?;
            println!("sparse dump: {}", paths.sparse.display());
            println!("dense dump:  {}", paths.dense.display());
        }
        Command::Evaluate {
            config,
            channel,
            integration,
            frame,
            packet,
            json,
        } => {
            let runner = Runner::new(load_polynomials(&config)?);
            let results = runner.evaluate(channel, integration, frame, packet)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                let first = packet.unwrap_or(0);
                println!("packet buf coarse    fine_x     fine_y     phase_x    phase_y    delay_x_ns");
                for (offset, r) in results.iter().enumerate() {
                    println!(
                        "{:>6} {:>3} {:>6} {:08x}   {:08x}   {:08x}   {:08x}   {:.6}",
                        usize::from(first) + offset,
                        r.buffer,
                        r.coarse_delay,
                        r.fine_delay_x,
                        r.fine_delay_y,
                        r.phase_x,
                        r.phase_y,
                        r.delay_x_ns
                    );
                }
            }
        }
        Command::SynthTrace {
            config,
            out,
            first_packet,
            end_packet,
            deripple,
            sweep,
        } => {
            let runner = Runner::new(load_polynomials(&config)?)
                .with_deripple(load_deripple(deripple.as_deref())?);
            let sweep = sweep.resolve(SweepConfig::from_config(runner.config()));
            runner.synthesize(&sweep, first_packet..end_packet, &out)?;
            println!("trace written to {}", out.display());
        }
        Command::Verify {
            config,
            trace,
            report,
            deripple,
            sweep,
        } => {
            let runner = Runner::new(load_polynomials(&config)?)
                .with_deripple(load_deripple(deripple.as_deref())?);
            let sweep = sweep.resolve(SweepConfig::from_config(runner.config()));
            let result = runner.verify(&trace, &sweep)?;
            print!("{}", result);
            if let Some(path) = report {
                write_report(&result, &path)?;
            }
            if !result.is_clean() {
                anyhow::bail!(
                    "{} data and {} metadata mismatches",
                    result.data.mismatched(),
                    result.metadata.mismatched()
                );
            }
        }
        Command::DebugRead { input, show, json } => {
            let (records, summary) = read_debug_records(&input)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }
            for record in records.iter().take(show) {
                println!(
                    "t={:.6}s vc={} pkt={} integ={} ct={} buf={} fifo={} result={} time={} sample_time={:.6}",
                    record.uptime_seconds(),
                    record.delay.virtual_channel,
                    record.delay.packet,
                    record.integration.integration,
                    record.integration.ct_frame,
                    record.select.buffer_select,
                    record.select.fifo_count,
                    record.poly_result,
                    record.poly_time,
                    record.sample_time_seconds()
                );
            }
            println!(
                "{} records, {} channels, {} buffer switches, max fifo {}, {} config writes",
                summary.record_count,
                summary.virtual_channels.len(),
                summary.buffer_switches,
                summary.max_fifo_count,
                summary.config_writes
            );
        }
        Command::Channelize { config, json } => {
            let config = match config {
                Some(path) => ChannelizeConfig::load(path)?,
                None => ChannelizeConfig::default(),
            };
            let summary = run_channelizer(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "{} time steps x {} channels, peak channel {:?}, clipped {} (max re {:.1}, im {:.1})",
                    summary.time_steps,
                    summary.channels,
                    summary.peak_channel,
                    summary.saturation.clipped,
                    summary.saturation.real_max,
                    summary.saturation.imag_max
                );
            }
        }
    }

    Ok(())
}
