//! Command-line PDM capture recorder.
//!
//! Records a synthetic PDM microphone take through the full capture
//! pipeline (decimation, double buffering, drain thread) into an 8-bit
//! mono WAV file. The source is paced against the wall clock by default,
//! so a ten-second take occupies ten seconds the way a hardware FIFO
//! would; `--no-pace` runs the pipeline flat out for stress runs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pdmcap_core::{
    CaptureConfig, DeadlinePolicy, DiagnosticsSnapshot, PdmRecorder, RangePolicy,
    SyntheticPdmSource, WavWriter,
};
use serde::Serialize;
use tracing::info;

/// pdmcap - record a PDM microphone take to a WAV file
#[derive(Parser)]
#[command(name = "pdmcap")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path of the WAV file to write (overwritten if it already exists)
    output: PathBuf,

    /// Length of the take in seconds
    #[arg(long, default_value = "10")]
    seconds: u64,

    /// Output PCM sample rate in hertz
    #[arg(long, default_value = "12000")]
    sample_rate: u32,

    /// PDM bits folded into one PCM sample (non-zero multiple of 32, at most 256)
    #[arg(long, default_value = "256")]
    osr: u32,

    /// PCM samples held by each half of the double buffer
    #[arg(long, default_value = "1024")]
    buffer_len: usize,

    /// Depth of the drain request queue, in buffers
    #[arg(long, default_value = "4")]
    queue_depth: usize,

    /// How decimated counts above full scale are reduced to a byte
    #[arg(long, default_value = "clamp", value_parser = ["clamp", "wrap"])]
    range_policy: String,

    /// What a missed drain deadline does to the take
    #[arg(long, default_value = "degrade", value_parser = ["degrade", "fatal"])]
    deadline_policy: String,

    /// Drain the partially filled buffer when the take ends
    #[arg(long)]
    flush_partial: bool,

    /// Test tone frequency in hertz
    #[arg(long, default_value = "440.0")]
    tone_hz: f64,

    /// Test tone amplitude, 0.0 (silence) to 1.0 (full scale)
    #[arg(long, default_value = "0.6")]
    amplitude: f64,

    /// Run the source flat out instead of pacing it against the wall clock
    #[arg(long)]
    no_pace: bool,

    /// Output a machine-readable JSON summary instead of text
    #[arg(long)]
    json: bool,
}

/// End-of-take report printed by `--json`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TakeSummary {
    path: String,
    seconds: u64,
    sample_rate: u32,
    oversample_ratio: u32,
    pcm_bytes: u64,
    diagnostics: DiagnosticsSnapshot,
}

fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    // Logs go to stderr; stdout carries the take summary (plain or --json).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdmcap=info,pdmcap_core=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("pdmcap starting");
    let args = Args::parse();

    // ── Capture configuration ─────────────────────────────────────────────
    let range_policy = match args.range_policy.as_str() {
        "wrap" => RangePolicy::Wrap,
        _ => RangePolicy::Clamp,
    };
    let deadline_policy = match args.deadline_policy.as_str() {
        "fatal" => DeadlinePolicy::Fatal,
        _ => DeadlinePolicy::Degrade,
    };

    let config = CaptureConfig {
        sample_rate: args.sample_rate,
        oversample_ratio: args.osr,
        buffer_len: args.buffer_len,
        queue_depth: args.queue_depth,
        range_policy,
        deadline_policy,
        flush_partial_on_stop: args.flush_partial,
    };
    config.validate()?;
    let bit_clock_hz = config
        .bit_clock_hz()
        .context("sample rate times oversample ratio overflows the PDM bit clock")?;
    let group_budget = args.seconds.saturating_mul(u64::from(config.sample_rate));

    info!(
        output = %args.output.display(),
        seconds = args.seconds,
        sample_rate = config.sample_rate,
        oversample_ratio = config.oversample_ratio,
        bit_clock_hz,
        buffer_len = config.buffer_len,
        paced = !args.no_pace,
        "take configured"
    );

    // ── Record ────────────────────────────────────────────────────────────
    let mut source = SyntheticPdmSource::new(bit_clock_hz, args.tone_hz, args.amplitude)
        .with_group_budget(group_budget);
    if !args.no_pace {
        source = source.paced();
    }
    let sink = WavWriter::open(&args.output, config.sample_rate, 8, 1)?;

    let recorder = PdmRecorder::new(config.clone());
    recorder.start(source, sink)?;
    let diagnostics = recorder.join()?;

    // ── Report ────────────────────────────────────────────────────────────
    if args.json {
        let summary = TakeSummary {
            path: args.output.display().to_string(),
            seconds: args.seconds,
            sample_rate: config.sample_rate,
            oversample_ratio: config.oversample_ratio,
            pcm_bytes: diagnostics.bytes_drained,
            diagnostics,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "wrote {} ({} bytes of 8-bit mono PCM at {} Hz)",
            args.output.display(),
            diagnostics.bytes_drained,
            config.sample_rate
        );
        if diagnostics.deadline_misses > 0 || diagnostics.drain_overruns > 0 {
            println!(
                "degraded take: {} deadline misses, {} queue overruns",
                diagnostics.deadline_misses, diagnostics.drain_overruns
            );
        }
    }

    Ok(())
}
