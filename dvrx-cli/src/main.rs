mod input;

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use log::info;

use dvrx_core::config::{DemodConfig, TrunkConfig};
use dvrx_core::errors::TuneError;
use dvrx_core::event::{to_json, EventRecord, EventSink};
use dvrx_core::keystore::KeyStore;
use dvrx_core::pipeline::Pipeline;
use dvrx_core::Tuner;

use input::IqReader;

#[derive(Parser, Debug)]
#[command(author, version, about = "Digital-voice decoder: IQ capture in, JSON events out", long_about = None)]
struct Cli {
    /// IQ capture: 2-channel WAV, or raw interleaved samples with --raw
    input: PathBuf,

    /// Treat the input as raw interleaved i16 IQ at this sample rate
    #[arg(long)]
    raw: Option<u32>,

    /// Samples per symbol of the capture
    #[arg(long, default_value_t = 5.0)]
    sps: f64,

    /// Follow encrypted calls instead of locking them out
    #[arg(long)]
    tune_enc: bool,

    /// Hold on a single talkgroup
    #[arg(long, default_value_t = 0)]
    tg_hold: u32,

    /// Relaxed data-CRC handling for marginal captures
    #[arg(long)]
    relaxed: bool,

    /// Hex-encoded symmetric key to load as key id 1
    #[arg(long)]
    key: Option<String>,

    /// Samples per processing block
    #[arg(long, default_value_t = 4096)]
    block: usize,
}

/// Stdout JSON sink: one event per line.
#[derive(Default)]
struct JsonlSink;

impl EventSink for JsonlSink {
    fn emit(&mut self, record: EventRecord) {
        println!("{}", to_json(&record));
    }
}

/// File playback has no hardware to steer; tuning is a logged no-op.
struct FileTuner;

impl Tuner for FileTuner {
    fn tune(&mut self, freq_hz: u64) -> Result<(), TuneError> {
        info!("tune request: {} Hz", freq_hz);
        Ok(())
    }
}

fn parse_hex_key(hex: &str) -> Result<Vec<u8>> {
    let cleaned: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..(i + 2).min(cleaned.len())], 16)
                .wrap_err("invalid hex key")
        })
        .collect()
}

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Cli::parse();

    let mut keys = KeyStore::new();
    if let Some(hex) = &args.key {
        keys.load_symmetric(1, parse_hex_key(hex)?);
    }

    let cfg = TrunkConfig {
        tune_enc_calls: args.tune_enc,
        tg_hold: args.tg_hold,
        dmr_crc_relaxed: args.relaxed,
        strict_data_sequence: !args.relaxed,
        ..TrunkConfig::default()
    };
    let mut pipeline = Pipeline::new(DemodConfig::for_sps(args.sps), cfg, keys);
    let mut tuner = FileTuner;
    let mut sink = JsonlSink;

    let mut reader = IqReader::open(&args.input, args.raw)
        .wrap_err_with(|| format!("failed to open {}", args.input.display()))?;
    info!(
        "decoding {} at {} Hz, sps {}",
        args.input.display(),
        reader.sample_rate(),
        args.sps
    );

    let mut block = Vec::with_capacity(args.block);
    let mut total = 0usize;
    while reader.read_block(&mut block, args.block)? > 0 {
        total += block.len();
        pipeline.process_iq(&block, &mut tuner, &mut sink);
        pipeline.tick(&mut tuner);
        block.clear();
    }

    info!("processed {} IQ samples", total);
    Ok(())
}
