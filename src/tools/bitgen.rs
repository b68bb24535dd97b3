use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, LevelFilter};

use bitgen_rs::bitchain::{BitchainBitstream, BitchainPacking};
use bitgen_rs::bitstream::DeviceBitstream;
use bitgen_rs::config_db::ConfigDatabase;
use bitgen_rs::pack::{ConfigCircuitry, PackingManager};
use bitgen_rs::synth::SynthResultManager;

/// Generate the raw device bitstream from a config database and the
/// synthesis, packing, placement, and routing results
#[derive(Clone, Debug, Parser)]
struct Args {
    /// logging verbosity
    #[arg(short, long, value_enum, default_value = "info")]
    verbose: VerboseLevel,
    /// configuration database file
    #[arg(short, long = "config_db")]
    config_db: PathBuf,
    /// synthesis result (BLIF)
    #[arg(short, long)]
    blif: PathBuf,
    /// packing result (.net)
    #[arg(short, long)]
    net: PathBuf,
    /// placement result
    #[arg(short, long)]
    place: PathBuf,
    /// routing result
    #[arg(short, long)]
    route: PathBuf,
    /// output memory-image file; the bitstream is only reported when absent
    #[arg(long = "output_memh")]
    output_memh: Option<PathBuf>,
    /// word size of the memory image
    #[arg(long = "memh_width", default_value_t = 16)]
    memh_width: u32,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VerboseLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Err,
    Critical,
    Off,
}

impl From<VerboseLevel> for LevelFilter {
    fn from(level: VerboseLevel) -> Self {
        match level {
            VerboseLevel::Trace => LevelFilter::Trace,
            VerboseLevel::Debug => LevelFilter::Debug,
            VerboseLevel::Info => LevelFilter::Info,
            VerboseLevel::Warn => LevelFilter::Warn,
            // the log facade has no critical level
            VerboseLevel::Err | VerboseLevel::Critical => LevelFilter::Error,
            VerboseLevel::Off => LevelFilter::Off,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.verbose.into())
        .init();

    info!("====== report input files ======");
    info!("[FILE] Config database: {}", args.config_db.display());
    info!("[FILE] BLIF (synthesis result): {}", args.blif.display());
    info!("[FILE] Net (packing result): {}", args.net.display());
    info!("[FILE] Place (placement result): {}", args.place.display());
    info!("[FILE] Route (routing result): {}", args.route.display());

    info!("====== parse config database ======");
    let config_db = ConfigDatabase::parse(&args.config_db)
        .with_context(|| format!("parsing config database {}", args.config_db.display()))?;
    info!("====== report config database ======");
    for name in config_db.blocks().keys() {
        info!("[CONFIG] Block({name})");
    }
    info!("====== config database parsed and established ======");

    info!("====== analyze synthesized design ======");
    let synth_mgr = SynthResultManager::parse(&args.blif)
        .with_context(|| format!("parsing BLIF {}", args.blif.display()))?;
    info!("====== report lut instances ======");
    for (name, lut) in synth_mgr.luts() {
        info!("[BLIF] LUT instance({name}): {}", lut.table().to_verilog());
    }
    info!("====== synthesized design analyzed ======");

    info!("====== parse packing result ======");
    let mut pack_mgr = PackingManager::new(&config_db, &synth_mgr, BitchainPacking::new());
    pack_mgr
        .parse(&args.net)
        .with_context(|| format!("parsing packing result {}", args.net.display()))?;
    pack_mgr.circuitry().report_block_instances();
    let packing = pack_mgr.into_circuitry();
    info!("====== packing result parsed ======");

    info!("====== initializing bitstream ======");
    let mut bitstream =
        BitchainBitstream::new(&config_db, &packing).context("initializing the device bitstream")?;

    info!("====== parse placing result ======");
    let place_file = File::open(&args.place)
        .with_context(|| format!("opening placing result {}", args.place.display()))?;
    bitstream
        .parse_placing_result(BufReader::new(place_file), packing.num_block_instances())
        .with_context(|| format!("parsing placing result {}", args.place.display()))?;
    info!("====== placing result parsed ======");
    bitstream.report_bitstream(64);

    info!("====== parse routing result ======");
    let route_file = File::open(&args.route)
        .with_context(|| format!("opening routing result {}", args.route.display()))?;
    bitstream
        .parse_routing_result(BufReader::new(route_file))
        .with_context(|| format!("parsing routing result {}", args.route.display()))?;
    info!("====== routing result parsed ======");
    bitstream.report_bitstream(64);

    if let Some(path) = &args.output_memh {
        bitstream
            .write_memh(path, args.memh_width)
            .with_context(|| format!("writing memory image {}", path.display()))?;
    }

    Ok(())
}
