#![warn(clippy::all)]

#[macro_use]
extern crate log;

extern crate clap;
use clap::{crate_version, Parser};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

extern crate flate2;
extern crate lz4;
extern crate xz2;

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::process;

use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

use librss_tools::{CaptureReader, Config};
use librss_verify::RssPredictor;

mod report;
use report::{PacketReport, Summary};

/// Predict the RSS hash and receive queue of captured packets
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<String>,

    /// RSS hash key, in hex (default: Microsoft key)
    #[arg(short, long)]
    key: Option<String>,

    /// Hash functions, comma-separated (for ex. `ipv4,nonfrag-ipv4-tcp` or `ip,tcp`)
    #[arg(short = 'H', long)]
    hash_functions: Option<String>,

    /// Number of receive queues
    #[arg(short, long)]
    queues: Option<u16>,

    /// Redirection table size, entries spread over queues
    #[arg(long)]
    reta_size: Option<u32>,

    /// Redirection table entries, comma-separated
    #[arg(long, value_delimiter = ',')]
    reta: Option<Vec<u16>>,

    /// Also predict the symmetric hash, with rule `sort` (default) or `xor` (`--symmetric=xor`)
    #[arg(
        short,
        long,
        value_name = "RULE",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "sort"
    )]
    symmetric: Option<String>,

    /// Verify that all packets were received on this queue
    #[arg(short, long)]
    expect_queue: Option<u16>,

    /// Output JSON lines
    #[arg(short, long)]
    json: bool,

    /// Log file (default: log to stderr)
    #[arg(short, long)]
    log_file: Option<String>,

    /// Log file output directory
    #[arg(short, long)]
    outdir: Option<String>,

    /// Be verbose
    #[arg(short, long)]
    verbose: bool,

    /// Input file (pcap or pcap-ng, optionally compressed), `-` for stdin
    input: String,
}

fn load_config(config: &mut Config, filename: &str) -> Result<(), io::Error> {
    debug!("Loading configuration {filename}");
    let path = Path::new(&filename);
    let file = File::open(path)?;
    config.load_config(file)
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let env_filter = EnvFilter::try_from_env("RSS_PREDICT_LOG")
        .unwrap_or_else(|_| EnvFilter::from_default_env().add_directive(level.into()));
    match config.get("log_file") {
        Some(log_file) => {
            let output_dir = config.get("output_dir").unwrap_or(".");
            let file_appender = RollingFileAppender::new(Rotation::NEVER, output_dir, log_file);
            tracing_subscriber::fmt()
                .with_writer(file_appender)
                .with_env_filter(env_filter)
                .with_ansi(false)
                .compact()
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(io::stderr)
                .with_env_filter(env_filter)
                .compact()
                .init();
        }
    }
}

fn open_input(input_filename: &str) -> io::Result<Box<dyn io::Read + Send>> {
    if input_filename == "-" {
        return Ok(Box::new(io::stdin()));
    }
    let path = Path::new(input_filename);
    let file = File::open(path)?;
    let reader = if input_filename.ends_with(".gz") {
        Box::new(GzDecoder::new(file))
    } else if input_filename.ends_with(".xz") {
        Box::new(XzDecoder::new(file))
    } else if input_filename.ends_with(".lz4") {
        Box::new(lz4::Decoder::new(file)?)
    } else {
        Box::new(file) as Box<dyn io::Read + Send>
    };
    Ok(reader)
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    // load config
    let mut config = Config::default();
    if let Some(filename) = args.config.as_ref() {
        load_config(&mut config, filename)?;
    }
    // override config options from command-line arguments
    if let Some(key) = args.key.as_ref() {
        config.set("rss.key", key.as_str());
    }
    if let Some(hf) = args.hash_functions.as_ref() {
        config.set("rss.hash_functions", hf.as_str());
    }
    if let Some(n) = args.queues {
        config.set("rss.nb_queues", i64::from(n));
    }
    if let Some(size) = args.reta_size {
        config.set("rss.reta_size", i64::from(size));
    }
    if let Some(reta) = args.reta.as_ref() {
        let entries: Vec<i64> = reta.iter().map(|&q| i64::from(q)).collect();
        config.set("rss.reta", entries);
    }
    if let Some(rule) = args.symmetric.as_ref() {
        config.set("rss.symmetric", rule.as_str());
    }
    if let Some(log_file) = args.log_file.as_ref() {
        config.set("log_file", log_file.as_str());
    }
    if let Some(dir) = args.outdir.as_ref() {
        config.set("output_dir", dir.as_str());
    }

    init_logging(&config, args.verbose);

    // Now, really start
    info!("rss-predict {}", crate_version!());

    let predictor = RssPredictor::from_config(&config).map_err(|e| {
        error!("Invalid RSS configuration: {e}");
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;
    info!(
        "key {}, hash functions {}, RETA size {}",
        predictor.key(),
        predictor.hash_functions(),
        predictor.reta().size()
    );

    let input_reader = open_input(&args.input)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut summary = Summary::default();
    let reader = CaptureReader::new(&config);
    let res = reader.run(input_reader, |packet| {
        let report = PacketReport::new(&predictor, packet, args.expect_queue);
        summary.add(&report);
        report.write(&mut out, args.json)?;
        Ok(())
    });
    let count = res.map_err(|e| {
        error!("Error while reading {}: {e}", args.input);
        io::Error::new(io::ErrorKind::InvalidData, e.to_string())
    })?;
    debug!("{count} packets read");

    summary.write(&mut out, args.json)?;
    out.flush()?;

    info!("rss-predict: done, exiting");
    if summary.mismatches > 0 {
        warn!("{} packets not received on the expected queue", summary.mismatches);
        process::exit(1);
    }
    Ok(())
}
