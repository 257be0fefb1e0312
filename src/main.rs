use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;
use std::time::Instant;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;
use rand::prelude::*;

use runsort::{Config, ExternalSorter, InputBuffer, Record, RunDescriptor, RunStore};

type T = i32;

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let input = arg_parser.value_of("input").expect("value is required");
    let run_file = arg_parser.value_of("run_file").expect("value is required");

    let memory = arg_parser.value_of("memory").expect("value has a default");
    let buffer = arg_parser.value_of("buffer").expect("value has a default");
    let k = parse_record_count(memory);
    let buffer_elems = parse_record_count(buffer);
    let max_runs: usize = arg_parser.value_of_t_or_exit("max_runs");

    if arg_parser.is_present("generate") {
        let count: u64 = arg_parser.value_of_t_or_exit("generate");
        let seed: u64 = arg_parser.value_of_t_or_exit("seed");
        if let Err(err) = generate_input(path::Path::new(input), count, seed) {
            log::error!("input generation error: {}", err);
            process::exit(1);
        }
    }

    let config = Config {
        k,
        buffer_elems,
        max_runs,
        run_file_path: path::PathBuf::from(run_file),
        input_path: path::PathBuf::from(input),
    };

    let sorter: ExternalSorter<T> = match ExternalSorter::new(config) {
        Ok(sorter) => sorter,
        Err(err) => {
            log::error!("sorter initialization error: {}", err);
            process::exit(1);
        }
    };

    let started = Instant::now();
    let outcome = match sorter.sort() {
        Ok(outcome) => outcome,
        Err(err) => {
            log::error!("sorting error: {}", err);
            process::exit(1);
        }
    };
    log::info!(
        "sorted {} records into {} in {:.3}s",
        outcome.final_run.element_count,
        run_file,
        started.elapsed().as_secs_f64()
    );
    for run in &outcome.generated_runs {
        log::debug!("generated run {}: {} records", run.id, run.element_count);
    }

    if arg_parser.is_present("verify") {
        match verify_run(&outcome.store, &outcome.final_run, buffer_elems) {
            Ok(true) => log::info!("verification passed: final run is sorted"),
            Ok(false) => {
                log::error!("verification failed: final run is out of order");
                process::exit(1);
            }
            Err(err) => {
                log::error!("verification error: {}", err);
                process::exit(1);
            }
        }
    }

    if let Some(output) = arg_parser.value_of("output") {
        if let Err(err) = export_run(&outcome.store, &outcome.final_run, output, buffer_elems) {
            log::error!("output export error: {}", err);
            process::exit(1);
        }
        log::info!("exported sorted records to {}", output);
    }

    if let Err(err) = outcome.store.close() {
        log::error!("run file closing error: {}", err);
        process::exit(1);
    }
}

/// Converts a human-readable byte size into a record count.
fn parse_record_count(size: &str) -> usize {
    let bytes = size.parse::<ByteSize>().expect("value is pre-validated").as_u64();
    (bytes / T::WIDTH as u64).max(1) as usize
}

/// Writes `count` seeded random records to `path`.
fn generate_input(path: &path::Path, count: u64, seed: u64) -> io::Result<()> {
    log::info!("generating {} random records into {}", count, path.display());

    let mut writer = io::BufWriter::new(fs::File::create(path)?);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut scratch = [0u8; 4];
    for _ in 0..count {
        let value: T = rng.gen();
        value.to_bytes(&mut scratch);
        writer.write_all(&scratch)?;
    }
    writer.flush()
}

/// Streams the final run, checking it is non-decreasing.
fn verify_run(store: &RunStore, run: &RunDescriptor, buffer_elems: usize) -> runsort::Result<bool> {
    let mut input = InputBuffer::<T>::new(store.stream(), *run, buffer_elems);
    let mut previous: Option<T> = None;
    while let Some(item) = input.next()? {
        if let Some(previous) = previous {
            if item < previous {
                return Ok(false);
            }
        }
        previous = Some(item);
    }
    Ok(true)
}

/// Copies the final run out of the store into a raw record file.
fn export_run(
    store: &RunStore,
    run: &RunDescriptor,
    output: &str,
    buffer_elems: usize,
) -> runsort::Result<()> {
    let mut writer = io::BufWriter::new(fs::File::create(output)?);
    let mut input = InputBuffer::<T>::new(store.stream(), *run, buffer_elems);
    let mut scratch = [0u8; 4];
    while let Some(item) = input.next()? {
        item.to_bytes(&mut scratch);
        writer.write_all(&scratch)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("runsort")
        .about("external sorter for fixed-width binary records")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file of raw records to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("run_file")
                .short('r')
                .long("run-file")
                .help("run container file (created, truncated)")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("memory")
                .short('m')
                .long("memory")
                .help("workspace size (bytes, human-readable)")
                .takes_value(true)
                .default_value("4MiB")
                .validator(validate_byte_size),
        )
        .arg(
            clap::Arg::new("buffer")
                .short('b')
                .long("buffer")
                .help("I/O block size (bytes, human-readable)")
                .takes_value(true)
                .default_value("4KiB")
                .validator(validate_byte_size),
        )
        .arg(
            clap::Arg::new("max_runs")
                .long("max-runs")
                .help("run directory capacity")
                .takes_value(true)
                .default_value("4096"),
        )
        .arg(
            clap::Arg::new("generate")
                .short('g')
                .long("generate")
                .help("write this many random records to the input file first")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("seed")
                .long("seed")
                .help("seed for --generate")
                .takes_value(true)
                .default_value("0"),
        )
        .arg(
            clap::Arg::new("verify")
                .long("verify")
                .help("stream the final run and check its order")
                .takes_value(false),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("export the sorted records to a raw file")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .get_matches()
}

fn validate_byte_size(v: &str) -> Result<(), String> {
    match v.parse::<ByteSize>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("byte size format incorrect: {}", err)),
    }
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
