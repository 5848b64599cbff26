use std::fs;
use std::io;
use std::mem;
use std::path;
use std::process;
use std::time::{Duration, Instant};

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ext_list_rank::synthetic::{check_ranked, generate_list, shuffle, write_text};
use ext_list_rank::{by_weight, Edge, ListRanker, ListRankerBuilder, RankReport, RecordStream};

const READ_BLOCK_LEN: usize = 4096;

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let size: u64 = arg_parser.value_of_t_or_exit("size");
    let seed: u64 = arg_parser.value_of_t_or_exit("seed");
    let memory = arg_parser
        .value_of("memory")
        .expect("value has a default")
        .parse::<ByteSize>()
        .expect("value is pre-validated")
        .as_u64();
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));

    let dumps = Dumps {
        initial: arg_parser.value_of("initial"),
        random: arg_parser.value_of("random"),
        ranked: arg_parser.value_of("final"),
    };

    println!("{} {} {}", size, memory, seed);

    let mut rng = StdRng::seed_from_u64(seed);

    let mut ranker_builder = ListRankerBuilder::new().with_memory_limit(memory);
    if let Some(threads) = threads {
        ranker_builder = ranker_builder.with_threads_number(threads);
    }
    if let Some(tmp_dir) = tmp_dir {
        ranker_builder = ranker_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    let mut ranker = match ranker_builder.build(StdRng::seed_from_u64(rng.gen())) {
        Ok(ranker) => ranker,
        Err(err) => {
            log::error!("ranker initialization error: {}", err);
            process::exit(1);
        }
    };

    let (report, elapsed) = match run(&mut ranker, size, &mut rng, &dumps) {
        Ok(result) => result,
        Err(err) => {
            log::error!("list ranking error: {}", err);
            process::exit(1);
        }
    };

    for level in &report.levels {
        log::info!(
            "level {}: {} edges, {} active, {} cancelled{}",
            level.level,
            level.len,
            level.active,
            level.cancel,
            if level.in_memory { ", ranked in memory" } else { "" }
        );
    }
    println!(
        "ranked {} edges in {} levels, {:.3}s",
        size,
        report.depth(),
        elapsed.as_secs_f64()
    );
}

/// Text dumps of the pipeline stages.
struct Dumps<'a> {
    initial: Option<&'a str>,
    random: Option<&'a str>,
    ranked: Option<&'a str>,
}

/// Generates, shuffles, ranks and verifies a list of `size` edges.
/// Returns the ranking report and the time the ranking took.
fn run(
    ranker: &mut ListRanker<StdRng>,
    size: u64,
    rng: &mut StdRng,
    dumps: &Dumps,
) -> ext_list_rank::Result<(RankReport, Duration)> {
    let mut list = ranker.create_stream()?;
    for edge in generate_list(size) {
        list.append(&edge)?;
    }
    log::debug!("generated a list of {} edges", list.len());
    if let Some(path) = dumps.initial {
        dump(&mut list, path)?;
    }

    let run_len = (ranker.memory_limit() / 2) as usize / mem::size_of::<Edge>();
    let mut shuffled = ranker.create_stream()?;
    shuffle(&mut list, &mut shuffled, ranker.tmp_dir(), run_len, rng)?;
    drop(list);
    log::debug!("shuffled {} edges", shuffled.len());
    if let Some(path) = dumps.random {
        dump(&mut shuffled, path)?;
    }

    let mut ranked = ranker.create_stream()?;
    let started = Instant::now();
    let report = ranker.rank(&mut shuffled, &mut ranked)?;
    let elapsed = started.elapsed();
    drop(shuffled);

    let mut ranked_s = ranker.create_stream()?;
    ranker.sort_stream(&mut ranked, &mut ranked_s, by_weight)?;
    drop(ranked);

    let count = check_ranked(ranked_s.reader(READ_BLOCK_LEN)?)?;
    log::debug!("verified {} ranked edges", count);
    if let Some(path) = dumps.ranked {
        dump(&mut ranked_s, path)?;
    }

    return Ok((report, elapsed));
}

fn dump(stream: &mut RecordStream<Edge>, path: &str) -> ext_list_rank::Result<()> {
    log::debug!("writing {} edges to {}", stream.len(), path);
    let mut writer = io::BufWriter::new(fs::File::create(path)?);
    write_text(stream.reader(READ_BLOCK_LEN)?, &mut writer)
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
    clap::App::new("ext-list-rank")
        .about("external memory list ranking of a random list")
        .arg(
            clap::Arg::new("size")
                .short('t')
                .long("size")
                .help("number of edges in the list")
                .takes_value(true)
                .default_value("1000")
                .validator(|v| v.parse::<u64>().map(|_| ()).map_err(|err| err.to_string())),
        )
        .arg(
            clap::Arg::new("memory")
                .short('m')
                .long("memory")
                .help("memory budget")
                .takes_value(true)
                .default_value("64MiB")
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Memory size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("seed")
                .short('z')
                .long("seed")
                .help("random number generator seed")
                .takes_value(true)
                .default_value("17")
                .validator(|v| v.parse::<u64>().map(|_| ()).map_err(|err| err.to_string())),
        )
        .arg(
            clap::Arg::new("initial")
                .short('i')
                .long("initial")
                .help("write the generated list as text")
                .takes_value(true)
                .min_values(0)
                .default_missing_value("osi.txt"),
        )
        .arg(
            clap::Arg::new("random")
                .short('r')
                .long("random")
                .help("write the shuffled list as text")
                .takes_value(true)
                .min_values(0)
                .default_missing_value("osr.txt"),
        )
        .arg(
            clap::Arg::new("final")
                .short('f')
                .long("final")
                .help("write the ranked list as text")
                .takes_value(true)
                .min_values(0)
                .default_missing_value("osf.txt"),
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
        .arg(
            clap::Arg::new("threads")
                .long("threads")
                .help("number of threads to use for parallel sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .get_matches()
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
