//! # eudaq_cli
//!
//! Part of the libeudaq crate family.
//!
//! Command line tools to inspect and re-synchronise data files.
//!
//! ## Use
//!
//! Write a template re-synchroniser configuration:
//!
//! ```bash
//! eudaq_cli new -p resync.yml
//! ```
//!
//! Print the events of a file within a range of event numbers, converting each one:
//!
//! ```bash
//! eudaq_cli read -i run000001.raw -e 10 -E 20 --std
//! ```
//!
//! Ranges: `-e/-E` event numbers `[e, E)`, `--tg/--TG` trigger numbers `[tg, TG)`,
//! `--ts/--TS` timestamps `[ts, TS]`. A lower bound without an upper bound selects everything
//! from there on. Events are only printed when a range is given. The whole file is always read:
//! `-s` prints statistics of every event, `-o` copies the selected events to another file.
//!
//! Re-synchronise a strip module run:
//!
//! ```bash
//! eudaq_cli resync -i run000001.raw -o sync000001.raw -s
//! ```
//!
//! `--dut` or `--timing` restricts the alignment to one module plane. All other settings come
//! from the YAML file given with `-c`.
//!
//! Library messages are written to `eudaq_cli.log`; `-v` sets their level.
use clap::builder::ValueParser;
use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{mpsc, Arc};

use libeudaq::config::Configuration;
use libeudaq::converter::StdEventDispatcher;
use libeudaq::converters::builtin_registry;
use libeudaq::error::ConfigError;
use libeudaq::io::FileBackends;
use libeudaq::resync::{process, Mode, ResyncConfig};
use libeudaq::selection::{read_to_end, EventSelection, ReaderStats};
use libeudaq::worker_status::{Stage, WorkerStatus};

const LEVELS: [&str; 5] = ["ERROR", "WARN", "INFO", "DEBUG", "TRACE"];
const READER_SECTION: &str = "euCliReader";

fn make_template_config(path: &Path) -> Result<(), ConfigError> {
    ResyncConfig::default().write_config_file(path)
}

fn verbosity_arg() -> Arg {
    Arg::new("verbosity")
        .short('v')
        .long("verbosity")
        .value_parser(LEVELS)
        .default_value("INFO")
        .help("Log level of the library")
}

fn cli() -> Command {
    let range = |id: &'static str, short: Option<char>, parser: ValueParser, help: &'static str| {
        let arg = Arg::new(id)
            .long(id)
            .value_parser(parser)
            .default_value("0")
            .help(help);
        match short {
            Some(c) => arg.short(c),
            None => arg,
        }
    };
    Command::new("eudaq_cli")
        .about("EUDAQ command line file reader and re-synchroniser")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("new")
                .about("Make a template re-synchroniser configuration yaml file")
                .arg(
                    Arg::new("path")
                        .short('p')
                        .long("path")
                        .required(true)
                        .help("Path to the file"),
                ),
        )
        .subcommand(
            Command::new("read")
                .about("Print, select and convert the events of a file")
                .arg(Arg::new("input").short('i').long("input").required(true).help("Input file (eg. run000001.raw)"))
                .arg(Arg::new("output").short('o').long("output").help("Copy selected events to this file"))
                .arg(Arg::new("config").short('c').long("config").help("Configuration file for the converters"))
                .arg(range("event", Some('e'), clap::value_parser!(u32).into(), "Event number low"))
                .arg(range("eventhigh", Some('E'), clap::value_parser!(u32).into(), "Event number high"))
                .arg(range("tg", None, clap::value_parser!(u32).into(), "Trigger number low"))
                .arg(range("TG", None, clap::value_parser!(u32).into(), "Trigger number high"))
                .arg(range("ts", None, clap::value_parser!(u64).into(), "Timestamp low"))
                .arg(range("TS", None, clap::value_parser!(u64).into(), "Timestamp high"))
                .arg(Arg::new("statistics").short('s').long("statistics").action(ArgAction::SetTrue).help("Print statistics"))
                .arg(Arg::new("std").long("std").action(ArgAction::SetTrue).help("Convert selected events to StandardEvents"))
                .arg(verbosity_arg()),
        )
        .subcommand(
            Command::new("resync")
                .about("Re-synchronise strip module data by BCID")
                .arg(Arg::new("input").short('i').long("input").help("Input file (eg. run000001.raw)"))
                .arg(Arg::new("output").short('o').long("output").help("Output file (eg. sync000001.raw)"))
                .arg(Arg::new("config").short('c').long("config").help("Re-synchroniser yaml configuration"))
                .arg(Arg::new("statistics").short('s').long("statistics").action(ArgAction::SetTrue).help("Print statistics"))
                .arg(Arg::new("dut").long("dut").action(ArgAction::SetTrue).help("Work with just the DUT plane"))
                .arg(Arg::new("timing").long("timing").action(ArgAction::SetTrue).help("Work with just the timing plane"))
                .arg(verbosity_arg()),
        )
}

/// Send library (spdlog) messages to a log file.
fn init_library_log(level: &str) -> Result<(), spdlog::Error> {
    let level = match level {
        "ERROR" => spdlog::Level::Error,
        "WARN" => spdlog::Level::Warn,
        "DEBUG" => spdlog::Level::Debug,
        "TRACE" => spdlog::Level::Trace,
        _ => spdlog::Level::Info,
    };
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./eudaq_cli.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .level_filter(spdlog::LevelFilter::MoreSevereEqual(level))
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

fn percent_bar(pb_manager: &MultiProgress, stage: Stage) -> Result<ProgressBar, Box<dyn Error>> {
    let pb = pb_manager.add(ProgressBar::new(100));
    pb.set_style(bar_style(stage)?);
    Ok(pb)
}

fn bar_style(stage: Stage) -> Result<ProgressStyle, Box<dyn Error>> {
    let template = format!(
        "{{msg:12}} [{{bar:40.{}/blue}}] {{pos:>3}}%",
        stage.color()
    );
    Ok(ProgressStyle::with_template(&template)?.progress_chars("=> "))
}

fn read_file(args: &ArgMatches, pb_manager: &MultiProgress) -> Result<(), Box<dyn Error>> {
    let input = args
        .get_one::<String>("input")
        .map(PathBuf::from)
        .ok_or("An input file is required")?;
    let bound = |id: &str| args.get_one::<u32>(id).copied().unwrap_or(0);
    let time_bound = |id: &str| args.get_one::<u64>(id).copied().unwrap_or(0);
    let selection = EventSelection::from_bounds(
        (bound("event"), bound("eventhigh")),
        (bound("tg"), bound("TG")),
        (time_bound("ts"), time_bound("TS")),
    );

    let mut conf = Configuration::new();
    if let Some(path) = args.get_one::<String>("config") {
        let path = Path::new(path);
        if path.exists() {
            conf = Configuration::read_file(path)?.with_section(READER_SECTION);
        } else {
            log::warn!("Config file {} not found!", path.to_string_lossy());
        }
    }

    let backends = FileBackends::with_defaults()?;
    let mut reader = backends.open_reader(&input)?;
    let mut writer = match args.get_one::<String>("output") {
        Some(path) => Some(backends.open_writer(Path::new(path))?),
        None => None,
    };
    let dispatcher = match args.get_flag("std") {
        true => Some(StdEventDispatcher::new(
            Arc::new(builtin_registry()?),
            Some(Arc::new(conf)),
        )),
        false => None,
    };
    let show_stats = args.get_flag("statistics");

    let pb = percent_bar(pb_manager, Stage::Scan)?;
    pb.set_message("Reading");
    let mut stats = ReaderStats::default();
    let event_count = read_to_end(reader.as_mut(), &mut stats, |ev, progress| {
        let selected = selection.accepts(ev);
        if selection.is_active() && selected {
            pb_manager.println(ev.to_string())?;
            if let Some(dispatcher) = dispatcher.as_ref() {
                match dispatcher.to_standard(ev) {
                    Ok(std) => pb_manager.println(format!(">>>>>{}<<<<", std.num_planes()))?,
                    Err(e) => log::warn!("Event {} could not be converted: {e}", ev.event_n()),
                }
            }
        }
        if let Some(writer) = writer.as_mut() {
            if selected {
                writer.write(ev)?;
            }
        }
        pb.set_position((progress * 100.0) as u64);
        Ok::<(), Box<dyn Error>>(())
    })?;
    pb.finish();

    log::info!("There are {event_count} events");
    if let Some(mut writer) = writer {
        writer.flush()?;
        log::info!(
            "Wrote {} to {}",
            human_bytes::human_bytes(writer.file_bytes() as f64),
            writer.path().to_string_lossy()
        );
    }
    if show_stats {
        if let (Some(low), Some(high)) = (stats.trigger_low, stats.trigger_high) {
            log::info!("Trigger numbers found from {low} to {high}");
        }
        log::info!("Devices found:");
        for (stream_n, description) in stats.devices.iter() {
            log::info!("{stream_n} => {description}");
        }
    }
    Ok(())
}

fn resync_file(args: &ArgMatches, pb_manager: &MultiProgress) -> Result<(), Box<dyn Error>> {
    let mut config = match args.get_one::<String>("config") {
        Some(path) => {
            log::info!("Loading config from {path}...");
            ResyncConfig::read_config_file(Path::new(path))?
        }
        None => ResyncConfig::default(),
    };
    if let Some(input) = args.get_one::<String>("input") {
        config.input_path = PathBuf::from(input);
    }
    if let Some(output) = args.get_one::<String>("output") {
        config.output_path = Some(PathBuf::from(output));
    }
    match (args.get_flag("dut"), args.get_flag("timing")) {
        (true, true) => {
            log::warn!("Cannot use exclusively both planes at the same time, running combined");
            config.mode = Mode::Combined;
        }
        (true, false) => config.mode = Mode::DutOnly,
        (false, true) => config.mode = Mode::TimingOnly,
        (false, false) => (),
    }
    if !config.input_path.exists() {
        return Err(format!(
            "Input file {} does not exist, if not sure how to give one, try --help",
            config.input_path.to_string_lossy()
        )
        .into());
    }
    log::info!("Input: {}", config.input_path.to_string_lossy());
    if let Some(output) = config.output_path.as_ref() {
        log::info!("Output: {}", output.to_string_lossy());
    }
    log::info!("Mode: {:?}", config.mode);

    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut stage = Stage::Scan;
    let pb = percent_bar(pb_manager, stage)?;
    pb.set_message("Scanning");
    let worker_config = config.clone();
    let handle = std::thread::spawn(move || process(worker_config, tx, 0));

    // ends when the worker drops its sender
    for status in rx.iter() {
        if status.stage != stage {
            stage = status.stage;
            pb.set_style(bar_style(stage)?);
            pb.set_message(format!("Writing {}", status.run_number));
        }
        pb.set_position((status.progress * 100.0) as u64);
    }
    pb.finish();

    let summary = handle
        .join()
        .map_err(|_| "Failed to join re-synchronisation worker!")??;
    if args.get_flag("statistics") {
        for line in summary.to_string().lines() {
            log::info!("{line}");
        }
    }
    if config.output_path.is_some() {
        log::info!(
            "Re-synchronised {} of {} events.",
            summary.written,
            summary.events
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    let matches = cli().get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    let pb_manager = MultiProgress::new();
    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return ExitCode::FAILURE;
    }

    let result = match matches.subcommand() {
        Some(("new", args)) => {
            let path = args
                .get_one::<String>("path")
                .map(PathBuf::from)
                .unwrap_or_default();
            log::info!("Making a template config at {}...", path.to_string_lossy());
            make_template_config(&path).map_err(Box::<dyn Error>::from)
        }
        Some((name, args)) => {
            let level = args
                .get_one::<String>("verbosity")
                .map(String::as_str)
                .unwrap_or("INFO");
            match init_library_log(level) {
                Ok(()) => match name {
                    "read" => read_file(args, &pb_manager),
                    _ => resync_file(args, &pb_manager),
                },
                Err(e) => Err(Box::<dyn Error>::from(e)),
            }
        }
        None => Ok(()),
    };

    match result {
        Ok(()) => {
            log::info!("Done.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            log::error!("Check eudaq_cli.log for details.");
            ExitCode::FAILURE
        }
    }
}
