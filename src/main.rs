use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{Arg, ArgMatches, Command, value_parser};
use log::{error, info};

use redactline::app::{self, ImageJob};
use redactline::config::{AppConfig, app_name, app_version};
use redactline::redact::{KernelSize, RedactConfig, RedactStrategy};

fn main() {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(app_version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("check")
                .about("Build the redaction graph, preroll it and print its topology.")
                .arg(
                    Arg::new("settings")
                        .short('s')
                        .long("settings")
                        .value_name("FILE")
                        .help("JSON settings file.")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .value_name("FILE")
                        .help("Video to redact, relative to the base directory.")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Where the redacted video is written.")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("infer-config")
                        .long("infer-config")
                        .value_name("FILE")
                        .help("Detector configuration file.")
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("image")
                .about("Redact a still image from a JSON list of detections.")
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .value_name("FILE")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("detections")
                        .short('d')
                        .long("detections")
                        .value_name("FILE")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("classes")
                        .short('c')
                        .long("classes")
                        .value_name("IDS")
                        .help("Comma separated class ids to redact.")
                        .value_delimiter(',')
                        .value_parser(value_parser!(i32)),
                )
                .arg(
                    Arg::new("strategy")
                        .long("strategy")
                        .value_parser(["blur", "fill"])
                        .default_value("blur"),
                )
                .arg(
                    Arg::new("kernel")
                        .short('k')
                        .long("kernel")
                        .value_name("N|WxH")
                        .help("Odd Gaussian kernel size, square or width x height.")
                        .default_value("51"),
                ),
        )
        .get_matches();

    let outcome = match matches.subcommand() {
        Some(("check", args)) => run_check(args),
        Some(("image", args)) => run_image(args),
        _ => unreachable!("a subcommand is required"),
    };

    if let Err(e) = outcome {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn settings(args: &ArgMatches) -> anyhow::Result<AppConfig> {
    let mut config = match args.get_one::<PathBuf>("settings") {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(input) = args.get_one::<PathBuf>("input") {
        config.input = input.clone();
    }
    if let Some(output) = args.get_one::<PathBuf>("output") {
        config.output = output.clone();
    }
    if let Some(infer) = args.get_one::<PathBuf>("infer-config") {
        config.infer_config = infer.clone();
    }
    Ok(config.resolve()?)
}

fn run_check(args: &ArgMatches) -> anyhow::Result<()> {
    let config = settings(args)?;
    let topology = app::check(&config)?;
    println!("{}", topology);
    info!("Output would be written to {}", config.output.display());
    Ok(())
}

fn run_image(args: &ArgMatches) -> anyhow::Result<()> {
    let mut redact = RedactConfig::default();
    if let Some(classes) = args.get_many::<i32>("classes") {
        redact.classes = classes.copied().collect::<BTreeSet<_>>();
    }
    let strategy = args.get_one::<String>("strategy").map_or("blur", String::as_str);
    let kernel = match args.get_one::<String>("kernel") {
        Some(text) => text.parse::<KernelSize>()?,
        None => KernelSize::default(),
    };
    redact.strategy = RedactStrategy::parse(strategy, kernel).context("Invalid redaction settings")?;

    let job = ImageJob {
        input: args.get_one::<PathBuf>("input").cloned().context("missing --input")?,
        detections: args
            .get_one::<PathBuf>("detections")
            .cloned()
            .context("missing --detections")?,
        output: args.get_one::<PathBuf>("output").cloned().context("missing --output")?,
        redact,
    };
    let applied = app::redact_image(&job)?;
    println!("{} region(s) redacted into {}", applied, job.output.display());
    Ok(())
}
