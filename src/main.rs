use clap::Command;
use ringlog::*;

mod api;
mod config;
mod dashboard;
mod mcp;
mod prometheus;
mod promql;
mod timerange;

use config::Config;

fn main() {
    let matches = Command::new("genie")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Backend service for the Genie dashboard library")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(mcp::command())
        .subcommand(api::command())
        .get_matches();

    let (mode, args) = match matches.subcommand() {
        Some((mode, args)) => (mode.to_string(), args.clone()),
        None => unreachable!("subcommand is required"),
    };

    let config = match Config::try_from(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let level = match config.verbose {
        0 => Level::Info,
        1 => Level::Debug,
        _ => Level::Trace,
    };

    let log = LogBuilder::new()
        .output(Box::new(Stderr::new()))
        .build()
        .expect("failed to initialize log");

    let mut log = MultiLogBuilder::new()
        .level_filter(level.to_level_filter())
        .default(log)
        .build()
        .start();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to initialize tokio runtime");

    rt.spawn(async move {
        loop {
            tokio::time::sleep(core::time::Duration::from_millis(50)).await;
            let _ = log.flush();
        }
    });

    let result = match mode.as_str() {
        "mcp" => rt.block_on(mcp::run(config)),
        "serve" => rt.block_on(api::run(config)),
        other => {
            eprintln!("unknown subcommand: {other}");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        error!("{e:#}");
        // give the async log drain a chance to write the failure out
        std::thread::sleep(core::time::Duration::from_millis(100));
        std::process::exit(1);
    }
}
