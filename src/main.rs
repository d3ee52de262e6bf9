//! Microgrid simulator entry point: CLI wiring, logging and the community run.

use std::path::Path;
use std::process;

use tracing_subscriber::EnvFilter;

use microgrid_sim::config::ScenarioConfig;
use microgrid_sim::forecast::SECONDS_PER_DAY;
use microgrid_sim::io::export::export_csv;
use microgrid_sim::runner::{Hosting, run_scenario};

/// Parsed CLI arguments.
struct CliArgs {
    scenario_path: Option<String>,
    preset: Option<String>,
    seed_override: Option<u64>,
    days_override: Option<u64>,
    telemetry_out: Option<String>,
}

fn print_help() {
    eprintln!("microgrid-sim: community microgrid planning simulator");
    eprintln!();
    eprintln!("Usage: microgrid-sim [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --scenario <path>        Load scenario from TOML config file");
    eprintln!(
        "  --preset <name>          Use a built-in preset ({})",
        ScenarioConfig::PRESETS.join(", ")
    );
    eprintln!("  --seed <u64>             Override random seed");
    eprintln!("  --days <n>               Override simulated duration in days");
    eprintln!("  --telemetry-out <path>   Export step records to CSV");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --scenario or --preset is given, the baseline preset is used.");
    eprintln!("Log verbosity follows RUST_LOG (default: info).");
}

fn value_of(args: &[String], i: usize, flag: &str, what: &str) -> String {
    match args.get(i) {
        Some(value) => value.clone(),
        None => {
            eprintln!("error: {flag} requires {what}");
            process::exit(1);
        }
    }
}

fn parse_number(raw: &str, flag: &str) -> u64 {
    raw.parse::<u64>().unwrap_or_else(|_| {
        eprintln!("error: {flag} value \"{raw}\" is not a valid u64");
        process::exit(1);
    })
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        scenario_path: None,
        preset: None,
        seed_override: None,
        days_override: None,
        telemetry_out: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--scenario" => {
                i += 1;
                cli.scenario_path = Some(value_of(&args, i, "--scenario", "a path argument"));
            }
            "--preset" => {
                i += 1;
                cli.preset = Some(value_of(&args, i, "--preset", "a name argument"));
            }
            "--seed" => {
                i += 1;
                let raw = value_of(&args, i, "--seed", "a u64 argument");
                cli.seed_override = Some(parse_number(&raw, "--seed"));
            }
            "--days" => {
                i += 1;
                let raw = value_of(&args, i, "--days", "a day count");
                cli.days_override = Some(parse_number(&raw, "--days"));
            }
            "--telemetry-out" => {
                i += 1;
                cli.telemetry_out = Some(value_of(&args, i, "--telemetry-out", "a path argument"));
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args();

    // Load config: --scenario takes priority, then --preset, then baseline default
    let loaded = if let Some(ref path) = cli.scenario_path {
        ScenarioConfig::from_toml_file(Path::new(path))
    } else if let Some(ref name) = cli.preset {
        ScenarioConfig::from_preset(name)
    } else {
        Ok(ScenarioConfig::baseline())
    };
    let mut scenario = loaded.unwrap_or_else(|e| {
        eprintln!("{e}");
        process::exit(1);
    });

    if let Some(seed) = cli.seed_override {
        scenario.simulation.seed = seed;
    }
    if let Some(days) = cli.days_override {
        scenario.simulation.duration_s = days * SECONDS_PER_DAY;
    }

    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    let summary = match run_scenario(&scenario, Hosting::Threaded) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    let step = scenario.simulation.step_s;
    for outcome in &summary.planning {
        println!("{outcome}");
        for (building, cost) in outcome.building_costs(&scenario.price.energy_price, step) {
            println!("  building {building:>3}: planned energy cost {cost:.3}");
        }
    }
    println!("\n{}", summary.kpis);

    if let Some(ref path) = cli.telemetry_out {
        if let Err(e) = export_csv(&summary.steps, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Telemetry written to {path}");
    }
}
