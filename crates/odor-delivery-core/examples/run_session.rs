//! Odor Delivery Session Runner
//!
//! Runs one odor-delivery experiment from the command line, against the
//! panel board or the built-in simulator.
//!
//! Usage:
//!   cargo run --example run_session -- --settings session.json --odors 1,2,1
//!
//! Options:
//!   --settings FILE     Session settings JSON (panel, durations, output dir, metadata)
//!   --odors LIST        Odor order, comma or space separated (e.g. "1,2,1")
//!   --port PORT         Override the panel's default serial port
//!   --simulate          Use the simulated board instead of a serial port
//!   --time-scale X      Simulator time multiplier (default: 1.0, 0 = instant)
//!   --chatter P         Simulator stray-line probability (default: 0.0)
//!   --cancel-after N    Cancel once N trials are recorded (dry runs)
//!   --list-ports        List serial ports and exit
//!
//! Settings file example:
//!
//! ```json
//! {
//!   "panel": "1%",
//!   "odor_duration_s": 2,
//!   "delay_s": 10,
//!   "output_dir": "/data/odor",
//!   "metadata": { "date": "2023-11-16", "subject_id": "mouse7", "roi": "roi2" }
//! }
//! ```
//!
//! Set `RUST_LOG=odor_delivery_core=debug` for link-level logs.

use anyhow::{bail, Context, Result};
use odor_delivery_core::link::{list_ports, Link, LinkConfig, SimulatedDevice, SimulatorConfig};
use odor_delivery_core::prelude::*;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct Options {
    settings: Option<String>,
    odors: Option<String>,
    port: Option<String>,
    simulate: bool,
    time_scale: f64,
    chatter: f64,
    cancel_after: Option<usize>,
    list_ports: bool,
}

fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = std::env::args().collect();
    let mut opts = Options {
        settings: None,
        odors: None,
        port: None,
        simulate: false,
        time_scale: 1.0,
        chatter: 0.0,
        cancel_after: None,
        list_ports: false,
    };

    let mut i = 1;
    while i < args.len() {
        let value = |i: usize| {
            args.get(i + 1)
                .cloned()
                .with_context(|| format!("{} needs a value", args[i]))
        };
        match args[i].as_str() {
            "--settings" | "-s" => {
                opts.settings = Some(value(i)?);
                i += 1;
            }
            "--odors" | "-o" => {
                opts.odors = Some(value(i)?);
                i += 1;
            }
            "--port" | "-p" => {
                opts.port = Some(value(i)?);
                i += 1;
            }
            "--simulate" => opts.simulate = true,
            "--time-scale" => {
                opts.time_scale = value(i)?.parse().context("--time-scale must be a number")?;
                i += 1;
            }
            "--chatter" => {
                opts.chatter = value(i)?.parse().context("--chatter must be a number")?;
                i += 1;
            }
            "--cancel-after" => {
                opts.cancel_after =
                    Some(value(i)?.parse().context("--cancel-after must be a count")?);
                i += 1;
            }
            "--list-ports" => opts.list_ports = true,
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other => bail!("Unknown option: {}", other),
        }
        i += 1;
    }
    Ok(Some(opts))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let Some(opts) = parse_args()? else {
        return Ok(());
    };

    if opts.list_ports {
        for port in list_ports() {
            match (&port.product, port.vid, port.pid) {
                (Some(product), Some(vid), Some(pid)) => {
                    println!("{}  {} [{:04x}:{:04x}]", port.name, product, vid, pid)
                }
                _ => println!("{}", port.name),
            }
        }
        return Ok(());
    }

    let settings = opts.settings.context("--settings is required")?;
    let params = SessionParams::from_json_file(&settings)
        .with_context(|| format!("loading {}", settings))?;
    let trials: TrialSpec = opts
        .odors
        .context("--odors is required")?
        .parse()
        .context("parsing the odor order")?;

    println!("Panel:       {}", params.panel());
    println!("Trials:      {}", trials.len());
    println!("Odor on:     {}s", params.odor_duration_s());
    println!("Delay:       {}s", params.delay_s());
    println!("Output dir:  {}", params.output_dir().display());
    println!();

    let handle = if opts.simulate {
        let device = SimulatedDevice::new(SimulatorConfig {
            time_scale: opts.time_scale,
            chatter_probability: opts.chatter,
            ..SimulatorConfig::default()
        });
        session::start_with_link(params, trials, move || {
            Ok(Link::from_channel("simulator", Box::new(device)))
        })
    } else if let Some(port) = opts.port {
        let config = LinkConfig {
            port_name: port,
            ..LinkConfig::for_panel(params.panel())
        };
        session::start_with_link(params, trials, move || Link::open(&config))
    } else {
        session::start(params, trials)
    };

    let mut last_status = String::new();
    let mut printed_lines = 0;
    while !handle.is_finished() {
        let progress = handle.progress();
        if progress.status != last_status {
            println!("[{:>3.0}%] {}", progress.fraction * 100.0, progress.status);
            last_status = progress.status;
        }

        let lines = handle.log_lines();
        for line in &lines[printed_lines..] {
            println!("        {}", line);
        }
        printed_lines = lines.len();

        if let Some(limit) = opts.cancel_after {
            if handle.records().len() >= limit {
                handle.request_cancel();
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let files = handle.output_files().clone();
    let warnings = handle.warnings();
    let records = handle.records();
    let outcome = handle.wait();

    println!();
    println!("Outcome:     {:?}", outcome);
    println!("Recorded:    {} trials", records.len());
    println!("Order file:  {}", files.order_path().display());
    println!("Timings:     {}", files.timings_path().display());
    for warning in &warnings {
        eprintln!("warning: {}", warning);
    }

    match outcome {
        SessionOutcome::LinkLost(reason) => bail!("session ended early: {}", reason),
        SessionOutcome::Completed | SessionOutcome::Aborted => Ok(()),
    }
}

fn print_help() {
    println!("Odor Delivery Session Runner");
    println!();
    println!("Usage: run_session --settings FILE --odors LIST [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --settings FILE     Session settings JSON");
    println!("  --odors LIST        Odor order, e.g. \"1,2,1\"");
    println!("  --port PORT         Override the panel's default serial port");
    println!("  --simulate          Use the simulated board");
    println!("  --time-scale X      Simulator time multiplier (default: 1.0)");
    println!("  --chatter P         Simulator stray-line probability (default: 0.0)");
    println!("  --cancel-after N    Cancel once N trials are recorded");
    println!("  --list-ports        List serial ports and exit");
    println!("  --help, -h          Show this help");
}
