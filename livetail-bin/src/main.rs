use anyhow::{Result, bail};
use livetail_framework::{FilterCriteria, LogEvent, LogLevel, Pipeline};
use livetail_ws::WsTransport;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::collections::HashSet;
use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn print_usage() {
    eprintln!("Usage: livetail <URL> [OPTIONS]");
    eprintln!();
    eprintln!("Tail the live log stream of a gateway at <URL>.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --level, -l LEVEL    Only show events at LEVEL (debug|info|warn|error)");
    eprintln!("  --source, -s TAG     Only show events from source TAG");
    eprintln!("  --grep, -g TEXT      Only show events containing TEXT (case-insensitive)");
    eprintln!("  --quiet, -q          Suppress connection status lines");
    eprintln!("  --debug, -d          Verbose internal logging");
    eprintln!("  --help, -h           Print this help message");
}

struct CliArgs {
    url: String,
    criteria: FilterCriteria,
    quiet: bool,
    debug: bool,
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut url = None;
    let mut criteria = FilterCriteria::default();
    let mut quiet = false;
    let mut debug = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--level" | "-l" => {
                let value = iter.next().ok_or_else(|| anyhow::anyhow!("--level needs a value"))?;
                criteria.level = Some(
                    LogLevel::parse(value)
                        .ok_or_else(|| anyhow::anyhow!("unknown level {value:?}"))?,
                );
            }
            "--source" | "-s" => {
                let value = iter.next().ok_or_else(|| anyhow::anyhow!("--source needs a value"))?;
                criteria.source = Some(value.clone());
            }
            "--grep" | "-g" => {
                let value = iter.next().ok_or_else(|| anyhow::anyhow!("--grep needs a value"))?;
                criteria.text = value.clone();
            }
            "--quiet" | "-q" => quiet = true,
            "--debug" | "-d" => debug = true,
            other if other.starts_with('-') => bail!("unknown option {other:?}"),
            other => {
                if url.replace(other.to_string()).is_some() {
                    bail!("more than one URL given");
                }
            }
        }
    }

    let Some(url) = url else {
        bail!("missing <URL>");
    };

    Ok(CliArgs {
        url,
        criteria,
        quiet,
        debug,
    })
}

/// Picks the events not present in the previous snapshot and replaces
/// `seen` with the current snapshot's ids.
///
/// Diffing on ids rather than a tail position keeps eviction from
/// confusing the printer: entries falling off the front of the window
/// shrink the snapshot without making anything look new again.
fn select_unprinted<'a>(
    visible: &'a [LogEvent],
    seen: &mut HashSet<String>,
) -> Vec<&'a LogEvent> {
    let mut fresh = Vec::new();
    let mut current = HashSet::with_capacity(visible.len());
    for event in visible {
        if !seen.contains(&event.id) {
            fresh.push(event);
        }
        current.insert(event.id.clone());
    }
    *seen = current;
    fresh
}

/// prints events that appeared since the previous snapshot
fn print_new_events(visible: &[LogEvent], seen: &Mutex<HashSet<String>>) {
    let Ok(mut seen) = seen.lock() else {
        return;
    };

    for event in select_unprinted(visible, &mut seen) {
        match &event.source {
            Some(source) => println!(
                "{} {:5} [{}] {}",
                event.display_time, event.level, source, event.message
            ),
            None => println!("{} {:5} {}", event.display_time, event.level, event.message),
        }
    }
}

fn run(args: CliArgs) -> Result<()> {
    let transport = WsTransport::new(&args.url)?;
    log::debug!("streaming from {}", transport.endpoint());

    let mut desc = livetail_framework::PipelineDesc::default();
    desc.initial_criteria = args.criteria;
    let mut pipeline = Pipeline::start_with_desc(transport, desc);

    let seen = Arc::new(Mutex::new(HashSet::new()));
    let printer_state = seen.clone();
    pipeline.subscribe(move |visible| print_new_events(visible, &printer_state));

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::Relaxed);
    })?;

    let mut was_live = false;
    while running.load(Ordering::Relaxed) {
        let live = pipeline.is_live();
        if live != was_live && !args.quiet {
            if live {
                eprintln!("-- connected --");
            } else {
                eprintln!("-- disconnected, retrying --");
            }
            was_live = live;
        }
        thread::sleep(Duration::from_millis(200));
    }

    pipeline.shutdown();
    Ok(())
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let args = match parse_args(&args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!();
            print_usage();
            process::exit(2);
        }
    };

    let log_level = if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    if let Err(e) = TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("Error: failed to initialize logger: {e}");
    }

    if let Err(e) = run(args) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
