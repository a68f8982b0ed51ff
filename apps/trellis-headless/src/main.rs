//! Drives a page over HTTP without a screen: loads a start URL, clicks the
//! links matched by each selector argument, and prints where it ended up.
//!
//! Usage: `trellis-headless <url> [selector...]`. Engine settings come from
//! `TRELLIS_*` variables and logging from `RUST_LOG`.

use std::process::ExitCode;
use tr_core::DriveError;
use tr_core::DriveResult;
use tr_drive::DriveConfig;
use tr_drive::DriveDelegate;
use tr_drive::HistoryMethod;
use tr_drive::Session;
use tr_drive::Visit;
use tr_net::FetchPurpose;
use tr_net::FetchRequest;
use tr_net::HttpBackend;
use tr_net::HttpClient;
use tr_net::Location;

/// Mirrors navigation events into the log.
struct LogDelegate;

impl DriveDelegate for LogDelegate {
    fn visit_started(&mut self, visit: &Visit) {
        log::info!("{} visit to {}", visit.action().as_str(), visit.location());
    }

    fn visit_failed(&mut self, visit: &Visit) {
        match visit.error() {
            Some(error) => log::warn!("visit to {} failed: {error}", visit.location()),
            None => log::warn!("visit to {} failed", visit.location()),
        }
    }

    fn history_changed(&mut self, location: &Location, method: HistoryMethod) {
        log::debug!("history {method:?} {location}");
    }

    fn hard_reload(&mut self, location: &Location, reason: &str) {
        log::warn!("{location} needs a full load ({reason})");
    }
}

struct Args {
    start: String,
    selectors: Vec<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = std::env::args().skip(1);
    let start = args
        .next()
        .ok_or_else(|| "usage: trellis-headless <url> [selector...]".to_owned())?;
    Ok(Args {
        start,
        selectors: args.collect(),
    })
}

fn run(args: Args) -> DriveResult<()> {
    let config = DriveConfig::from_env()?;
    let client = HttpClient::new(config.client_config())?;
    let start = Location::parse(&args.start)?;

    let response = client.execute(&FetchRequest::get(start, FetchPurpose::Visit))?;
    if response.failed() {
        return Err(DriveError::new(
            "headless.start_failed",
            format!("{} answered {}", response.location, response.status.as_u16()),
        ));
    }

    let backend = HttpBackend::new(config.client_config())?;
    let mut session = Session::builder()
        .config(config)
        .backend(backend)
        .delegate(LogDelegate)
        .build(response.location.clone(), &response.text())?;
    session.run_until_idle()?;

    for selector in &args.selectors {
        if !session.click_selector(selector)? {
            log::warn!("`{selector}` is not a link the engine follows");
            continue;
        }
        session.run_until_idle()?;
        if let Some(reload) = session.take_hard_reload() {
            println!("hard reload: {} ({})", reload.location, reload.reason);
            break;
        }
    }

    println!("location: {}", session.location());
    println!("title: {}", session.title());
    let current = session.history().current_index();
    for (index, entry) in session.history().entries().iter().enumerate() {
        let marker = if index == current { '*' } else { ' ' };
        println!("{marker} {index}: {}", entry.location);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(2);
        }
    };
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("trellis-headless: {error}");
            ExitCode::FAILURE
        }
    }
}
