//! NetMet process entry point (spec §6), ported from `netmet/run.py::load`:
//! picks a role from `APP`, wires up logging and the Ctrl-C/SIGTERM
//! shutdown handshake, then bootstraps either the client or the server.

mod args;

use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{filter, Layer};

use args::{Args, Role};
use netmet_common::clock::ClockSource;

/// Flips to `false` on SIGINT/SIGTERM; every accept loop and background
/// worker polls it (or is force-woken) to drain and exit.
static KEEP_RUNNING: AtomicBool = AtomicBool::new(true);

fn main() {
    let args = Args::parse();
    enable_logging(&args);
    debug!(?args);
    set_ctrlc_handler();

    if args.netmet_hmacs.is_empty() && !args.netmet_hmac_skip {
        eprintln!("Set NETMET_HMAC_SKIP=true or provide --netmet-hmacs");
        std::process::exit(1);
    }

    match args.app {
        Role::Server => run_server(&args),
        Role::Client => run_client(&args),
    }

    info!("Bye Bye!");
}

fn set_ctrlc_handler() {
    ctrlc::set_handler(|| {
        info!("received shutdown signal, stopping netmet");
        KEEP_RUNNING.store(false, SeqCst);
    })
    .expect("error setting Ctrl-C handler");
}

fn enable_logging(args: &Args) {
    let verbosity = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        2.. => tracing::Level::TRACE,
    };

    let filters = filter::Targets::new()
        .with_target("ureq", tracing::Level::WARN)
        .with_default(verbosity);

    let fmt_layer = tracing_subscriber::fmt::layer().compact().with_filter(filters);
    tracing_subscriber::registry().with(fmt_layer).init();
}

/// Bridges the process-wide `KEEP_RUNNING` flag `ctrlc` writes to into the
/// per-thread `Arc<AtomicBool>` death signal the HTTP accept loops and
/// background workers actually watch.
fn death_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let watched = flag.clone();
    std::thread::spawn(move || {
        while KEEP_RUNNING.load(SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(200));
        }
        watched.store(true, SeqCst);
    });
    flag
}

fn bind_http(host: &str, port: u16) -> tiny_http::Server {
    tiny_http::Server::http((host, port)).unwrap_or_else(|e| {
        eprintln!("failed to bind http server on {host}:{port}: {e}");
        std::process::exit(1);
    })
}

fn run_server(args: &Args) {
    info!("starting netmet server");

    let Some(elastic) = args.elastic.first() else {
        eprintln!("Set ELASTIC to a comma list of Elasticsearch URLs");
        std::process::exit(1);
    };

    let store = Arc::new(netmet_store::Store::connect(elastic));
    let clock = ClockSource::System;

    let today = clock.now_iso8601();
    let date = today.split('T').next().unwrap_or(&today).to_string();
    if let Err(e) = netmet_store::ensure_schema(&store, &date) {
        warn!(error = %e, "failed to ensure store schema");
    }

    let own_url = args.own_url();
    let http_server = bind_http(&args.host, args.port);
    let death = death_flag();

    let deployer = Arc::new(netmet_server::deployer::start(
        store.clone(),
        own_url.clone(),
        clock.clone(),
    ));
    let mesher = Arc::new(netmet_server::mesher::start(store.clone(), own_url.clone(), clock.clone()));
    let rollover = Arc::new(netmet_store::rollover::start(store.clone(), clock.clone()));

    let runtime = Arc::new(netmet_server::ServerRuntime::new(
        store,
        own_url,
        args.netmet_hmacs.clone(),
        args.netmet_hmac_skip,
        args.users(),
        clock,
        deployer.clone(),
        mesher.clone(),
    ));

    let http_thread = netmet_server::spawn(runtime, http_server, death);

    let _ = http_thread.join();
    info!("Stopping netmet server: joining internal threads");
    drop(deployer);
    drop(mesher);
    drop(rollover);
}

fn run_client(args: &Args) {
    info!("Starting netmet client");

    let clock = ClockSource::System;
    let base_dir = args.base_dir_path();
    let death = death_flag();

    let rejoin_thread = netmet_client::restore::spawn_self_rejoin(
        base_dir.clone(),
        args.port,
        args.netmet_hmacs.clone(),
        clock.clone(),
        death.clone(),
    );

    let runtime = Arc::new(netmet_client::ClientRuntime::new(
        args.port,
        base_dir,
        args.netmet_hmacs.clone(),
        args.netmet_hmac_skip,
        args.users(),
        clock,
    ));

    let http_server = bind_http(&args.host, args.port);
    let http_thread = netmet_client::http::spawn(runtime, http_server, death);

    let _ = http_thread.join();
    info!("Stopping netmet client: joining internal threads");
    if let Some(rejoin_thread) = rejoin_thread {
        let _ = rejoin_thread.join();
    }
}
