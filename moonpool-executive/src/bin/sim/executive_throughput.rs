//! Binary target measuring raw dispatch throughput.
//!
//! Schedules a chain of events, each requesting the next one tick later,
//! runs it to completion on the selected executive and reports the rate.

use std::{
    process,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use clap::{Parser, ValueEnum};
use moonpool_executive::{
    EventHandler, ExecEventType, Executive, ExecutiveConfiguration, ExecutiveKind,
    create_executive,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Full,
    Fast,
}

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "executive_throughput")]
#[command(about = "Dispatch a chain of events and report throughput", long_about = None)]
struct Args {
    /// Number of events in the chain
    #[arg(short, long, default_value = "1000000")]
    events: u64,

    /// Executive implementation
    #[arg(short, long, value_enum, default_value_t = Kind::Fast)]
    kind: Kind,

    /// Make every Nth event detachable and suspend it for one tick (full executive only)
    #[arg(long)]
    detachable_every: Option<u64>,
}

const TICK: Duration = Duration::from_micros(1);

fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,moonpool_executive=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match args.kind {
        Kind::Full => ExecutiveConfiguration::full(),
        Kind::Fast => ExecutiveConfiguration::fast(),
    };
    if args.detachable_every.is_some() && config.kind == ExecutiveKind::Fast {
        eprintln!("ERROR: --detachable-every requires --kind full");
        process::exit(2);
    }
    let exec = create_executive(config);

    let remaining = Arc::new(AtomicU64::new(args.events));
    let every = args.detachable_every.unwrap_or(0);
    let slot: Arc<OnceLock<EventHandler>> = Arc::new(OnceLock::new());
    let handler = {
        let remaining = Arc::clone(&remaining);
        let slot = Arc::clone(&slot);
        EventHandler::new(move |exec, _| {
            if let Some(ctrl) = exec.current_detachable() {
                ctrl.suspend_for(TICK)?;
            }
            let left = remaining.fetch_sub(1, Ordering::Relaxed);
            if left <= 1 {
                return Ok(());
            }
            let kind = if every > 0 && left % every == 0 {
                ExecEventType::Detachable
            } else {
                ExecEventType::Synchronous
            };
            if let Some(next) = slot.get() {
                exec.request_event(next.clone(), exec.now() + TICK, 0.0, None, kind)?;
            }
            Ok(())
        })
    };
    // The slot was created empty just above, so this cannot fail
    slot.set(handler.clone()).ok();

    if args.events == 0 {
        eprintln!("Nothing to do: --events is 0");
        return;
    }
    if let Err(error) =
        exec.request_event(handler, Duration::ZERO, 0.0, None, ExecEventType::Synchronous)
    {
        eprintln!("ERROR: {error}");
        process::exit(1);
    }

    let started = Instant::now();
    if let Err(error) = exec.start() {
        eprintln!("ERROR: {error}");
        process::exit(1);
    }
    let elapsed = started.elapsed();

    let served = exec.events_served();
    let rate = served as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    tracing::info!(
        "{:?} executive served {} events in {:?} ({:.0} events/s), simulated time {:?}",
        exec.kind(),
        served,
        elapsed,
        rate,
        exec.now()
    );
    eprintln!("{served} events in {elapsed:?} ({rate:.0} events/s)");
}
