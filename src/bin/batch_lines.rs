use anyhow::Context;
use clap::Parser;
use round_batch::channel::batcher::{Batcher, Options, DEFAULT_QUEUE_CAPACITY};
use std::io::{BufRead, Write};
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Group lines read from STDIN into rounds and print each round as a single line
#[derive(Debug, Parser)]
#[command(name = "batch-lines")]
struct Cli {
    /// Maximum duration single round will be collecting lines for in milliseconds
    #[arg(long = "timeout-ms", default_value_t = 200)]
    timeout_ms: u64,

    /// Maximum number of lines in single round; 0 for no limit
    #[arg(long = "max-size", default_value_t = 0)]
    max_size: usize,

    /// Number of lines read ahead before reading from STDIN blocks
    #[arg(long = "queue-capacity", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// String to join lines of single round together
    #[arg(long = "join", default_value = " ")]
    join: String,

    /// Print an empty line for rounds that collected no lines
    #[arg(long = "print-empty")]
    print_empty: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    anyhow::ensure!(args.timeout_ms > 0, "--timeout-ms must be greater than 0");

    // Dropped together with the action once the collection loop exits
    let (done, finished) = crossbeam_channel::bounded::<()>(0);
    let join = args.join;

    let batcher = Batcher::with_options(
        move |lines: Vec<String>| {
            let _done = &done;
            let stdout = std::io::stdout();
            let mut stdout = stdout.lock();
            if let Err(err) = writeln!(stdout, "{}", lines.join(&join)).and_then(|()| stdout.flush()) {
                error!("failed to write to STDOUT: {}", err);
                std::process::exit(1);
            }
        },
        Duration::from_millis(args.timeout_ms),
        Options::default()
            .max_batch_size(args.max_size)
            .queue_capacity(args.queue_capacity)
            .deliver_empty_rounds(args.print_empty),
    );
    batcher.start().context("failed to start batcher")?;

    for line in std::io::stdin().lock().lines() {
        let line = line.context("failed to read lines from STDIN")?;
        debug!(%line, "submitting");
        batcher.submit(line).map_err(|_| anyhow::anyhow!("batcher has stopped"))?;
    }

    // Disconnect the queue so that the last round is delivered
    drop(batcher);
    let _ = finished.recv();

    Ok(())
}
