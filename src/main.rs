//! layerscope CLI entry point.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use layerscope::cli::{Args, OutputFormatter, OutputMode};
use layerscope_core::{
    compile, default_registry, CaptureReader, Dequeued, Pipeline, RawFrame, Registry, Session,
};

/// Frames taken from the store per dequeue.
const READ_CHUNK: usize = 256;

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Set up logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let registry = default_registry();

    // Handle info-only commands
    if args.list_dissectors {
        list_dissectors(&registry);
        return Ok(());
    }

    let file = args
        .file
        .clone()
        .context("Capture file required. Use --help for usage.")?;

    // Compile before touching the capture so a bad filter fails fast
    let predicate = args
        .filter
        .as_deref()
        .map(|expr| compile(expr, &args.alias_table()))
        .transpose()
        .context("Invalid filter expression")?;

    let reader = CaptureReader::open(&file)
        .with_context(|| format!("Failed to open capture file: {}", file.display()))?;
    debug!(format = %reader.format(), compression = %reader.compression(), "reading capture");

    let session = Arc::new(Session::new(Arc::new(registry), args.session_config()));
    let cursor = session.store().open_cursor();

    let (sender, receiver) = bounded(args.batch_size.max(1) * 2);
    let pipeline = Pipeline::spawn(Arc::clone(&session), receiver)?;
    let feeder = thread::Builder::new()
        .name("layerscope-read".into())
        .spawn(move || feed(reader, sender))?;

    let formatter = OutputFormatter::new(args.output_mode());
    let mut out = BufWriter::new(io::stdout().lock());
    let mut matched = 0u64;

    loop {
        match session.store().dequeue(cursor, READ_CHUNK)? {
            Dequeued::Frames(frames) => {
                for frame in frames {
                    if predicate.as_ref().map_or(true, |p| p.matches(&frame)) {
                        matched += 1;
                        formatter.write(&frame, &mut out)?;
                    }
                }
            }
            Dequeued::Closed => break,
            Dequeued::Empty => continue,
        }
    }

    let read = feeder
        .join()
        .map_err(|_| anyhow!("capture reader thread panicked"))?
        .with_context(|| format!("Failed to read capture file: {}", file.display()))?;
    let dissected = pipeline.join()?;

    if formatter.mode() == OutputMode::Count {
        writeln!(out, "{matched}")?;
    }
    out.flush()?;

    info!(read, dissected, matched, "done");
    Ok(())
}

/// Push every frame of the capture into the pipeline. Stops early if the
/// pipeline has gone away.
fn feed(reader: CaptureReader<File>, sender: Sender<RawFrame>) -> layerscope_core::Result<u64> {
    let mut count = 0u64;
    for raw in reader {
        if sender.send(raw?).is_err() {
            break;
        }
        count += 1;
    }
    Ok(count)
}

fn list_dissectors(registry: &Registry) {
    println!("Registered Dissectors:");
    println!("{:-<50}", "");

    for (dissector, patterns) in registry.dissectors() {
        println!("  {} ({})", dissector.description(), dissector.name());
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        println!("    -> Below: {}", patterns.join(", "));
    }

    for (dissector, patterns) in registry.stream_dissectors() {
        println!("  {} ({}, stream)", dissector.description(), dissector.name());
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        println!("    -> Streams of: {}", patterns.join(", "));
    }
}
