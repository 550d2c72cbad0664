//! measure - frame rate meter for streamview
//!
//! Runs a viewer command, passes its output through, and counts the progress
//! characters it prints. Once per interval it logs frames/second per label
//! together with the CPU and memory use of the command's process tree; when
//! the command exits it prints min/max/mean/median of the non-zero samples.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use streamview::throughput::{rate_stats, RateStats, ThroughputMeter};
use streamview::ui::{Ui, UiMode};
use streamview::usage::ProcessTreeSampler;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Progress labels to count (printable ASCII).
    #[arg(long, default_value = ".,abcdef")]
    labels: String,
    /// Sampling interval in milliseconds.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
    /// Run the command from its own directory, so relative model paths resolve.
    #[arg(long)]
    in_exe_dir: bool,
    /// Stage output: auto, plain or pretty.
    #[arg(long, default_value = "auto")]
    ui: UiMode,
    /// Viewer command and its arguments.
    #[arg(trailing_var_arg = true, required = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.interval_ms == 0 {
        return Err(anyhow!("interval must be >= 1ms"));
    }
    let ui = Ui::detect(args.ui);
    let (program, rest) = args
        .command
        .split_first()
        .ok_or_else(|| anyhow!("missing command"))?;

    let mut child = {
        let _stage = ui.stage(&format!("starting {}", program));
        let mut command = if args.in_exe_dir {
            // Absolute, since a relative path is ambiguous once the working
            // directory changes.
            let exe = Path::new(program)
                .canonicalize()
                .with_context(|| format!("cannot resolve {}", program))?;
            let mut command = Command::new(&exe);
            if let Some(dir) = exe.parent() {
                command.current_dir(dir);
            }
            command
        } else {
            Command::new(program)
        };
        command
            .args(rest)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start {}", program))?
    };
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("child stdout was not captured"))?;

    let meter = Arc::new(Mutex::new(
        ThroughputMeter::new(args.labels.chars()).context("invalid --labels")?,
    ));
    let reader = {
        let meter = meter.clone();
        thread::Builder::new()
            .name("measure-reader".to_string())
            .spawn(move || -> std::io::Result<()> {
                let mut echo = std::io::stdout();
                let mut buf = [0u8; 256];
                loop {
                    let n = stdout.read(&mut buf)?;
                    if n == 0 {
                        return Ok(());
                    }
                    echo.write_all(&buf[..n])?;
                    echo.flush()?;
                    meter
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .record_bytes(&buf[..n]);
                }
            })?
    };

    let interval = Duration::from_millis(args.interval_ms);
    let mut sampler = ProcessTreeSampler::new(child.id());
    let mut cpu_history = Vec::new();
    let mut mem_history = Vec::new();
    let mut window_start = Instant::now();
    let status = loop {
        thread::sleep(interval);
        let elapsed = window_start.elapsed();
        window_start = Instant::now();
        let rates = meter
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sample(elapsed);
        let line = rates
            .iter()
            .map(|(label, rate)| format!("'{}' {:.1}", label, rate))
            .collect::<Vec<_>>()
            .join("  ");
        match sampler.sample() {
            Some(usage) => {
                cpu_history.push(usage.cpu_percent);
                mem_history.push(usage.memory_mb);
                log::info!(
                    "cpu {:.1}%  mem {:.1}MB  fps: {}",
                    usage.cpu_percent,
                    usage.memory_mb,
                    line
                );
            }
            None => log::info!("fps: {}", line),
        }

        if let Some(status) = child.try_wait()? {
            break status;
        }
    };

    match reader.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("reading viewer output failed: {}", e),
        Err(_) => log::warn!("output reader panicked"),
    }
    log::info!("viewer exited with {}", status);

    let meter = meter.lock().unwrap_or_else(|e| e.into_inner());
    eprintln!();
    eprintln!("metric           min     max    mean  median");
    print_stats("cpu %", rate_stats(&cpu_history));
    print_stats("mem MB", rate_stats(&mem_history));
    eprintln!();
    eprintln!("label  frames     min     max    mean  median");
    for (label, stats) in meter.summary() {
        match stats {
            Some(s) => eprintln!(
                "'{}'  {:>7} {:>7.1} {:>7.1} {:>7.1} {:>7.1}",
                label,
                meter.total(label),
                s.min,
                s.max,
                s.mean,
                s.median
            ),
            None => eprintln!("'{}'  {:>7}  no frames", label, meter.total(label)),
        }
    }
    Ok(())
}

fn print_stats(name: &str, stats: Option<RateStats>) {
    match stats {
        Some(s) => eprintln!(
            "{:<10} {:>7.1} {:>7.1} {:>7.1} {:>7.1}",
            name, s.min, s.max, s.mean, s.median
        ),
        None => eprintln!("{:<10}  no samples", name),
    }
}
