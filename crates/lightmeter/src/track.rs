// SPDX-FileCopyrightText: 2026 Lightmeter Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `lightmeter track` command implementation.
//!
//! A blocking reader thread feeds JSON-lines records into the tracker,
//! a printer task writes every published result to stdout, and the tracker
//! itself runs until the input ends or a shutdown signal arrives.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lightmeter_config::LightmeterConfig;
use lightmeter_core::{DeliveryResult, Record, TrackerError};
use lightmeter_tracking::{ChannelPublisher, Publisher, Tracker, install_signal_handler};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Run the `lightmeter track` command.
pub async fn run_track(
    config: LightmeterConfig,
    input: Option<PathBuf>,
) -> Result<(), TrackerError> {
    let (consumer, results) = ChannelPublisher::new(config.tracker.notifier_capacity);
    let tracker = Tracker::open(&config, Arc::new(consumer)).await?;

    if let Some(resume) = tracker.most_recent_log_time().await? {
        info!(%resume, "store holds state up to this log time");
    }

    let cancel = install_signal_handler();
    let publisher = tracker.publisher();
    // The blocking reader cannot be interrupted while it waits on stdin;
    // it stops at its next record once the intake closes.
    std::thread::Builder::new()
        .name("lightmeter-reader".into())
        .spawn(move || match read_records(input.as_deref(), &publisher) {
            Ok(count) => info!(records = count, "input finished"),
            Err(TrackerError::IntakeClosed) => info!("tracker stopped before the input ended"),
            Err(err) => warn!(error = %err, "reading input failed"),
        })
        .map_err(|e| TrackerError::Internal(format!("failed to spawn reader: {e}")))?;

    let printer = tokio::spawn(print_results(results));

    let outcome = tracker.run(cancel).await;
    let printed = printer
        .await
        .map_err(|e| TrackerError::Internal(format!("printer task failed: {e}")))?;

    outcome?;
    let printed = printed?;
    info!(results = printed, "tracking finished");
    Ok(())
}

/// Publish every record of `input` (stdin for `None` or `-`). Lines that do
/// not decode are logged and skipped.
fn read_records(input: Option<&Path>, publisher: &Publisher) -> Result<u64, TrackerError> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) if path != Path::new("-") => {
            let file = File::open(path).map_err(|e| {
                TrackerError::Config(format!("cannot open {}: {e}", path.display()))
            })?;
            Box::new(BufReader::new(file))
        }
        _ => Box::new(BufReader::new(std::io::stdin())),
    };

    let mut count = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| TrackerError::Internal(format!("read error: {e}")))?;
        match parse_record(&line) {
            Ok(Some(record)) => {
                publisher.blocking_publish(record)?;
                count += 1;
            }
            Ok(None) => {}
            Err(err) => warn!(line = index + 1, error = %err, "skipping undecodable record"),
        }
    }
    Ok(count)
}

/// Decode one input line. Blank lines carry no record.
pub fn parse_record(line: &str) -> Result<Option<Record>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

async fn print_results(mut results: mpsc::Receiver<DeliveryResult>) -> Result<u64, TrackerError> {
    let mut stdout = tokio::io::stdout();
    let mut printed = 0;
    while let Some(result) = results.recv().await {
        let mut line = serde_json::to_vec(&result)?;
        line.push(b'\n');
        stdout
            .write_all(&line)
            .await
            .map_err(|e| TrackerError::Internal(format!("stdout: {e}")))?;
        printed += 1;
    }
    stdout
        .flush()
        .await
        .map_err(|e| TrackerError::Internal(format!("stdout: {e}")))?;
    Ok(printed)
}
