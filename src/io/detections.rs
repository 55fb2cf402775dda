//! JSONL detection source
//!
//! Reads detector output one frame per line from a file or stdin ("-"):
//! `{"t": 0.04, "detections": [{"bbox": [x1,y1,x2,y2], "cls": "car", "id": 17}]}`
//!
//! Lines that are not valid frames are logged and skipped. Frames are sent
//! with backpressure so a slow session throttles the reader instead of
//! losing frames. End of input closes the channel.

use crate::domain::types::{parse_frame, Frame, LabelTable};
use crate::infra::metrics::Metrics;
use anyhow::Context;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Boxed line source so file and stdin share one reader type
pub type DetectionInput = Box<dyn AsyncBufRead + Send + Unpin>;

/// Open `path` for reading, or stdin when `path` is "-"
pub async fn open_detection_input(path: &str) -> anyhow::Result<DetectionInput> {
    if path == "-" {
        info!("detection_input_stdin");
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open detection input: {}", path))?;
    info!(path = %path, "detection_input_opened");
    Ok(Box::new(BufReader::new(file)))
}

/// Forward frames from `reader` until end of input, shutdown, or the
/// receiver going away. Returns the number of frames forwarded.
pub async fn read_detections<R>(
    reader: R,
    labels: LabelTable,
    frame_tx: mpsc::Sender<Frame>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> u64
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no: u64 = 0;
    let mut forwarded: u64 = 0;

    loop {
        if *shutdown.borrow() {
            info!(forwarded = %forwarded, "detection_reader_shutdown");
            break;
        }

        let next = tokio::select! {
            biased;

            Ok(()) = shutdown.changed() => continue,
            next = lines.next_line() => next,
        };

        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!(lines = %line_no, forwarded = %forwarded, "detection_input_exhausted");
                break;
            }
            Err(e) => {
                error!(line = %line_no, error = %e, "detection_input_read_failed");
                break;
            }
        };
        line_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let frame = match parse_frame(trimmed, &labels) {
            Ok(frame) => frame,
            Err(e) => {
                metrics.record_frame_rejected();
                warn!(line = %line_no, error = %e, "frame_rejected");
                continue;
            }
        };

        if frame.skipped > 0 {
            debug!(line = %line_no, skipped = %frame.skipped, "malformed_detections_skipped");
        }

        if frame_tx.send(frame).await.is_err() {
            debug!("frame_receiver_closed");
            break;
        }
        forwarded += 1;
    }

    forwarded
}

/// Spawn the reader as a background task
pub fn spawn_detection_reader<R>(
    reader: R,
    labels: LabelTable,
    frame_tx: mpsc::Sender<Frame>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<u64>
where
    R: AsyncBufRead + Send + Unpin + 'static,
{
    tokio::spawn(read_detections(reader, labels, frame_tx, metrics, shutdown))
}
