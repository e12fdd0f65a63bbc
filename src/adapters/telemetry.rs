//! JSON-lines telemetry sink.
//!
//! Every [`AppEvent`] becomes one JSON object on its own line, appended to a
//! file by a dedicated writer thread.  The control loop only ever does a
//! `try_send` into a bounded queue: when the writer falls behind, records
//! are dropped and counted instead of stalling the loop.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use futures_lite::future::block_on;
use log::{debug, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Records buffered between the loop and the writer.
pub const QUEUE_DEPTH: usize = 64;

/// How long closing waits for the writer to drain.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

enum Record {
    Line(String),
    Close,
}

type RecordQueue = Channel<CriticalSectionRawMutex, Record, QUEUE_DEPTH>;

pub struct JsonLinesSink {
    queue: Arc<RecordQueue>,
    writer: Option<JoinHandle<()>>,
    dropped: u64,
}

impl JsonLinesSink {
    /// Append to `path`, creating it if needed.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!("Telemetry: appending to {}", path.display());
        Self::to_writer(BufWriter::new(file))
    }

    /// Stream records into any writer.
    pub fn to_writer<W: Write + Send + 'static>(out: W) -> io::Result<Self> {
        let queue: Arc<RecordQueue> = Arc::new(Channel::new());
        let writer = {
            let queue = queue.clone();
            std::thread::Builder::new()
                .name("telemetry".into())
                .spawn(move || write_records(out, &queue))?
        };
        Ok(Self {
            queue,
            writer: Some(writer),
            dropped: 0,
        })
    }

    /// Records lost because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Flush everything queued and stop the writer.
    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        let deadline = Instant::now() + CLOSE_TIMEOUT;
        while self.queue.try_send(Record::Close).is_err() {
            if Instant::now() >= deadline {
                warn!("Telemetry: writer not draining, abandoning it");
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        while !writer.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        if !writer.is_finished() {
            warn!("Telemetry: writer still busy after close, abandoning it");
        } else if writer.join().is_err() {
            warn!("Telemetry: writer thread panicked");
        }
        if self.dropped > 0 {
            warn!("Telemetry: {} records dropped in total", self.dropped);
        }
    }
}

impl EventSink for JsonLinesSink {
    fn emit(&mut self, event: &AppEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Telemetry: cannot serialise event: {e}");
                return;
            }
        };
        if self.queue.try_send(Record::Line(line)).is_err() {
            self.dropped += 1;
            if self.dropped.is_power_of_two() {
                warn!("Telemetry: queue full, {} records dropped", self.dropped);
            }
        }
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_records<W: Write>(mut out: W, queue: &RecordQueue) {
    let mut failing = false;
    loop {
        let line = match block_on(queue.receive()) {
            Record::Line(line) => line,
            Record::Close => break,
        };
        let written = writeln!(out, "{line}").and_then(|()| {
            if queue.is_empty() {
                out.flush()
            } else {
                Ok(())
            }
        });
        match written {
            Ok(()) if failing => {
                info!("Telemetry: writes recovered");
                failing = false;
            }
            Ok(()) => {}
            Err(e) if !failing => {
                warn!("Telemetry: write failed: {e}");
                failing = true;
            }
            Err(_) => {}
        }
    }
    if let Err(e) = out.flush() {
        warn!("Telemetry: final flush failed: {e}");
    }
    debug!("Telemetry writer stopped");
}
