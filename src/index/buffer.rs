//! Double-buffered incremental segment.
//!
//! Two memory segments, each fed by its own bounded queue. Every document
//! is enqueued to both queues. One writer thread applies the *active*
//! queue to the active segment; readers only ever see the other, stable
//! segment. When the stable side's backlog passes `swap_threshold` the
//! roles flip, so the writer catches the stale side up while readers move
//! to the side that was just written.

use crate::error::{IndexError, Result};
use crate::index::memory::MemorySegment;
use crate::index::posting::PostingList;
use crate::index::segment::Segment;
use crate::index::types::{AddReport, BufferConfig, DataRange, Document, SegmentProperty};
use crate::utils::Analyzer;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use crossbeam::select;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, trace};

/// Documents pulled from the active queue per segment write
const WRITE_BATCH: usize = 64;

enum Control {
    /// Flip to the stable side if it has a backlog
    Swap,
    /// Apply both queues completely, then acknowledge
    Flush(Sender<()>),
    Stop,
}

pub struct DoubleBuffer {
    segments: [Arc<MemorySegment>; 2],
    /// Index of the segment the writer applies to
    active: Arc<AtomicUsize>,
    queues: [Sender<Document>; 2],
    control: Sender<Control>,
    writer: Mutex<Option<JoinHandle<()>>>,
    /// `true` once closed; enqueuers hold the read side while sending
    closed: RwLock<bool>,
    data_range: DataRange,
}

impl DoubleBuffer {
    pub fn new(data_range: DataRange, config: &BufferConfig, analyzer: Arc<dyn Analyzer>) -> Result<Self> {
        let segments = [
            Arc::new(MemorySegment::with_analyzer(analyzer.clone()).with_data_range(data_range)),
            Arc::new(MemorySegment::with_analyzer(analyzer).with_data_range(data_range)),
        ];
        let (tx0, rx0) = channel::bounded(config.queue_capacity);
        let (tx1, rx1) = channel::bounded(config.queue_capacity);
        let (control_tx, control_rx) = channel::unbounded();
        let active = Arc::new(AtomicUsize::new(0));

        let writer = Writer {
            segments: segments.clone(),
            active: Arc::clone(&active),
            queues: [rx0, rx1],
            control: control_rx,
            swap_threshold: config.swap_threshold,
            poll: Duration::from_millis(config.poll_interval_ms.max(1)),
        };
        let handle = thread::Builder::new()
            .name("incremental-writer".to_string())
            .spawn(move || writer.run())?;

        Ok(Self {
            segments,
            active,
            queues: [tx0, tx1],
            control: control_tx,
            writer: Mutex::new(Some(handle)),
            closed: RwLock::new(false),
            data_range,
        })
    }

    pub fn data_range(&self) -> DataRange {
        self.data_range
    }

    /// The segment readers should use right now
    pub fn stable(&self) -> Arc<MemorySegment> {
        let active = self.active.load(Ordering::Acquire);
        Arc::clone(&self.segments[1 - active])
    }

    /// Documents queued but not yet applied, per side
    pub fn pending(&self) -> [usize; 2] {
        [self.queues[0].len(), self.queues[1].len()]
    }

    /// Queue a document for both sides. Blocks while a queue is full;
    /// fails with `BufferClosed` once the buffer has been closed.
    pub fn enqueue(&self, doc: &Document) -> Result<()> {
        let closed = self.closed.read();
        if *closed {
            return Err(IndexError::BufferClosed);
        }

        for queue in &self.queues {
            match queue.try_send(doc.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(doc)) => {
                    trace!(doc_id = doc.id, "queue full, requesting early swap");
                    let _ = self.control.send(Control::Swap);
                    queue.send(doc).map_err(|_| IndexError::BufferClosed)?;
                }
                Err(TrySendError::Disconnected(_)) => return Err(IndexError::BufferClosed),
            }
        }
        Ok(())
    }

    /// Reject further enqueues; waits for in-flight enqueues to finish
    pub fn close(&self) {
        *self.closed.write() = true;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Apply every queued document to both sides
    pub fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = channel::bounded(1);
        if self.control.send(Control::Flush(ack_tx)).is_err() {
            // writer already gone and drained everything on its way out
            return Ok(());
        }
        ack_rx
            .recv()
            .map_err(|_| IndexError::Stream("incremental writer exited during flush".to_string()))
    }

    /// Close, then stop the writer after applying what is queued. Idempotent.
    pub fn stop(&self) -> Result<()> {
        self.close();
        let Some(handle) = self.writer.lock().take() else {
            return Ok(());
        };
        let _ = self.control.send(Control::Stop);
        handle
            .join()
            .map_err(|_| IndexError::Stream("incremental writer panicked".to_string()))
    }
}

impl Segment for DoubleBuffer {
    fn add(&self, docs: &[Document]) -> Result<AddReport> {
        for doc in docs {
            self.enqueue(doc)?;
        }
        Ok(AddReport {
            indexed: docs.len(),
            skipped: 0,
        })
    }

    fn get(&self, term: &str) -> Result<Option<PostingList>> {
        self.stable().get(term)
    }

    fn property(&self) -> SegmentProperty {
        self.stable().property()
    }

    fn keys(&self) -> Vec<String> {
        self.stable().keys()
    }

    fn clear(&self) -> Result<()> {
        for segment in &self.segments {
            segment.clear()?;
        }
        Ok(())
    }
}

impl Drop for DoubleBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "failed to stop incremental writer");
        }
    }
}

struct Writer {
    segments: [Arc<MemorySegment>; 2],
    active: Arc<AtomicUsize>,
    queues: [Receiver<Document>; 2],
    control: Receiver<Control>,
    swap_threshold: usize,
    poll: Duration,
}

impl Writer {
    fn run(self) {
        loop {
            let active = self.active.load(Ordering::Acquire);
            let standby = 1 - active;
            let backlog = self.queues[standby].len();
            // strictly larger than the active queue, or two full queues would ping-pong
            if backlog > self.swap_threshold && backlog > self.queues[active].len() {
                self.swap(active);
                continue;
            }

            select! {
                recv(self.queues[active]) -> doc => {
                    let Ok(doc) = doc else { return };
                    let mut batch = vec![doc];
                    batch.extend(self.queues[active].try_iter().take(WRITE_BATCH - 1));
                    self.apply(active, &batch);
                }
                recv(self.control) -> msg => match msg {
                    Ok(Control::Swap) => {
                        if self.queues[standby].len() > self.queues[active].len() {
                            self.swap(active);
                        }
                    }
                    Ok(Control::Flush(ack)) => {
                        self.drain_all();
                        let _ = ack.send(());
                    }
                    Ok(Control::Stop) | Err(_) => {
                        self.drain_all();
                        debug!("incremental writer stopped");
                        return;
                    }
                },
                default(self.poll) => {}
            }
        }
    }

    fn swap(&self, active: usize) {
        self.active.store(1 - active, Ordering::Release);
        trace!(active = 1 - active, "swapped incremental buffers");
    }

    fn apply(&self, side: usize, docs: &[Document]) {
        if let Err(e) = self.segments[side].add(docs) {
            error!(error = %e, count = docs.len(), "failed to apply documents to incremental segment");
        }
    }

    fn drain_all(&self) {
        for side in 0..2 {
            let docs: Vec<Document> = self.queues[side].try_iter().collect();
            if !docs.is_empty() {
                self.apply(side, &docs);
            }
        }
    }
}
