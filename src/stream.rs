//! Continuous MJPEG output.
//!
//! Each processed frame becomes one multipart part:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```
//!
//! [`MjpegStream`] pulls ticks from a single pipeline on demand. [`StreamHub`]
//! runs that stream on one producer thread and fans the chunks out to any
//! number of HTTP consumers, so the camera and the motion reference are only
//! ever driven by one tick at a time.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::frame::{Frame, DEFAULT_JPEG_QUALITY};
use crate::pipeline::{FramePipeline, TickOutcome};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(50);
const SUBSCRIBER_BUFFER: usize = 2;
const IDLE_WAIT: Duration = Duration::from_millis(200);

/// Frame-to-bytes codec used by the stream.
pub trait FrameEncoder: Send {
    fn content_type(&self) -> &'static str;

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>>;
}

#[derive(Clone, Copy, Debug)]
pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        Self { quality }
    }
}

impl Default for JpegFrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn content_type(&self) -> &'static str {
        "image/jpeg"
    }

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        frame.to_jpeg(self.quality)
    }
}

/// Wraps a payload as one multipart part using the fixed boundary.
pub fn multipart_chunk(content_type: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!("--{BOUNDARY}\r\nContent-Type: {content_type}\r\n\r\n");
    let mut chunk = Vec::with_capacity(header.len() + payload.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(payload);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

pub struct StreamEncoder {
    encoder: Box<dyn FrameEncoder>,
}

impl StreamEncoder {
    pub fn new(encoder: Box<dyn FrameEncoder>) -> Self {
        Self { encoder }
    }

    pub fn jpeg() -> Self {
        Self::new(Box::new(JpegFrameEncoder::default()))
    }

    pub fn encode_chunk(&self, frame: &Frame) -> Result<Vec<u8>> {
        let payload = self.encoder.encode(frame).context("encode stream frame")?;
        Ok(multipart_chunk(self.encoder.content_type(), &payload))
    }
}

/// Lazy, infinite sequence of encoded chunks driven by one pipeline.
///
/// Iteration never ends on its own; drop the stream to stop it.
pub struct MjpegStream {
    pipeline: FramePipeline,
    encoder: StreamEncoder,
    idle_backoff: Duration,
}

impl MjpegStream {
    pub fn new(pipeline: FramePipeline, encoder: StreamEncoder) -> Self {
        Self {
            pipeline,
            encoder,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
        }
    }

    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    pub fn pipeline(&self) -> &FramePipeline {
        &self.pipeline
    }

    pub fn reset_motion(&mut self) {
        self.pipeline.reset_motion();
    }

    /// Run exactly one tick. `Ok(None)` means the tick produced no frame
    /// (paused or camera unavailable).
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.pipeline.tick()? {
            TickOutcome::Processed(processed) => {
                Ok(Some(self.encoder.encode_chunk(&processed.frame)?))
            }
            TickOutcome::Paused | TickOutcome::SourceUnavailable => Ok(None),
        }
    }
}

impl Iterator for MjpegStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.next_chunk() {
                Ok(Some(chunk)) => return Some(chunk),
                Ok(None) => {}
                Err(err) => log::error!("stream tick failed: {:#}", err),
            }
            std::thread::sleep(self.idle_backoff);
        }
    }
}

// ----------------------------------------------------------------------------
// Fan-out
// ----------------------------------------------------------------------------

type Chunk = Arc<Vec<u8>>;

struct HubShared {
    subscribers: Mutex<Vec<(u64, SyncSender<Chunk>)>>,
    next_id: AtomicU64,
    wake: Condvar,
    shutdown: AtomicBool,
    chunks: AtomicU64,
    source_healthy: AtomicBool,
}

impl HubShared {
    fn subscribers(&self) -> MutexGuard<'_, Vec<(u64, SyncSender<Chunk>)>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single producer, many consumers.
///
/// The producer thread ticks the pipeline only while at least one subscriber
/// is attached. A subscriber that falls behind skips chunks rather than
/// stalling the others; a dropped subscription detaches itself.
///
/// When the first viewer arrives after an idle gap the motion reference is
/// discarded, so a scene change nobody saw is never reported as motion.
pub struct StreamHub {
    shared: Arc<HubShared>,
    worker: Option<JoinHandle<()>>,
}

impl StreamHub {
    pub fn spawn(mut stream: MjpegStream, frame_interval: Duration) -> Result<Self> {
        let shared = Arc::new(HubShared {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            chunks: AtomicU64::new(0),
            source_healthy: AtomicBool::new(true),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("stream-hub".to_string())
            .spawn(move || run_producer(&worker_shared, &mut stream, frame_interval))
            .context("spawn stream producer thread")?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::sync_channel(SUBSCRIBER_BUFFER);
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let mut subscribers = self.shared.subscribers();
        subscribers.push((id, tx));
        self.shared.wake.notify_all();
        log::info!("stream subscriber attached ({} total)", subscribers.len());
        Subscription {
            id,
            rx,
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers().len()
    }

    /// Camera health as of the producer's last tick.
    pub fn source_healthy(&self) -> bool {
        self.shared.source_healthy.load(Ordering::SeqCst)
    }

    /// Total chunks broadcast since the hub started.
    pub fn chunks_emitted(&self) -> u64 {
        self.shared.chunks.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("stream producer thread panicked");
            }
        }
    }
}

impl Drop for StreamHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_producer(shared: &HubShared, stream: &mut MjpegStream, frame_interval: Duration) {
    loop {
        let was_idle = {
            let mut subscribers = shared.subscribers();
            let was_idle = subscribers.is_empty();
            while subscribers.is_empty() && !shared.shutdown.load(Ordering::SeqCst) {
                subscribers = shared
                    .wake
                    .wait_timeout(subscribers, IDLE_WAIT)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            was_idle
        };
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        if was_idle {
            // Nothing was ticked during the gap; the old reference is stale.
            stream.reset_motion();
        }

        let started = Instant::now();
        match stream.next_chunk() {
            Ok(Some(chunk)) => broadcast(shared, Arc::new(chunk)),
            Ok(None) => std::thread::sleep(stream.idle_backoff),
            Err(err) => {
                log::error!("stream tick failed: {:#}", err);
                std::thread::sleep(stream.idle_backoff);
            }
        }
        shared
            .source_healthy
            .store(stream.pipeline().source_healthy(), Ordering::SeqCst);
        if let Some(rest) = frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    log::info!("stream producer stopped");
}

fn broadcast(shared: &HubShared, chunk: Chunk) {
    let mut subscribers = shared.subscribers();
    let before = subscribers.len();
    subscribers.retain(|(_, tx)| match tx.try_send(Arc::clone(&chunk)) {
        Ok(()) | Err(TrySendError::Full(_)) => true,
        Err(TrySendError::Disconnected(_)) => false,
    });
    if subscribers.len() < before {
        log::info!(
            "stream subscriber detached ({} remaining)",
            subscribers.len()
        );
    }
    shared.chunks.fetch_add(1, Ordering::SeqCst);
}

/// Receiving end of a hub subscription. Iteration ends when the hub stops.
pub struct Subscription {
    id: u64,
    rx: Receiver<Chunk>,
    shared: Arc<HubShared>,
}

impl Subscription {
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Chunk> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl Iterator for Subscription {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        self.rx.recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut subscribers = self.shared.subscribers();
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != self.id);
        if subscribers.len() < before {
            log::info!(
                "stream subscriber detached ({} remaining)",
                subscribers.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_layout() {
        let chunk = multipart_chunk("image/jpeg", b"abc");
        assert_eq!(
            chunk,
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nabc\r\n".to_vec()
        );
    }

    #[test]
    fn jpeg_chunk_wraps_encoded_frame() -> Result<()> {
        let chunk = StreamEncoder::jpeg().encode_chunk(&Frame::filled(16, 16, [1, 2, 3]))?;
        let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(chunk.starts_with(header));
        assert_eq!(&chunk[header.len()..header.len() + 2], &[0xFF, 0xD8]);
        assert!(chunk.ends_with(&[0xFF, 0xD9, b'\r', b'\n']));
        Ok(())
    }
}
