//! Video source
//!
//! Owns the frame pool, the capture synchronizer and the conversion
//! adapter, and exposes the callback surface the pipeline drives plus the
//! pull API the consumer uses.

use crate::capture::{
    fill_slot, CaptureSync, CapturedFrame, Fault, FramePool, FrameSource, MappableSample,
    MappedFrame, PipelineEvent,
};
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::gpu::GpuBackend;
use crate::processing::{ConversionAdapter, StagedFrame};
use crate::ring::RingIndex;
use crate::types::{Geometry, Stats};

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    produced: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    superseded: AtomicU64,
    conversions: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Stats {
        Stats {
            frames_received: self.received.load(Ordering::Relaxed),
            frames_produced: self.produced.load(Ordering::Relaxed),
            frames_dropped: self.dropped.load(Ordering::Relaxed),
            frames_delivered: self.delivered.load(Ordering::Relaxed),
            frames_superseded: self.superseded.load(Ordering::Relaxed),
            conversions: self.conversions.load(Ordering::Relaxed),
        }
    }
}

/// Latest-frame video source over a [`GpuBackend`]
pub struct VideoSource<B: GpuBackend> {
    config: SourceConfig,
    backend: B,
    pool: Mutex<FramePool<B::Mapped>>,
    geometry: RwLock<Option<Geometry>>,
    sync: CaptureSync,
    converter: ConversionAdapter<B>,
    counters: Counters,
    open: AtomicBool,
}

impl<B: GpuBackend> VideoSource<B> {
    /// Create a source; nothing is allocated until the first frame arrives
    pub fn new(config: SourceConfig, backend: B) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool: Mutex::new(FramePool::new(config.ring_capacity)),
            converter: ConversionAdapter::new(config.staging_capacity),
            geometry: RwLock::new(None),
            sync: CaptureSync::new(),
            counters: Counters::default(),
            open: AtomicBool::new(false),
            config,
            backend,
        })
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Ingest a completed buffer.
    ///
    /// Never waits on the consumer. Per-frame failures are logged and the
    /// frame is dropped; the stream keeps running. That includes a wrap onto
    /// a slot whose host view the consumer still holds. A pool allocation
    /// failure additionally faults the stream so the consumer sees it.
    pub fn on_buffer<S: MappableSample>(&self, sample: &S) -> Result<RingIndex> {
        Counters::bump(&self.counters.received);

        match self.ingest(sample) {
            Ok(index) => Ok(index),
            Err(e) => {
                Counters::bump(&self.counters.dropped);
                match &e {
                    Error::Allocation(reason) => {
                        tracing::error!("Dropping frame, frame pool unavailable: {}", reason);
                        self.sync.fault(Fault::Allocation(reason.clone()));
                    }
                    _ => tracing::warn!("Dropping frame: {}", e),
                }
                Err(e)
            }
        }
    }

    fn ingest<S: MappableSample>(&self, sample: &S) -> Result<RingIndex> {
        let frame = MappedFrame::read(sample)?;
        let geometry = frame.geometry;

        let (index, slot) = {
            let mut pool = self.pool.lock();
            if !pool.is_allocated() {
                self.check_expected(&geometry);
            }
            pool.reserve_next(&geometry, frame.data().len(), &self.backend)?
        };
        // the pool stays unlocked while copying so captures are never held up
        fill_slot(&slot, index, frame.data())?;
        self.pool.lock().commit(index);
        // mapping released here, before the consumer is woken
        drop(frame);

        *self.geometry.write() = Some(geometry);
        Counters::bump(&self.counters.produced);
        if self.sync.produce(index) {
            Counters::bump(&self.counters.superseded);
        }
        tracing::trace!("Produced frame into slot {} ({})", index, geometry);
        Ok(index)
    }

    fn check_expected(&self, geometry: &Geometry) {
        if let Some(expected) = self.config.expected_resolution {
            if expected != geometry.resolution() {
                tracing::warn!(
                    "Pipeline negotiated {} but {} was expected",
                    geometry.resolution(),
                    expected
                );
            }
        }
    }

    /// Preroll notification; nothing to capture yet
    pub fn on_preroll(&self) {
        tracing::debug!("Pipeline prerolled");
    }

    /// End-of-stream notification
    pub fn on_end_of_stream(&self) {
        tracing::info!("End of stream");
        self.sync.end_of_stream();
    }

    /// Handle a message from the pipeline bus
    pub fn handle_event(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::EndOfStream => self.on_end_of_stream(),
            PipelineEvent::Error(message) => {
                tracing::error!("Pipeline error: {}", message);
                self.sync.fault(Fault::Pipeline(message));
            }
            PipelineEvent::Warning(message) => tracing::warn!("Pipeline warning: {}", message),
            PipelineEvent::StateChanged { from, to } => {
                tracing::debug!("Pipeline state changed: {} -> {}", from, to)
            }
        }
    }

    /// Mark the stream running and clear a previous end-of-stream or fault
    pub fn open(&self) {
        self.sync.reopen();
        self.open.store(true, Ordering::SeqCst);
        tracing::info!("Video source opened");
    }

    /// Mark the stream stopped and release waiting consumers
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.sync.end_of_stream();
            tracing::info!("Video source closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Claim the newest frame not yet captured, waiting up to `timeout`
    pub fn capture(&self, timeout: Option<Duration>) -> Result<CapturedFrame<B::Mapped>> {
        let delivery = self.sync.capture(timeout)?;

        let pool = self.pool.lock();
        let slot = pool
            .slot(delivery.index)
            .ok_or_else(|| Error::Allocation("frame pool not allocated".into()))?;
        let geometry = pool
            .geometry()
            .ok_or_else(|| Error::Allocation("frame pool not allocated".into()))?;
        drop(pool);

        Counters::bump(&self.counters.delivered);
        Ok(CapturedFrame::new(slot, delivery, geometry))
    }

    /// Capture with the configured default timeout
    pub fn capture_default(&self) -> Result<CapturedFrame<B::Mapped>> {
        self.capture(self.config.capture_timeout())
    }

    /// Convert a captured frame into the next RGBA float staging buffer
    pub fn convert(&self, frame: &CapturedFrame<B::Mapped>) -> Result<StagedFrame<B::Staging>> {
        match self.converter.convert(&self.backend, frame) {
            Ok(staged) => {
                Counters::bump(&self.counters.conversions);
                Ok(staged)
            }
            Err(e) => {
                tracing::warn!("Conversion of frame {} failed: {}", frame.sequence(), e);
                Err(e)
            }
        }
    }

    /// Geometry of the most recent accepted frame
    pub fn geometry(&self) -> Option<Geometry> {
        *self.geometry.read()
    }

    pub fn width(&self) -> u32 {
        self.geometry().map(|g| g.width).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.geometry().map(|g| g.height).unwrap_or(0)
    }

    /// Bits per pixel
    pub fn depth(&self) -> u32 {
        self.geometry().map(|g| g.depth).unwrap_or(0)
    }

    /// Bytes per frame
    pub fn size(&self) -> usize {
        self.geometry().map(|g| g.size).unwrap_or(0)
    }

    pub fn stats(&self) -> Stats {
        self.counters.snapshot()
    }
}

impl<B: GpuBackend> FrameSource for VideoSource<B> {
    type Backend = B;

    fn open(&self) -> Result<()> {
        VideoSource::open(self);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        VideoSource::close(self);
        Ok(())
    }

    fn capture(&self, timeout: Option<Duration>) -> Result<CapturedFrame<B::Mapped>> {
        VideoSource::capture(self, timeout)
    }

    fn convert(&self, frame: &CapturedFrame<B::Mapped>) -> Result<StagedFrame<B::Staging>> {
        VideoSource::convert(self, frame)
    }

    fn is_open(&self) -> bool {
        VideoSource::is_open(self)
    }

    fn geometry(&self) -> Option<Geometry> {
        VideoSource::geometry(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{OwnedSample, StreamCaps};
    use crate::gpu::{DeviceMemory, HostBackend};
    use crate::types::{PixelLayout, Resolution};
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn source() -> VideoSource<HostBackend> {
        let source = VideoSource::new(SourceConfig::default(), HostBackend::new()).unwrap();
        source.open();
        source
    }

    fn packed_frame(width: i32, height: i32, fill: u8) -> OwnedSample {
        let len = (width * height * 3) as usize;
        let data = (0..len).map(|n| (n as u8) ^ fill).collect();
        OwnedSample::new(data, StreamCaps::new(width, height))
    }

    #[test]
    fn test_round_trip_up_to_capacity() {
        let source = source();
        let frames: Vec<OwnedSample> = (0..16).map(|n| packed_frame(8, 4, n as u8)).collect();

        for frame in &frames {
            source.on_buffer(frame).unwrap();
            let captured = source.capture(Some(Duration::ZERO)).unwrap();
            assert_eq!(captured.to_vec(), frame.data().unwrap());
        }
        assert_eq!(source.stats().frames_delivered, 16);
    }

    #[test]
    fn test_latest_wins_scenario() {
        let source = source();
        let a = packed_frame(640, 480, 0xA5);
        let b = packed_frame(640, 480, 0x5A);

        source.on_buffer(&a).unwrap();
        assert_eq!(source.size(), 921_600);
        assert_eq!(source.depth(), 24);
        let captured = source.capture(None).unwrap();
        assert_eq!(&*captured.host(), a.data().unwrap());

        source.on_buffer(&b).unwrap();
        let captured = source.capture(None).unwrap();
        assert_eq!(&*captured.host(), b.data().unwrap());
        assert!(matches!(
            source.capture(Some(Duration::from_millis(10))),
            Err(Error::AlreadyConsumed)
        ));
    }

    #[test]
    fn test_unread_frame_is_superseded() {
        let source = source();
        let a = packed_frame(4, 4, 1);
        let b = packed_frame(4, 4, 2);
        source.on_buffer(&a).unwrap();
        source.on_buffer(&b).unwrap();

        let captured = source.capture(None).unwrap();
        assert_eq!(captured.to_vec(), b.data().unwrap());
        assert_eq!(captured.sequence(), 2);
        assert_eq!(source.stats().frames_superseded, 1);
    }

    #[test]
    fn test_capture_timeout_with_no_producer() {
        let source = source();
        let start = Instant::now();
        assert!(matches!(
            source.capture(Some(Duration::from_millis(100))),
            Err(Error::Timeout(_))
        ));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(200), "{:?}", elapsed);
    }

    #[test]
    fn test_held_host_view_survives_ring_wrap() {
        let source = Arc::new(source());
        let a = packed_frame(8, 8, 0x11);
        source.on_buffer(&a).unwrap();
        let first = source.capture(None).unwrap();
        let view = first.host();

        let (tx, rx) = crossbeam_channel::bounded(1);
        {
            let source = source.clone();
            thread::spawn(move || {
                let results: Vec<Result<RingIndex>> = (0..16u8)
                    .map(|n| source.on_buffer(&packed_frame(8, 8, n)))
                    .collect();
                let latest = source
                    .capture(Some(Duration::from_millis(50)))
                    .map(|frame| frame.sequence());
                let _ = tx.send((results, latest));
            });
        }

        let (results, latest) = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("ingest or capture waited on a borrowed slot");

        assert!(results[..15].iter().all(|r| r.is_ok()));
        assert!(matches!(
            results[15],
            Err(Error::SlotInUse { index }) if index == first.index().get()
        ));
        assert_eq!(latest.unwrap(), 16);
        assert_eq!(&*view, a.data().unwrap());
        assert_eq!(source.stats().frames_dropped, 1);

        drop(view);
        assert_eq!(source.on_buffer(&packed_frame(8, 8, 0)).unwrap(), first.index());
    }

    #[test]
    fn test_empty_first_frame_faults_stream() {
        let source = source();
        let empty = OwnedSample::new(Vec::new(), StreamCaps::new(4, 4));

        assert!(matches!(source.on_buffer(&empty), Err(Error::Allocation(_))));
        assert!(matches!(
            source.capture(Some(Duration::from_millis(10))),
            Err(Error::Allocation(_))
        ));
        assert_eq!(source.backend().mapped_allocations(), 0);
    }

    #[test]
    fn test_empty_frame_after_allocation_is_dropped() {
        let source = source();
        source.on_buffer(&packed_frame(4, 4, 1)).unwrap();

        let empty = OwnedSample::new(Vec::new(), StreamCaps::new(4, 4));
        assert!(matches!(
            source.on_buffer(&empty),
            Err(Error::GeometryMismatch { expected: 48, actual: 0 })
        ));
        assert!(source.capture(Some(Duration::ZERO)).is_ok());
    }

    #[test]
    fn test_pool_allocated_once() {
        let source = source();
        for n in 0..40 {
            source.on_buffer(&packed_frame(4, 2, n)).unwrap();
        }
        assert_eq!(source.backend().mapped_allocations(), 16);

        let frame = source.capture(None).unwrap();
        for _ in 0..40 {
            source.convert(&frame).unwrap();
        }
        assert_eq!(source.backend().staging_allocations(), 16);
        assert_eq!(source.stats().conversions, 40);
    }

    #[test]
    fn test_dropped_frames_do_not_disturb_stream() {
        let source = source();
        let good = packed_frame(4, 4, 9);
        source.on_buffer(&good).unwrap();

        assert!(source.on_buffer(&OwnedSample::without_caps(vec![0; 48])).is_err());
        assert!(source
            .on_buffer(&OwnedSample::unmappable(StreamCaps::new(4, 4)))
            .is_err());
        assert!(source
            .on_buffer(&OwnedSample::new(vec![0; 48], StreamCaps::new(-4, 4)))
            .is_err());
        assert!(matches!(
            source.on_buffer(&packed_frame(8, 8, 0)),
            Err(Error::GeometryMismatch { .. })
        ));

        let captured = source.capture(Some(Duration::ZERO)).unwrap();
        assert_eq!(captured.to_vec(), good.data().unwrap());
        assert_eq!(source.width(), 4);

        let stats = source.stats();
        assert_eq!(stats.frames_received, 5);
        assert_eq!(stats.frames_dropped, 4);
        assert_eq!(stats.frames_produced, 1);
    }

    #[test]
    fn test_allocation_failure_faults_capture() {
        let backend = HostBackend::new().with_allocation_limit(10);
        let source = VideoSource::new(SourceConfig::default(), backend).unwrap();
        source.open();

        assert!(matches!(
            source.on_buffer(&packed_frame(4, 4, 0)),
            Err(Error::Allocation(_))
        ));
        assert!(matches!(source.capture(None), Err(Error::Allocation(_))));
    }

    #[test]
    fn test_convert_dispatch_and_staging_wrap() {
        let config = SourceConfig::default().with_staging_capacity(4);
        let source = VideoSource::new(config, HostBackend::new()).unwrap();
        source.open();

        let sample = OwnedSample::pattern(Resolution::VGA, PixelLayout::SemiPlanar, 7);
        source.on_buffer(&sample).unwrap();
        let frame = source.capture(None).unwrap();
        assert_eq!(frame.geometry().depth, 12);

        let staged: Vec<_> = (0..5).map(|_| source.convert(&frame).unwrap()).collect();
        assert_eq!(source.backend().nv12_conversions(), 5);
        assert_eq!(source.backend().rgb_conversions(), 0);
        assert_ne!(staged[0].device_ptr(), staged[1].device_ptr());
        assert_eq!(staged[0].device_ptr(), staged[4].device_ptr());
        assert_eq!(staged[4].read().len(), 640 * 480 * 16);
    }

    #[test]
    fn test_device_pointer_matches_host_memory() {
        let source = source();
        source.on_buffer(&packed_frame(2, 2, 0)).unwrap();
        let frame = source.capture(None).unwrap();
        assert_eq!(frame.device_ptr().addr(), frame.host().as_ptr() as u64);
    }

    #[test]
    fn test_pipeline_error_and_end_of_stream() {
        let source = source();
        source.handle_event(PipelineEvent::Warning("late buffer".into()));
        source.handle_event(PipelineEvent::Error("decoder crashed".into()));
        assert!(matches!(source.capture(None), Err(Error::Pipeline(_))));

        source.open();
        source.handle_event(PipelineEvent::EndOfStream);
        assert!(matches!(source.capture(None), Err(Error::EndOfStream)));
    }

    #[test]
    fn test_close_releases_waiting_consumer() {
        let source = Arc::new(source());
        let consumer = {
            let source = source.clone();
            thread::spawn(move || source.capture(None).map(|f| f.sequence()))
        };
        thread::sleep(Duration::from_millis(20));
        source.close();

        assert!(matches!(consumer.join().unwrap(), Err(Error::EndOfStream)));
        assert!(!source.is_open());
    }

    #[test]
    fn test_producer_thread_to_consumer() {
        let source = Arc::new(source());
        let producer = {
            let source = source.clone();
            thread::spawn(move || {
                for n in 0..200u8 {
                    source.on_buffer(&packed_frame(16, 16, n)).unwrap();
                    thread::sleep(Duration::from_micros(200));
                }
                source.on_end_of_stream();
            })
        };

        let mut last = 0;
        loop {
            match source.capture(Some(Duration::from_secs(5))) {
                Ok(frame) => {
                    assert!(frame.sequence() > last);
                    last = frame.sequence();
                    assert_eq!(frame.host().len(), 16 * 16 * 3);
                }
                Err(Error::AlreadyConsumed) => continue,
                Err(Error::EndOfStream) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        producer.join().unwrap();

        let stats = source.stats();
        assert_eq!(stats.frames_produced, 200);
        assert_eq!(
            stats.frames_delivered + stats.frames_superseded,
            stats.frames_produced
        );
    }
}
