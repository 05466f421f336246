//! Capture synchronizer
//!
//! Single-slot, latest-wins handoff between the pipeline's streaming thread
//! and the consumer. Only the index of the newest complete frame is kept;
//! a frame published before the previous one was captured replaces it.
//! Every published frame is delivered to at most one capture call.

use crate::error::{Error, Result};
use crate::ring::RingIndex;

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A frame claimed by a successful capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Pool slot holding the frame
    pub index: RingIndex,
    /// Publish sequence number, starting at 1
    pub sequence: u64,
}

/// Condition that ends delivery until the stream is reopened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Allocation(String),
    Pipeline(String),
}

impl Fault {
    fn to_error(&self) -> Error {
        match self {
            Fault::Allocation(reason) => Error::Allocation(reason.clone()),
            Fault::Pipeline(reason) => Error::Pipeline(reason.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct Latest {
    index: Option<RingIndex>,
    delivered: bool,
    sequence: u64,
    end_of_stream: bool,
    fault: Option<Fault>,
}

impl Latest {
    fn claim(&mut self) -> Option<Delivery> {
        match self.index {
            Some(index) if !self.delivered => {
                self.delivered = true;
                Some(Delivery {
                    index,
                    sequence: self.sequence,
                })
            }
            _ => None,
        }
    }
}

/// Producer/consumer handoff for the latest frame
#[derive(Debug, Default)]
pub struct CaptureSync {
    state: Mutex<Latest>,
    ready: Condvar,
}

impl CaptureSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `index` as the newest frame and wake a waiting consumer.
    ///
    /// Returns `true` when an undelivered frame was replaced.
    pub fn produce(&self, index: RingIndex) -> bool {
        let superseded = {
            let mut state = self.state.lock();
            let superseded = state.index.is_some() && !state.delivered;
            state.index = Some(index);
            state.delivered = false;
            state.sequence += 1;
            superseded
        };
        self.ready.notify_one();
        superseded
    }

    /// Claim the newest undelivered frame, waiting up to `timeout`.
    ///
    /// `None` waits without bound. On deadline the error is
    /// [`Error::Timeout`] if nothing was ever published, or
    /// [`Error::AlreadyConsumed`] if the newest frame was already claimed.
    pub fn capture(&self, timeout: Option<Duration>) -> Result<Delivery> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut timed_out = false;
        let mut state = self.state.lock();

        loop {
            if let Some(delivery) = state.claim() {
                return Ok(delivery);
            }
            if let Some(fault) = &state.fault {
                return Err(fault.to_error());
            }
            if state.end_of_stream {
                return Err(Error::EndOfStream);
            }
            if timed_out {
                return Err(match state.index {
                    Some(_) => Error::AlreadyConsumed,
                    None => Error::Timeout(timeout.unwrap_or_default()),
                });
            }

            match deadline {
                Some(deadline) => {
                    timed_out = self.ready.wait_until(&mut state, deadline).timed_out();
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    /// Mark the stream finished and wake every waiter
    pub fn end_of_stream(&self) {
        self.state.lock().end_of_stream = true;
        self.ready.notify_all();
    }

    /// Record a fatal condition and wake every waiter. The first fault wins.
    pub fn fault(&self, fault: Fault) {
        {
            let mut state = self.state.lock();
            if state.fault.is_none() {
                state.fault = Some(fault);
            }
        }
        self.ready.notify_all();
    }

    /// Clear end-of-stream and faults for a new run. A frame left over from
    /// the previous run is treated as already delivered.
    pub fn reopen(&self) {
        let mut state = self.state.lock();
        state.end_of_stream = false;
        state.fault = None;
        state.delivered = true;
    }

    pub fn has_pending(&self) -> bool {
        let state = self.state.lock();
        state.index.is_some() && !state.delivered
    }

    /// Number of frames published so far
    pub fn sequence(&self) -> u64 {
        self.state.lock().sequence
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.state.lock().end_of_stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::Ring;
    use std::sync::Arc;
    use std::thread;

    fn indices(n: usize) -> Vec<RingIndex> {
        let ring = Ring::try_new(n, |_| Ok(())).unwrap();
        ring.iter().map(|(i, _)| i).collect()
    }

    #[test]
    fn test_capture_returns_pending_frame_immediately() {
        let sync = CaptureSync::new();
        let idx = indices(4);
        assert!(!sync.produce(idx[1]));

        let delivery = sync.capture(Some(Duration::ZERO)).unwrap();
        assert_eq!(delivery.index, idx[1]);
        assert_eq!(delivery.sequence, 1);
        assert!(!sync.has_pending());
    }

    #[test]
    fn test_second_capture_is_already_consumed() {
        let sync = CaptureSync::new();
        sync.produce(indices(2)[0]);
        sync.capture(None).unwrap();

        assert!(matches!(
            sync.capture(Some(Duration::from_millis(10))),
            Err(Error::AlreadyConsumed)
        ));
    }

    #[test]
    fn test_timeout_without_producer() {
        let sync = CaptureSync::new();
        let start = Instant::now();
        let result = sync.capture(Some(Duration::from_millis(100)));
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(Error::Timeout(t)) if t == Duration::from_millis(100)));
        assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(200), "{:?}", elapsed);
    }

    #[test]
    fn test_latest_wins() {
        let sync = CaptureSync::new();
        let idx = indices(4);
        assert!(!sync.produce(idx[1]));
        assert!(sync.produce(idx[2]));

        let delivery = sync.capture(None).unwrap();
        assert_eq!(delivery.index, idx[2]);
        assert_eq!(delivery.sequence, 2);
        assert!(matches!(
            sync.capture(Some(Duration::ZERO)),
            Err(Error::AlreadyConsumed)
        ));
    }

    #[test]
    fn test_waiter_woken_by_producer() {
        let sync = Arc::new(CaptureSync::new());
        let idx = indices(4)[3];

        let consumer = {
            let sync = sync.clone();
            thread::spawn(move || sync.capture(Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        sync.produce(idx);

        let delivery = consumer.join().unwrap().unwrap();
        assert_eq!(delivery.index, idx);
    }

    #[test]
    fn test_end_of_stream_wakes_unbounded_waiter() {
        let sync = Arc::new(CaptureSync::new());
        let consumer = {
            let sync = sync.clone();
            thread::spawn(move || sync.capture(None))
        };
        thread::sleep(Duration::from_millis(20));
        sync.end_of_stream();

        assert!(matches!(consumer.join().unwrap(), Err(Error::EndOfStream)));
    }

    #[test]
    fn test_pending_frame_survives_end_of_stream() {
        let sync = CaptureSync::new();
        sync.produce(indices(1)[0]);
        sync.end_of_stream();

        assert!(sync.capture(None).is_ok());
        assert!(matches!(sync.capture(None), Err(Error::EndOfStream)));
    }

    #[test]
    fn test_fault_surfaces_and_reopen_clears() {
        let sync = CaptureSync::new();
        sync.fault(Fault::Allocation("no memory".into()));
        sync.fault(Fault::Pipeline("ignored".into()));
        assert!(matches!(sync.capture(None), Err(Error::Allocation(r)) if r == "no memory"));

        sync.produce(indices(1)[0]);
        sync.reopen();
        assert!(!sync.has_pending());
        assert!(matches!(
            sync.capture(Some(Duration::ZERO)),
            Err(Error::AlreadyConsumed)
        ));
    }

    #[test]
    fn test_each_frame_delivered_at_most_once() {
        let sync = Arc::new(CaptureSync::new());
        let idx = indices(16);

        let producer = {
            let sync = sync.clone();
            thread::spawn(move || {
                for n in 0..2000 {
                    sync.produce(idx[n % idx.len()]);
                    if n % 64 == 0 {
                        thread::yield_now();
                    }
                }
                sync.end_of_stream();
            })
        };

        let mut last = 0;
        let mut delivered = 0;
        loop {
            match sync.capture(Some(Duration::from_secs(5))) {
                Ok(d) => {
                    assert!(d.sequence > last, "{} after {}", d.sequence, last);
                    last = d.sequence;
                    delivered += 1;
                }
                Err(Error::EndOfStream) => break,
                Err(Error::AlreadyConsumed) => continue,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        producer.join().unwrap();

        assert!(delivered >= 1);
        assert!(delivered <= 2000);
        assert_eq!(sync.sequence(), 2000);
    }
}
