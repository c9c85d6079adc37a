//! Asynchronous Instrument Collector
//!
//! A single background worker that periodically invokes the callbacks
//! registered for observable instruments and records the observations
//! they yield. Callbacks run inside a panic boundary; a misbehaving
//! callback costs at most its own remaining observations for that tick
//! and is counted as a drop, never propagated.

use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ExporterError, ExporterResult};
use crate::exporter::core::ExporterShared;
use crate::protocol::{AttributeValue, MeasurementValue, MetricStreamHandle};

/// One observation yielded by an observable-instrument callback
#[derive(Debug, Clone)]
pub struct Observation {
    pub value: MeasurementValue,
    pub attributes: Vec<(String, AttributeValue)>,
}

impl Observation {
    pub fn new(
        value: impl Into<MeasurementValue>,
        attributes: Vec<(String, AttributeValue)>,
    ) -> Self {
        Self {
            value: value.into(),
            attributes,
        }
    }
}

/// Identifier returned by callback registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type BoxedCallback = Box<dyn Fn() -> Box<dyn Iterator<Item = Observation> + Send> + Send + Sync>;

struct Registration {
    id: u64,
    stream: MetricStreamHandle,
    callback: BoxedCallback,
}

struct CollectorShared {
    exporter: Arc<ExporterShared>,
    interval: Duration,
    callbacks: Mutex<Vec<Arc<Registration>>>,
    next_id: AtomicU64,
    stop: Mutex<bool>,
    signal: Condvar,
}

/// Fixed-interval worker for observable instruments
pub struct AsyncCollector {
    shared: Arc<CollectorShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncCollector {
    pub(crate) fn new(exporter: Arc<ExporterShared>, interval: Duration) -> Self {
        Self {
            shared: Arc::new(CollectorShared {
                exporter,
                interval,
                callbacks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                stop: Mutex::new(false),
                signal: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Register a callback for an observable instrument. The callback is
    /// invoked on every collector tick and its observations are recorded
    /// against `stream` with the collection time.
    pub fn register<F, I>(&self, stream: MetricStreamHandle, callback: F) -> CallbackId
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Observation>,
        I::IntoIter: Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let boxed: BoxedCallback = Box::new(move || Box::new(callback().into_iter()));
        self.shared.callbacks.lock().push(Arc::new(Registration {
            id,
            stream,
            callback: boxed,
        }));
        debug!("registered observable callback {id} for metric stream {stream}");
        CallbackId(id)
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unregister(&self, id: CallbackId) -> bool {
        let mut callbacks = self.shared.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|registration| registration.id != id.0);
        callbacks.len() != before
    }

    /// Start the worker thread. Calling `start` on a running collector is
    /// a no-op.
    pub fn start(&self) -> ExporterResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            debug!("collector already running");
            return Ok(());
        }
        *self.shared.stop.lock() = false;

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("otlp-mmap-collector".to_string())
            .spawn(move || run(shared))
            .map_err(|e| ExporterError::Io {
                source: e,
                path: None,
            })?;
        *worker = Some(handle);
        info!("collector started");
        Ok(())
    }

    /// Signal the worker to stop and join it. Idempotent.
    pub fn stop(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            *self.shared.stop.lock() = true;
            self.shared.signal.notify_all();
            if handle.join().is_err() {
                warn!("collector worker panicked during shutdown");
            }
            info!("collector stopped");
        }
    }

    /// Whether the worker thread is currently running.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Run one collection pass synchronously on the calling thread.
    pub fn collect_now(&self) {
        collect(&self.shared);
    }
}

fn run(shared: Arc<CollectorShared>) {
    loop {
        if *shared.stop.lock() {
            break;
        }
        collect(&shared);

        let mut stop = shared.stop.lock();
        if *stop {
            break;
        }
        shared.signal.wait_for(&mut stop, shared.interval);
        if *stop {
            break;
        }
    }
}

fn collect(shared: &CollectorShared) {
    let registrations: Vec<Arc<Registration>> = shared.callbacks.lock().clone();
    if registrations.is_empty() {
        return;
    }
    debug!("collecting {} observable instruments", registrations.len());

    for registration in registrations {
        // Observations are recorded as the callback yields them, so a
        // panic at element N keeps elements 0..N-1.
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            for observation in (registration.callback)() {
                shared
                    .exporter
                    .record_observation(registration.stream, &observation);
            }
        }));
        if outcome.is_err() {
            warn!(
                "observable callback {} for metric stream {} panicked",
                registration.id, registration.stream
            );
            shared.exporter.count_callback_drop();
        }
    }
}
