//! Thread Pool and Command Loop (spec.md §4.5). The worker side runs
//! *parallel threads*, not async tasks (spec.md §5), so this is built on
//! `std::thread` + `parking_lot::Condvar` rather than tokio, matching the
//! teacher's `resource_manager`/`buffer` modules' choice of primitive for
//! CPU-bound coordination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::worker::runner::{Engine, FrameSink};
use crate::worker::sched::blend::BlendScheduler;

/// Signals workers to wait or wake when the Blend Scheduler might have new
/// work (spec.md §5: "`getCmd` blocks on a condition variable until the
/// Blend Scheduler reports ready or shutdown").
pub struct WakeSignal {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }
}

impl WakeSignal {
    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }

    pub fn wait_timeout(&self, timeout: std::time::Duration) {
        let mut guard = self.mutex.lock();
        self.condvar.wait_for(&mut guard, timeout);
    }
}

pub struct ThreadPool {
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<WakeSignal>,
}

impl ThreadPool {
    /// Spawn `size` worker threads, each looping: ask the Blend Scheduler
    /// for a ready command (blocking until one is available or shutdown),
    /// call `command_start`, execute the command's body via `engine`,
    /// emitting frames to `sink`, call `command_finish`.
    pub fn start(size: usize, blend: Arc<BlendScheduler>, engine: Arc<dyn Engine>, sink: Arc<dyn FrameSink>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(WakeSignal::default());
        let mut handles = Vec::with_capacity(size);
        for worker_id in 0..size {
            let blend = blend.clone();
            let engine = engine.clone();
            let sink = sink.clone();
            let shutdown = shutdown.clone();
            let wake = wake.clone();
            handles.push(std::thread::spawn(move || {
                worker_loop(worker_id, blend, engine, sink, shutdown, wake);
            }));
        }
        Self {
            handles: Mutex::new(handles),
            shutdown,
            wake,
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_all();
        let mut handles = self.handles.lock();
        for h in handles.drain(..) {
            let _ = h.join();
        }
    }

    pub fn wake(&self) -> Arc<WakeSignal> {
        self.wake.clone()
    }
}

fn worker_loop(
    worker_id: usize,
    blend: Arc<BlendScheduler>,
    engine: Arc<dyn Engine>,
    sink: Arc<dyn FrameSink>,
    shutdown: Arc<AtomicBool>,
    wake: Arc<WakeSignal>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        let Some(task) = blend.get_cmd() else {
            wake.wait_timeout(std::time::Duration::from_millis(50));
            continue;
        };
        blend.command_start(&task);
        debug!(worker_id, task = ?task.id, "executing task");
        if let Err(e) = crate::worker::runner::run(&task, engine.as_ref(), sink.as_ref()) {
            error!(worker_id, task = ?task.id, error = %e, "task execution failed");
        }
        blend.command_finish(&task);
    }
}
