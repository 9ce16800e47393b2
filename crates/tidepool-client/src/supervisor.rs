//! Connection supervisor
//!
//! Keeps a [`Controller`] running: starts it, retries failed starts with a
//! growing delay, and relaunches the start sequence (at the base delay)
//! whenever an established connection is lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error};

use crate::controller::Controller;
use crate::sink::EventSink;

/// Delay growth between consecutive failed start attempts, in whole
/// seconds: 30 becomes 45 becomes 67.
pub fn next_delay(delay: u64) -> u64 {
    delay + delay / 2
}

struct Inner<C> {
    controller: Arc<C>,
    sink: Arc<dyn EventSink>,
    base_delay: u64,
    stopped: AtomicBool,
    first_time: AtomicBool,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

pub struct ConnectionSupervisor<C: Controller + 'static> {
    inner: Arc<Inner<C>>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Controller + 'static> ConnectionSupervisor<C> {
    pub fn new(controller: Arc<C>, sink: Arc<dyn EventSink>, base_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                controller,
                sink,
                base_delay: base_delay.as_secs(),
                stopped: AtomicBool::new(false),
                first_time: AtomicBool::new(true),
                retry_task: Mutex::new(None),
            }),
            monitor_task: Mutex::new(None),
        }
    }

    pub fn controller(&self) -> &Arc<C> {
        &self.inner.controller
    }

    /// Launch the start-retry loop and the connection-loss monitor.
    /// A no-op while a start attempt is already in flight.
    pub fn start(&self) {
        {
            let mut retry = self.inner.retry_task.lock();
            if retry.as_ref().map_or(false, |task| !task.is_finished()) {
                return;
            }
            *retry = Some(tokio::spawn(run_starter(self.inner.clone(), None)));
        }

        let mut monitor = self.monitor_task.lock();
        if monitor.is_none() {
            if let Some(mut lost) = self.inner.controller.take_connection_lost() {
                let inner = self.inner.clone();
                *monitor = Some(tokio::spawn(async move {
                    while let Some(reason) = lost.recv().await {
                        if inner.stopped.load(Ordering::SeqCst) {
                            break;
                        }
                        error!(
                            "lost connection to {}: {}",
                            inner.controller.host(),
                            reason.as_deref().unwrap_or("closed by peer")
                        );
                        let mut retry = inner.retry_task.lock();
                        if retry.as_ref().map_or(false, |task| !task.is_finished()) {
                            continue;
                        }
                        *retry = Some(tokio::spawn(run_starter(
                            inner.clone(),
                            Some(inner.base_delay),
                        )));
                    }
                }));
            }
        }
    }

    /// Cancel any pending retry and shut the controller down
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = self.inner.retry_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.monitor_task.lock().take() {
            task.abort();
        }
        self.inner.controller.stop();
    }
}

async fn run_starter<C: Controller + 'static>(inner: Arc<Inner<C>>, initial_delay: Option<u64>) {
    let mut delay = inner.base_delay;
    if let Some(initial) = initial_delay {
        inner.sink.retrying(Duration::from_secs(initial)).await;
        time::sleep(Duration::from_secs(initial)).await;
    }
    loop {
        if inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        debug!("trying to start controller for {}", inner.controller.host());
        match inner.controller.start().await {
            Ok(()) => {
                if inner.first_time.swap(false, Ordering::SeqCst) {
                    inner.sink.started().await;
                } else {
                    inner.sink.reconnected().await;
                }
                return;
            }
            Err(err) => {
                error!("cannot start controller: {err}");
                inner.sink.retrying(Duration::from_secs(delay)).await;
                time::sleep(Duration::from_secs(delay)).await;
                delay = next_delay(delay);
            }
        }
    }
}
