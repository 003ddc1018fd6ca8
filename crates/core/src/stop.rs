//! Off-thread video shutdown with timeout detection
//!
//! Each stop runs on two threads: `p2p-stop` makes the (possibly hanging)
//! engine call and `p2p-stop-watch` waits for it with a deadline. The
//! caller only pays for spawning them. The token is held from launch until
//! the watcher resolves, so at most one stop sequence is in flight.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError};
use parking_lot::Mutex;

use crate::engine::{Engine, EngineError};
use crate::reporter::ErrorReporter;
use crate::{Error, Result};

/// How a stop sequence ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The engine returned within the deadline
    Completed { elapsed: Duration },
    /// The engine returned an error (or panicked) within the deadline
    Failed(EngineError),
    /// The deadline passed; the engine call keeps running in the background
    TimedOut { elapsed: Duration },
}

/// Result of asking for a stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    /// A new stop sequence was started
    Launched,
    /// A stop sequence was already running; nothing was done
    AlreadyInFlight,
}

struct StopWorker {
    engine: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

pub struct StopSequencer {
    session_id: String,
    engine: Arc<dyn Engine>,
    token: Arc<AtomicBool>,
    timeout: Duration,
    reporter: ErrorReporter,
    workers: Mutex<Vec<StopWorker>>,
}

impl StopSequencer {
    pub fn new(
        session_id: impl Into<String>,
        engine: Arc<dyn Engine>,
        timeout: Duration,
        reporter: ErrorReporter,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            engine,
            token: Arc::new(AtomicBool::new(false)),
            timeout,
            reporter,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// A stop sequence currently holds the token
    pub fn is_in_flight(&self) -> bool {
        self.token.load(Ordering::SeqCst)
    }

    /// Start a stop sequence unless one is already running
    ///
    /// Never blocks on the engine. `on_complete` runs on the watcher thread
    /// after the token has been released.
    pub fn request_stop<F>(&self, on_complete: F) -> Result<StopRequest>
    where
        F: FnOnce(StopOutcome) + Send + 'static,
    {
        if self
            .token
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(session_id = %self.session_id, "stop already in flight");
            return Ok(StopRequest::AlreadyInFlight);
        }
        self.reap();
        if let Err(e) = self.launch(true, on_complete) {
            self.token.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(StopRequest::Launched)
    }

    /// Stop the engine again regardless of the token
    ///
    /// For a start that completed after a stop or dispose had already been
    /// issued: the earlier engine stop may have run before the engine began
    /// streaming. The token is neither taken nor released.
    pub fn force_stop(&self) -> Result<()> {
        self.reap();
        self.launch(false, |_| {})
    }

    fn launch<F>(&self, owns_token: bool, on_complete: F) -> Result<()>
    where
        F: FnOnce(StopOutcome) + Send + 'static,
    {
        let (tx, rx) = channel::bounded::<std::result::Result<(), EngineError>>(1);
        let started = Instant::now();

        let engine = self.engine.clone();
        let engine_thread = std::thread::Builder::new()
            .name("p2p-stop".to_string())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| engine.stop_video()))
                    .unwrap_or_else(|_| Err(EngineError::call_failed("stop_video", "engine panicked")));
                // The watcher may already have given up
                let _ = tx.send(result);
            })?;

        let token = self.token.clone();
        let timeout = self.timeout;
        let reporter = self.reporter.clone();
        let session_id = self.session_id.clone();
        let watcher = std::thread::Builder::new()
            .name("p2p-stop-watch".to_string())
            .spawn(move || {
                let outcome = match rx.recv_timeout(timeout) {
                    Ok(Ok(())) => {
                        let elapsed = started.elapsed();
                        tracing::info!(
                            %session_id,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "video stopped"
                        );
                        StopOutcome::Completed { elapsed }
                    }
                    Ok(Err(e)) => {
                        tracing::error!(%session_id, error = %e, "engine stop failed");
                        reporter.report_error(&Error::Engine(e.clone()));
                        StopOutcome::Failed(e)
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        let elapsed = started.elapsed();
                        let elapsed_ms = elapsed.as_millis() as u64;
                        tracing::error!(%session_id, elapsed_ms, "engine stop timed out");
                        reporter.report_error(&Error::StopTimeout { elapsed_ms });
                        StopOutcome::TimedOut { elapsed }
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        let e = EngineError::call_failed("stop_video", "stop worker exited without a result");
                        tracing::error!(%session_id, error = %e, "engine stop failed");
                        StopOutcome::Failed(e)
                    }
                };
                if owns_token {
                    token.store(false, Ordering::SeqCst);
                }
                on_complete(outcome);
            })?;

        self.workers.lock().push(StopWorker {
            engine: engine_thread,
            watcher,
        });
        tracing::debug!(session_id = %self.session_id, owns_token, "stop sequence launched");
        Ok(())
    }

    /// Join workers whose threads have both exited
    fn reap(&self) {
        let mut workers = self.workers.lock();
        let (done, pending): (Vec<_>, Vec<_>) = workers
            .drain(..)
            .partition(|w| w.engine.is_finished() && w.watcher.is_finished());
        *workers = pending;
        drop(workers);
        for worker in done {
            let _ = worker.engine.join();
            let _ = worker.watcher.join();
        }
    }

    /// Wait for every watcher and join finished engine threads
    ///
    /// Watchers are bounded by the timeout, so this is too. Returns the
    /// number of engine calls still running; those threads are detached.
    pub fn shutdown(&self) -> usize {
        let workers: Vec<StopWorker> = self.workers.lock().drain(..).collect();
        let mut hung = 0;
        for worker in workers {
            if worker.watcher.join().is_err() {
                tracing::warn!(session_id = %self.session_id, "stop watcher panicked");
            }
            if worker.engine.is_finished() {
                let _ = worker.engine.join();
            } else {
                hung += 1;
            }
        }
        if hung > 0 {
            tracing::warn!(
                session_id = %self.session_id,
                hung,
                "engine stop call still running, leaving it to finish"
            );
        }
        hung
    }
}

impl std::fmt::Debug for StopSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSequencer")
            .field("session_id", &self.session_id)
            .field("engine", &self.engine.name())
            .field("in_flight", &self.is_in_flight())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::{CallbackAttachment, InProcessRuntime};
    use crate::engine::LoopbackEngine;
    use crate::lifecycle::LifecycleGuard;
    use crate::receiver::CallbackReceiver;

    fn sequencer(engine: Arc<LoopbackEngine>, timeout: Duration) -> (StopSequencer, Arc<LifecycleGuard>) {
        let guard = Arc::new(LifecycleGuard::new());
        let attachment = CallbackAttachment::new(Arc::new(InProcessRuntime::new()));
        let reporter = ErrorReporter::new(guard.clone(), attachment);
        (StopSequencer::new("test", engine, timeout, reporter), guard)
    }

    #[test]
    fn test_stop_completes_and_releases_token() {
        let engine = Arc::new(LoopbackEngine::new());
        let (stop, _guard) = sequencer(engine.clone(), Duration::from_secs(5));
        let (tx, rx) = channel::bounded(1);

        let request = stop
            .request_stop(move |outcome| {
                let _ = tx.send(outcome);
            })
            .unwrap();
        assert_eq!(request, StopRequest::Launched);

        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, StopOutcome::Completed { .. }));
        assert!(!stop.is_in_flight());
        assert_eq!(engine.stop_calls(), 1);
        assert_eq!(stop.shutdown(), 0);
    }

    #[test]
    fn test_second_request_while_in_flight_is_noop() {
        let engine = Arc::new(LoopbackEngine::new().with_stop_delay(Duration::from_millis(200)));
        let (stop, _guard) = sequencer(engine.clone(), Duration::from_secs(5));

        assert_eq!(stop.request_stop(|_| {}).unwrap(), StopRequest::Launched);
        assert_eq!(stop.request_stop(|_| {}).unwrap(), StopRequest::AlreadyInFlight);

        stop.shutdown();
        assert_eq!(engine.stop_calls(), 1);
    }

    #[test]
    fn test_force_stop_ignores_token() {
        let engine = Arc::new(LoopbackEngine::new().with_stop_delay(Duration::from_millis(200)));
        let (stop, _guard) = sequencer(engine.clone(), Duration::from_secs(5));

        assert_eq!(stop.request_stop(|_| {}).unwrap(), StopRequest::Launched);
        stop.force_stop().unwrap();
        assert!(stop.is_in_flight());

        assert_eq!(stop.shutdown(), 0);
        assert_eq!(engine.stop_calls(), 2);
        assert!(!stop.is_in_flight());

        // A forced stop on its own never takes the token
        stop.force_stop().unwrap();
        assert!(!stop.is_in_flight());
        stop.shutdown();
        assert_eq!(engine.stop_calls(), 3);
    }

    #[test]
    fn test_timeout_reported_and_token_released() {
        let engine = Arc::new(LoopbackEngine::new().with_stop_delay(Duration::from_millis(500)));
        let (stop, guard) = sequencer(engine.clone(), Duration::from_millis(50));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let receiver = CallbackReceiver::builder("stop")
            .on_video_frame(|_| Ok(()))
            .on_texture_frame(|_, _, _| Ok(()))
            .on_error(move |message| {
                sink.lock().push(message);
                Ok(())
            })
            .on_message(|_, _| Ok(()))
            .build();
        guard.bind(&receiver).unwrap();

        let (tx, rx) = channel::bounded(1);
        let started = Instant::now();
        stop.request_stop(move |outcome| {
            let _ = tx.send(outcome);
        })
        .unwrap();
        // Caller is not blocked by the slow engine
        assert!(started.elapsed() < Duration::from_millis(400));

        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, StopOutcome::TimedOut { .. }));
        assert!(!stop.is_in_flight());
        assert!(errors.lock()[0].starts_with("STOP_TIMEOUT"));

        // The slow call still completes in the background
        std::thread::sleep(Duration::from_millis(700));
        assert_eq!(stop.shutdown(), 0);
        assert_eq!(engine.stop_calls(), 1);
    }
}
