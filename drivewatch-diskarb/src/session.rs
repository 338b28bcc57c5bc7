// SPDX-License-Identifier: GPL-3.0-only

//! Session lifecycle: create, register, pump, tear down.
//!
//! The session is pumped by one dedicated thread. The loop runs in bounded
//! quanta so a stop request is observed within one quantum instead of
//! hanging in a fully blocking host call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::error::{NotifyError, Result};
use crate::host::{ArbitrationHost, CallbackToken, RawRef, ScopedRef, Session};
use crate::media::{MediaTypeCallbacks, register_callbacks};

const JOIN_POLL: Duration = Duration::from_millis(10);

pub(crate) struct SessionRunner {
    host: Arc<dyn ArbitrationHost>,
    config: RunnerConfig,
    stop: Arc<AtomicBool>,
    running: Option<Running>,
}

struct Running {
    session: ScopedRef<Session>,
    tokens: Vec<CallbackToken>,
    worker: thread::JoinHandle<()>,
}

impl SessionRunner {
    pub(crate) fn new(host: Arc<dyn ArbitrationHost>, config: RunnerConfig) -> Self {
        Self {
            host,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            running: None,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Create the session, register every strategy, and spawn the event
    /// thread. On any failure the partial state is unwound before
    /// returning, so a failed start leaves nothing behind.
    pub(crate) fn start(&mut self, strategies: &[Arc<dyn MediaTypeCallbacks>]) -> Result<()> {
        debug_assert!(self.running.is_none());

        let raw = self
            .host
            .create_session()
            .ok_or(NotifyError::SessionCreate)?;
        let session: ScopedRef<Session> = ScopedRef::new(Arc::clone(&self.host), raw);

        let mut tokens = Vec::with_capacity(strategies.len());
        for strategy in strategies {
            match register_callbacks(&self.host, session.raw(), strategy) {
                Ok(token) => tokens.push(token),
                Err(refused) => {
                    self.unregister(session.raw(), tokens);
                    return Err(refused.into());
                }
            }
        }

        self.stop.store(false, Ordering::SeqCst);

        let worker = {
            let host = Arc::clone(&self.host);
            let stop = Arc::clone(&self.stop);
            let session = session.raw();
            let quantum = self.config.quantum;
            thread::Builder::new()
                .name("drivewatch-events".to_string())
                .spawn(move || {
                    host.schedule_with_run_loop(session);
                    while !stop.load(Ordering::SeqCst) {
                        host.run_loop_quantum(quantum);
                    }
                    host.unschedule_from_run_loop(session);
                })
        };

        let worker = match worker {
            Ok(worker) => worker,
            Err(error) => {
                self.unregister(session.raw(), tokens);
                return Err(error.into());
            }
        };

        info!("disk arbitration session running");
        self.running = Some(Running {
            session,
            tokens,
            worker,
        });
        Ok(())
    }

    /// Signal the event thread, wait for it within the configured ceiling,
    /// then unwind the registrations and the session. A thread that does
    /// not come back is detached; the session is leaked rather than
    /// released under a loop that may still be pumping it.
    pub(crate) fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        self.stop.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.config.join_ceiling;
        while !running.worker.is_finished() && Instant::now() < deadline {
            thread::sleep(JOIN_POLL);
        }

        if !running.worker.is_finished() {
            warn!(
                ceiling = ?self.config.join_ceiling,
                "event thread did not stop in time; detaching it and leaking the session"
            );
            running.session.leak();
            return;
        }

        if running.worker.join().is_err() {
            warn!("event thread panicked during shutdown");
        }

        self.unregister(running.session.raw(), running.tokens);
        debug!("disk arbitration session torn down");
    }

    fn unregister(&self, session: RawRef, tokens: Vec<CallbackToken>) {
        for token in tokens {
            self.host.unregister_callbacks(session, token);
        }
    }
}
