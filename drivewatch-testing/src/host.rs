// SPDX-License-Identifier: GPL-3.0-only

//! In-process arbitration hosts for the test suites.
//!
//! [`SimulatedHost`] mimics the disk-arbitration facility faithfully
//! enough to drive the whole notifier: a new registration is replayed every
//! currently attached disk, injected events queue until some thread pumps
//! the loop the session is scheduled on, and a reference ledger checks that
//! every create-rule reference is given back exactly once.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::debug;

use drivewatch_diskarb::host::{
    ArbitrationHost, CallbackToken, DescriptionKey, DiskCallbacks, DiskDescription, MatchFilter,
    RawRef, RegistrationError,
};

#[derive(Clone)]
enum EventKind {
    Appeared,
    Disappeared,
    Changed(Vec<DescriptionKey>),
}

struct QueuedEvent {
    /// Registration tokens still owed this event.
    targets: Vec<usize>,
    kind: EventKind,
    description: DiskDescription,
}

struct Registration {
    token: usize,
    session: usize,
    filter: MatchFilter,
    watched: Option<Vec<DescriptionKey>>,
    handlers: Arc<Mutex<DiskCallbacks>>,
}

#[derive(Default)]
struct State {
    next_ref: usize,
    next_token: usize,
    /// Outstanding reference count per minted object.
    refs: HashMap<usize, usize>,
    /// Session -> thread whose run loop it is scheduled on.
    sessions: HashMap<usize, Option<ThreadId>>,
    registrations: Vec<Registration>,
    disks: BTreeMap<String, DiskDescription>,
    queue: VecDeque<QueuedEvent>,
    dispatch_threads: HashSet<ThreadId>,
    refuse_registrations: Option<String>,
    fail_session_creation: bool,
}

/// Scripted disk-arbitration facility.
#[derive(Default)]
pub struct SimulatedHost {
    state: Mutex<State>,
    wake: Condvar,
}

impl SimulatedHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every future `create_session` return null.
    pub fn fail_session_creation(&self) {
        self.lock().fail_session_creation = true;
    }

    /// Make every future registration be refused with `reason`.
    pub fn refuse_registrations(&self, reason: &str) {
        self.lock().refuse_registrations = Some(reason.to_string());
    }

    /// Add a disk without generating an event, as if it had been attached
    /// before any session existed.
    pub fn insert_disk(&self, tag: &str, description: DiskDescription) {
        self.lock().disks.insert(tag.to_string(), description);
    }

    /// Attach a disk and fire `Appeared` at every live registration.
    pub fn attach_disk(&self, tag: &str, description: DiskDescription) {
        let mut state = self.lock();
        state.disks.insert(tag.to_string(), description.clone());
        let targets = all_tokens(&state);
        state.queue.push_back(QueuedEvent {
            targets,
            kind: EventKind::Appeared,
            description,
        });
        drop(state);
        self.wake.notify_all();
    }

    /// Replace a disk's description and fire `DescriptionChanged` with the
    /// given changed-keys list.
    pub fn change_description(
        &self,
        tag: &str,
        description: DiskDescription,
        changed: &[DescriptionKey],
    ) {
        let mut state = self.lock();
        assert!(
            state.disks.contains_key(tag),
            "change_description for unknown disk {tag:?}"
        );
        state.disks.insert(tag.to_string(), description.clone());
        let targets = all_tokens(&state);
        state.queue.push_back(QueuedEvent {
            targets,
            kind: EventKind::Changed(changed.to_vec()),
            description,
        });
        drop(state);
        self.wake.notify_all();
    }

    /// Detach a disk and fire `Disappeared` with its final description.
    pub fn detach_disk(&self, tag: &str) {
        let mut state = self.lock();
        let description = state
            .disks
            .remove(tag)
            .unwrap_or_else(|| panic!("detach_disk for unknown disk {tag:?}"));
        let targets = all_tokens(&state);
        state.queue.push_back(QueuedEvent {
            targets,
            kind: EventKind::Disappeared,
            description,
        });
        drop(state);
        self.wake.notify_all();
    }

    /// Number of minted objects whose reference has not been given back.
    pub fn outstanding_refs(&self) -> usize {
        self.lock().refs.values().filter(|count| **count > 0).count()
    }

    /// Registrations currently alive.
    pub fn active_registrations(&self) -> usize {
        self.lock().registrations.len()
    }

    /// Threads that have dispatched at least one callback.
    pub fn dispatch_threads(&self) -> Vec<ThreadId> {
        self.lock().dispatch_threads.iter().copied().collect()
    }

    fn take_batch(
        state: &mut State,
        thread: ThreadId,
    ) -> Vec<(Arc<Mutex<DiskCallbacks>>, EventKind, DiskDescription)> {
        let mut batch = Vec::new();
        let mut keep = VecDeque::new();

        while let Some(mut event) = state.queue.pop_front() {
            let mut remaining = Vec::new();
            for token in event.targets.drain(..) {
                let Some(registration) = state
                    .registrations
                    .iter()
                    .find(|registration| registration.token == token)
                else {
                    // Unregistered while the event was queued.
                    continue;
                };
                let scheduled_here = state
                    .sessions
                    .get(&registration.session)
                    .copied()
                    .flatten()
                    == Some(thread);
                if !scheduled_here {
                    remaining.push(token);
                    continue;
                }
                if !registration.filter.matches(&event.description) {
                    continue;
                }
                if let EventKind::Changed(keys) = &event.kind
                    && let Some(watched) = &registration.watched
                    && !keys.iter().any(|key| watched.contains(key))
                {
                    continue;
                }
                batch.push((
                    Arc::clone(&registration.handlers),
                    event.kind.clone(),
                    event.description.clone(),
                ));
            }
            if !remaining.is_empty() {
                keep.push_back(QueuedEvent {
                    targets: remaining,
                    kind: event.kind,
                    description: event.description,
                });
            }
        }

        state.queue = keep;
        batch
    }
}

fn all_tokens(state: &State) -> Vec<usize> {
    state
        .registrations
        .iter()
        .map(|registration| registration.token)
        .collect()
}

impl ArbitrationHost for SimulatedHost {
    fn create_session(&self) -> Option<RawRef> {
        let mut state = self.lock();
        if state.fail_session_creation {
            return None;
        }
        state.next_ref += 1;
        let raw = state.next_ref;
        state.refs.insert(raw, 1);
        state.sessions.insert(raw, None);
        Some(RawRef(raw))
    }

    fn release(&self, object: RawRef) {
        let mut state = self.lock();
        let count = state
            .refs
            .get_mut(&object.0)
            .unwrap_or_else(|| panic!("release of unknown reference {object:?}"));
        assert!(*count > 0, "release of already released reference {object:?}");
        *count -= 1;
    }

    fn register_callbacks(
        &self,
        session: RawRef,
        callbacks: DiskCallbacks,
    ) -> Result<CallbackToken, RegistrationError> {
        let mut state = self.lock();
        if let Some(reason) = &state.refuse_registrations {
            return Err(RegistrationError {
                reason: reason.clone(),
            });
        }
        assert!(
            state.sessions.contains_key(&session.0),
            "registration against unknown session {session:?}"
        );

        state.next_token += 1;
        let token = state.next_token;
        let filter = callbacks.filter.clone();
        let watched = callbacks.watched_keys.clone();

        // A new registration is told about every disk already attached,
        // the way the real facility replays current media.
        let replay: Vec<DiskDescription> = state.disks.values().cloned().collect();
        for description in replay {
            state.queue.push_back(QueuedEvent {
                targets: vec![token],
                kind: EventKind::Appeared,
                description,
            });
        }

        state.registrations.push(Registration {
            token,
            session: session.0,
            filter,
            watched,
            handlers: Arc::new(Mutex::new(callbacks)),
        });
        drop(state);
        self.wake.notify_all();
        Ok(CallbackToken::new(token))
    }

    fn unregister_callbacks(&self, _session: RawRef, token: CallbackToken) {
        let mut state = self.lock();
        let position = state
            .registrations
            .iter()
            .position(|registration| registration.token == token.value())
            .unwrap_or_else(|| panic!("unregistration of unknown token {token:?}"));
        state.registrations.remove(position);
    }

    fn schedule_with_run_loop(&self, session: RawRef) {
        let mut state = self.lock();
        let scheduled = state
            .sessions
            .get_mut(&session.0)
            .unwrap_or_else(|| panic!("schedule of unknown session {session:?}"));
        *scheduled = Some(thread::current().id());
    }

    fn unschedule_from_run_loop(&self, session: RawRef) {
        let mut state = self.lock();
        if let Some(scheduled) = state.sessions.get_mut(&session.0) {
            *scheduled = None;
        }
    }

    fn run_loop_quantum(&self, quantum: Duration) {
        let deadline = Instant::now() + quantum;
        let thread = thread::current().id();
        let mut state = self.lock();

        loop {
            let batch = Self::take_batch(&mut state, thread);
            if batch.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    return;
                }
                let (guard, _timeout) = self
                    .wake
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner);
                state = guard;
                continue;
            }

            state.dispatch_threads.insert(thread);
            drop(state);
            for (handlers, kind, description) in batch {
                let mut handlers = handlers.lock().unwrap_or_else(PoisonError::into_inner);
                match kind {
                    EventKind::Appeared => {
                        debug!("dispatching appeared");
                        (handlers.appeared)(&description);
                    }
                    EventKind::Disappeared => {
                        debug!("dispatching disappeared");
                        (handlers.disappeared)(&description);
                    }
                    EventKind::Changed(keys) => {
                        debug!("dispatching description change");
                        (handlers.description_changed)(&description, &keys);
                    }
                }
            }
            state = self.lock();
        }
    }
}

/// A host whose run loop never returns, for exercising the degraded
/// shutdown path.
#[derive(Default)]
pub struct HangingHost {
    minted: AtomicUsize,
    released: AtomicUsize,
    tokens: AtomicUsize,
}

impl HangingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn outstanding_refs(&self) -> usize {
        self.minted.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }
}

impl ArbitrationHost for HangingHost {
    fn create_session(&self) -> Option<RawRef> {
        let raw = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
        Some(RawRef(raw))
    }

    fn release(&self, _object: RawRef) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn register_callbacks(
        &self,
        _session: RawRef,
        _callbacks: DiskCallbacks,
    ) -> Result<CallbackToken, RegistrationError> {
        Ok(CallbackToken::new(
            self.tokens.fetch_add(1, Ordering::SeqCst) + 1,
        ))
    }

    fn unregister_callbacks(&self, _session: RawRef, _token: CallbackToken) {}

    fn schedule_with_run_loop(&self, _session: RawRef) {}

    fn unschedule_from_run_loop(&self, _session: RawRef) {}

    fn run_loop_quantum(&self, _quantum: Duration) {
        // The loop is wedged inside the host and no quantum brings it back.
        loop {
            thread::sleep(Duration::from_secs(3600));
        }
    }
}
