// model = "claude-opus-4-5"
// created = "2026-07-30"
// modified = "2026-08-02"
// driver = "Isaac Clayton"

//! The buffer: one document, many collaborators.
//!
//! The buffer owns the authoritative [`AnnotatedString`] snapshot and a
//! version clock, and drives every registered collaborator from
//! dedicated threads. It has no thread of its own; it is a synchronized
//! data structure the collaborator loops rendezvous through.
//!
//! The update discipline is copy, mutate, commit:
//!
//! 1. Claim the exclusive `updating` slot and publish the raw command
//!    set to the listeners, all under the one buffer mutex.
//! 2. Copy the snapshot out, release the mutex, and integrate the
//!    commands against the copy. CRDT work never runs under the lock.
//! 3. Relock, install the copy, bump the version, and wake everyone.
//!
//! Readers therefore always see a whole snapshot, listeners see every
//! command set exactly once and strictly before the state that contains
//! it, and the version only moves forward.
//!
//! Pushes to a collaborator are debounced: after a change, the buffer
//! waits until the typist has been idle for the collaborator's
//! `push_delay_from_idle`, but never withholds a change longer than its
//! `push_delay_from_start`. A collaborator's very first notification
//! skips the debounce so everyone sees the initial state immediately.
//!
//! Shutdown is quiescence-gated: the destructor flips the shutdown flag,
//! then every collaborator gets a final look and must either respond
//! with edits (restarting the round) or declare it has none; once every
//! collaborator has declared, the blocked notification waits resolve to
//! a shutdown signal and the threads unwind cleanly.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Condvar;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::collab::AsyncCollaborator;
use crate::collab::CollabMeta;
use crate::collab::CommandCollaborator;
use crate::collab::EditNotification;
use crate::collab::EditResponse;
use crate::collab::SyncCollaborator;
use crate::crdt::command::CommandSet;
use crate::crdt::string::AnnotatedString;

/// Profile lines cover events at most this old.
const PROFILE_HORIZON: Duration = Duration::from_secs(5);

/// Control signal: the buffer is shutting down and the receiving loop
/// should unwind. Not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownSignal;

// =============================================================================
// Shared state
// =============================================================================

/// A registered collaborator, kept for its metadata and shutdown hook.
enum Member {
    Async(Arc<dyn AsyncCollaborator>),
    Command(Arc<dyn CommandCollaborator>),
    Sync(Arc<dyn SyncCollaborator>),
}

impl Member {
    fn meta(&self) -> &CollabMeta {
        return match self {
            Member::Async(c) => c.meta(),
            Member::Command(c) => c.meta(),
            Member::Sync(c) => c.meta(),
        };
    }

    fn shutdown(&self) {
        match self {
            Member::Async(c) => c.shutdown(),
            Member::Command(c) => c.shutdown(),
            Member::Sync(c) => c.shutdown(),
        }
    }
}

struct Listener {
    id: u64,
    on_commands: Box<dyn FnMut(&CommandSet) + Send>,
}

/// Everything behind the buffer mutex.
struct State {
    notification: EditNotification,
    version: u64,
    updating: bool,
    last_used: Instant,
    member_count: usize,
    done: FxHashSet<usize>,
    declared_no_edit: FxHashSet<usize>,
    listeners: Vec<Listener>,
    next_listener: u64,
}

impl State {
    /// Shutdown may complete: every member has declared it has no
    /// further edits.
    fn quiescent_shutdown(&self) -> bool {
        return self.notification.shutdown && self.declared_no_edit.len() == self.member_count;
    }

    /// Hand a command set to every listener, in registration order.
    fn publish(&mut self, commands: &CommandSet) {
        for listener in self.listeners.iter_mut() {
            (listener.on_commands)(commands);
        }
    }
}

struct Shared {
    name: String,
    mu: Mutex<State>,
    cv: Condvar,
}

impl Shared {
    /// Serialize a state mutation through the `updating` slot.
    ///
    /// Publishing happens under the lock at the head of the exclusive
    /// section, so command fan-out order equals commit order and a
    /// freshly registered listener can never miss or double-see a set.
    /// Integration runs on a private copy outside the lock.
    ///
    /// With `abort_on_shutdown`, observing the shutdown flag at
    /// slot-acquire time turns the whole call into a shutdown signal;
    /// collaborator-driven updates use this, the destructor's own flag
    /// write does not.
    fn update_state(
        &self,
        collab: Option<&CollabMeta>,
        become_used: bool,
        commands: Option<&CommandSet>,
        mutate: impl FnOnce(&mut EditNotification),
        abort_on_shutdown: bool,
    ) -> Result<(), ShutdownSignal> {
        let mut st = self.mu.lock();
        self.cv.wait_while(&mut st, |s| s.updating);
        if abort_on_shutdown && st.notification.shutdown {
            return Err(ShutdownSignal);
        }
        st.updating = true;
        if let Some(meta) = collab {
            meta.mark_change();
        }
        if let Some(commands) = commands {
            if !commands.is_empty() {
                st.publish(commands);
            }
        }
        let mut staged = st.notification.clone();
        drop(st);

        if let Some(commands) = commands {
            staged.content = staged.content.integrate(commands);
        }
        mutate(&mut staged);

        let mut st = self.mu.lock();
        st.updating = false;
        st.version += 1;
        // Any new state resets quiescence: everyone still alive gets a
        // fresh chance to react before shutdown can complete.
        st.declared_no_edit = st.done.clone();
        st.notification = staged;
        if become_used {
            st.last_used = Instant::now();
        }
        self.cv.notify_all();
        return Ok(());
    }

    /// Block until there is something new for this member, debounce it,
    /// and return a snapshot. Returns a shutdown signal when the member
    /// is retired or the buffer reaches quiescent shutdown with nothing
    /// newer to deliver.
    fn next_notification(
        &self,
        member: usize,
        meta: &CollabMeta,
        last_processed: &mut u64,
    ) -> Result<EditNotification, ShutdownSignal> {
        let mut st = self.mu.lock();
        self.cv.wait_while(&mut st, |s| {
            s.version == *last_processed && !s.quiescent_shutdown() && !s.done.contains(&member)
        });
        if st.done.contains(&member) {
            return Err(ShutdownSignal);
        }
        if st.quiescent_shutdown() && st.version == *last_processed {
            st.done.insert(member);
            st.declared_no_edit.insert(member);
            self.cv.notify_all();
            return Err(ShutdownSignal);
        }
        if *last_processed != 0 {
            // Debounce: hold the push until the typist pauses, but not
            // past the from-start deadline. Another edit during the wait
            // moves `last_used` and restarts the idle clock.
            let first_saw_change = Instant::now();
            while !st.notification.shutdown {
                let idle_started = st.last_used;
                let now = Instant::now();
                let from_idle = meta
                    .push_delay_from_idle()
                    .saturating_sub(now.saturating_duration_since(idle_started));
                let from_start = meta
                    .push_delay_from_start()
                    .saturating_sub(now.saturating_duration_since(first_saw_change));
                let wait = from_idle.min(from_start);
                if wait.is_zero() {
                    break;
                }
                self.cv
                    .wait_while_for(&mut st, |s| !s.notification.shutdown, wait);
                if st.notification.shutdown || st.last_used == idle_started {
                    break;
                }
            }
        }
        *last_processed = st.version;
        let notification = st.notification.clone();
        drop(st);
        meta.mark_request();
        return Ok(notification);
    }

    /// Absorb a collaborator's response: integrate its updates, or
    /// record its declaration that it has none.
    fn sink_response(
        &self,
        member: usize,
        meta: &CollabMeta,
        response: EditResponse,
    ) -> Result<(), ShutdownSignal> {
        meta.mark_response();
        let has_update = response.become_loaded
            || response.referenced_file_changed
            || !response.content_updates.is_empty();
        let mut outcome = Ok(());
        if has_update {
            let commands = response.content_updates;
            outcome = self.update_state(
                Some(meta),
                response.become_used,
                Some(&commands),
                |staged| {
                    if response.become_loaded {
                        staged.fully_loaded = true;
                    }
                    if response.referenced_file_changed {
                        staged.referenced_file_version += 1;
                    }
                },
                true,
            );
        } else {
            let mut st = self.mu.lock();
            if response.become_used {
                st.last_used = Instant::now();
            }
            st.declared_no_edit.insert(member);
            if st.notification.shutdown {
                outcome = Err(ShutdownSignal);
            }
            self.cv.notify_all();
        }
        if response.done {
            self.retire(member);
            return Err(ShutdownSignal);
        }
        return outcome;
    }

    /// Mark a member terminal. Idempotent; counts toward quiescence.
    fn retire(&self, member: usize) {
        let mut st = self.mu.lock();
        st.done.insert(member);
        st.declared_no_edit.insert(member);
        self.cv.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        return self.mu.lock().notification.shutdown;
    }

    fn add_listener(&self, on_commands: Box<dyn FnMut(&CommandSet) + Send>) -> u64 {
        let mut st = self.mu.lock();
        self.cv.wait_while(&mut st, |s| s.updating);
        let id = st.next_listener;
        st.next_listener += 1;
        st.listeners.push(Listener { id, on_commands });
        return id;
    }

    fn remove_listener(&self, id: u64) {
        self.mu.lock().listeners.retain(|l| l.id != id);
    }
}

// =============================================================================
// Collaborator loops
// =============================================================================

fn run_push_loop(shared: &Shared, member: usize, c: &dyn AsyncCollaborator) {
    let mut last_processed = 0u64;
    loop {
        let notification = match shared.next_notification(member, c.meta(), &mut last_processed) {
            Ok(notification) => notification,
            Err(ShutdownSignal) => return,
        };
        if let Err(err) = c.push(notification) {
            tracing::warn!("collaborator {} push failed: {err}", c.meta().name());
            return;
        }
    }
}

fn run_pull_loop(shared: &Shared, member: usize, c: &dyn AsyncCollaborator) {
    loop {
        let response = match c.pull() {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!("collaborator {} pull failed: {err}", c.meta().name());
                return;
            }
        };
        if shared.sink_response(member, c.meta(), response).is_err() {
            return;
        }
    }
}

fn run_sync_loop(shared: &Shared, member: usize, c: &dyn SyncCollaborator) {
    let mut last_processed = 0u64;
    loop {
        let notification = match shared.next_notification(member, c.meta(), &mut last_processed) {
            Ok(notification) => notification,
            Err(ShutdownSignal) => return,
        };
        let response = match c.edit(notification) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!("collaborator {} edit failed: {err}", c.meta().name());
                return;
            }
        };
        if shared.sink_response(member, c.meta(), response).is_err() {
            return;
        }
    }
}

fn run_command_loop(shared: &Shared, member: usize, c: &Arc<dyn CommandCollaborator>) {
    // Mirror the published stream into the collaborator. A forwarding
    // failure surfaces on the pull side, where the member retires.
    let forward = c.clone();
    let listener = shared.add_listener(Box::new(move |commands| {
        let _ = forward.push(commands);
    }));
    loop {
        let commands = match c.pull() {
            Ok(commands) => commands,
            Err(err) => {
                tracing::warn!("collaborator {} pull failed: {err}", c.meta().name());
                break;
            }
        };
        if commands.is_empty() {
            if shared.is_shutdown() {
                break;
            }
            continue;
        }
        // Command pulls are edits from an editor-shaped collaborator, so
        // they count as user activity.
        if shared
            .update_state(Some(c.meta()), true, Some(&commands), |_| {}, true)
            .is_err()
        {
            break;
        }
    }
    shared.remove_listener(listener);
}

// =============================================================================
// Buffer
// =============================================================================

/// The coordinator for one document.
///
/// Collaborator registration spawns the loop threads; dropping the
/// buffer runs the quiescent shutdown protocol and joins every one of
/// them. Listener handles borrow the buffer, so the borrow checker
/// enforces that the buffer outlives its listeners.
pub struct Buffer {
    shared: Arc<Shared>,
    members: Vec<Member>,
    threads: Vec<JoinHandle<()>>,
}

impl Buffer {
    /// Create a buffer for the document called `name`.
    pub fn new(name: impl Into<String>) -> Buffer {
        let state = State {
            notification: EditNotification::new(),
            // Version 1 against a fresh cursor of 0: the first
            // notification per collaborator fires immediately.
            version: 1,
            updating: false,
            last_used: Instant::now(),
            member_count: 0,
            done: FxHashSet::default(),
            declared_no_edit: FxHashSet::default(),
            listeners: Vec::new(),
            next_listener: 0,
        };
        return Buffer {
            shared: Arc::new(Shared {
                name: name.into(),
                mu: Mutex::new(state),
                cv: Condvar::new(),
            }),
            members: Vec::new(),
            threads: Vec::new(),
        };
    }

    /// The document name.
    pub fn name(&self) -> &str {
        return &self.shared.name;
    }

    /// The current version. Monotonic: it only moves forward.
    pub fn version(&self) -> u64 {
        return self.shared.mu.lock().version;
    }

    fn register(&self) -> usize {
        let mut st = self.shared.mu.lock();
        let member = st.member_count;
        st.member_count += 1;
        return member;
    }

    /// Register an async push/pull collaborator and spawn its thread
    /// pair.
    pub fn add_collaborator(&mut self, collaborator: impl AsyncCollaborator + 'static) {
        let collaborator: Arc<dyn AsyncCollaborator> = Arc::new(collaborator);
        let member = self.register();
        self.members.push(Member::Async(collaborator.clone()));

        let shared = self.shared.clone();
        let pusher = collaborator.clone();
        self.threads.push(std::thread::spawn(move || {
            run_push_loop(&shared, member, pusher.as_ref());
            shared.retire(member);
        }));

        let shared = self.shared.clone();
        self.threads.push(std::thread::spawn(move || {
            run_pull_loop(&shared, member, collaborator.as_ref());
            shared.retire(member);
        }));
    }

    /// Register a raw-command collaborator and spawn its thread.
    pub fn add_command_collaborator(&mut self, collaborator: impl CommandCollaborator + 'static) {
        let collaborator: Arc<dyn CommandCollaborator> = Arc::new(collaborator);
        let member = self.register();
        self.members.push(Member::Command(collaborator.clone()));

        let shared = self.shared.clone();
        self.threads.push(std::thread::spawn(move || {
            run_command_loop(&shared, member, &collaborator);
            shared.retire(member);
        }));
    }

    /// Register a synchronous collaborator and spawn its thread.
    pub fn add_sync_collaborator(&mut self, collaborator: impl SyncCollaborator + 'static) {
        let collaborator: Arc<dyn SyncCollaborator> = Arc::new(collaborator);
        let member = self.register();
        self.members.push(Member::Sync(collaborator.clone()));

        let shared = self.shared.clone();
        self.threads.push(std::thread::spawn(move || {
            run_sync_loop(&shared, member, collaborator.as_ref());
            shared.retire(member);
        }));
    }

    /// Publish a command set from outside the collaborator protocol and
    /// integrate it. External pushes count as typist activity.
    pub fn push_changes(&self, commands: &CommandSet) {
        if commands.is_empty() {
            return;
        }
        let _ = self
            .shared
            .update_state(None, true, Some(commands), |_| {}, false);
    }

    /// A copy of the current document.
    pub fn content_snapshot(&self) -> AnnotatedString {
        return self.shared.mu.lock().notification.content.clone();
    }

    /// Subscribe to the raw command stream.
    ///
    /// `initial` runs once, under the buffer lock, with the current
    /// document; `update` then receives every published command set, in
    /// publication order, also under the lock. Together they form a
    /// gapless mirror. Neither callback may call back into the buffer.
    pub fn listen<F, G>(&self, initial: F, update: G) -> BufferListener<'_>
    where
        F: FnOnce(&AnnotatedString),
        G: FnMut(&CommandSet) + Send + 'static,
    {
        let mut st = self.shared.mu.lock();
        self.shared.cv.wait_while(&mut st, |s| s.updating);
        initial(&st.notification.content);
        let id = st.next_listener;
        st.next_listener += 1;
        st.listeners.push(Listener {
            id,
            on_commands: Box::new(update),
        });
        drop(st);
        return BufferListener {
            shared: &self.shared,
            id,
        };
    }

    /// One line per recent collaborator protocol event:
    /// `"<name>:<collab>:<chg|rqst|rsp>: <timestamp> (<age> ago)"`.
    pub fn profile_data(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for member in &self.members {
            member
                .meta()
                .profile_lines(&self.shared.name, PROFILE_HORIZON, &mut lines);
        }
        return lines;
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let _ = self
            .shared
            .update_state(None, false, None, |staged| staged.shutdown = true, false);
        for member in &self.members {
            member.shutdown();
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

/// A live subscription to the command stream; dropping it unsubscribes.
pub struct BufferListener<'buf> {
    shared: &'buf Shared,
    id: u64,
}

impl Drop for BufferListener<'_> {
    fn drop(&mut self) {
        self.shared.remove_listener(self.id);
    }
}
