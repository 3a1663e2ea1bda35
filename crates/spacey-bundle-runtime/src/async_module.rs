// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Async module coordination
//!
//! Modules with top-level suspension points, or with dependencies that have
//! them, are wrapped by [`begin_async_module`]. Their exports become an
//! [`AsyncModuleValue`]: a deferred value composed with three capabilities
//! (exports snapshot, error snapshot, queue registration).
//!
//! Each suspending module owns a [`Queue`]. A module awaiting its
//! dependencies registers one shared [`Continuation`] against every queue its
//! dependencies expose; the continuation fires once all of them resolved.
//! Cycles settle because:
//!
//! - a module's queue is not waitable while its body's synchronous segment
//!   runs, so a dependency instantiated from inside that segment never waits
//!   on the module that imported it;
//! - a dependency exposes the queues it is itself waiting on, and the caller
//!   skips its own queue among them;
//! - registering against a queue that already resolved is a no-op, so no
//!   continuation waits on a queue that can never resolve again.
//!
//! Failures are recorded, never raised at registration: a dependency's error
//! surfaces when [`DependencyResults::get`] reads it.

use crate::deferred::{Deferred, Latch};
use crate::error::{Result, RuntimeError};
use crate::module::ModuleRef;
use crate::value::{ObjectRef, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

/// Unique ID generator for queues
static QUEUE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Queue status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// The owning body's synchronous segment is still running; nothing may
    /// register yet
    Unknown,
    /// Waiting for the owner to complete
    Unresolved,
    /// Owner completed; terminal
    Resolved,
}

struct QueueState {
    status: QueueStatus,
    continuations: Vec<Arc<Continuation>>,
}

/// Continuations waiting on one module's settlement
#[derive(Clone)]
pub struct Queue {
    id: u64,
    state: Arc<Mutex<QueueState>>,
}

impl Queue {
    /// Create an unresolved queue
    pub fn new() -> Self {
        Self::with_status(QueueStatus::Unresolved)
    }

    /// Create a queue in the given status
    pub fn with_status(status: QueueStatus) -> Self {
        Self {
            id: QUEUE_ID_COUNTER.fetch_add(1, Ordering::SeqCst),
            state: Arc::new(Mutex::new(QueueState {
                status,
                continuations: Vec::new(),
            })),
        }
    }

    /// Unique ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current status
    pub fn status(&self) -> QueueStatus {
        self.state.lock().status
    }

    /// Whether the queue resolved
    pub fn is_resolved(&self) -> bool {
        self.status() == QueueStatus::Resolved
    }

    /// Leave the `Unknown` status; a resolved queue stays resolved.
    fn mark_waitable(&self) {
        let mut state = self.state.lock();
        if state.status == QueueStatus::Unknown {
            state.status = QueueStatus::Unresolved;
        }
    }

    /// Register `continuation` if the queue is unresolved
    ///
    /// Returns false, without touching the continuation's count, for queues
    /// that are resolved or not waitable yet.
    pub fn register(&self, continuation: &Arc<Continuation>) -> bool {
        let mut state = self.state.lock();
        if state.status != QueueStatus::Unresolved {
            return false;
        }
        // Counted under the queue lock so `resolve` can never decrement
        // before this increment.
        continuation.increment();
        state.continuations.push(Arc::clone(continuation));
        true
    }

    /// Resolve the queue
    ///
    /// The first call decrements every registered continuation, then fires
    /// each one whose count reached zero. Later calls are no-ops and return
    /// false.
    pub fn resolve(&self) -> bool {
        let continuations = {
            let mut state = self.state.lock();
            if state.status == QueueStatus::Resolved {
                return false;
            }
            state.status = QueueStatus::Resolved;
            std::mem::take(&mut state.continuations)
        };
        tracing::debug!(
            "Queue {} resolved with {} continuation(s)",
            self.id,
            continuations.len()
        );

        for continuation in &continuations {
            continuation.decrement();
        }
        for continuation in &continuations {
            continuation.fire_if_ready();
        }
        true
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Queue")
            .field("id", &self.id)
            .field("status", &state.status)
            .field("continuations", &state.continuations.len())
            .finish()
    }
}

/// Resolve `queue`; see [`Queue::resolve`]
pub fn resolve_queue(queue: &Queue) -> bool {
    queue.resolve()
}

struct ContinuationState {
    pending: usize,
    fired: bool,
    callback: Option<Box<dyn FnOnce() + Send>>,
}

/// Callback waiting on one or more queues
///
/// A new continuation holds one registration guard so that queues resolving
/// while registration is still in progress cannot fire it early. Release the
/// guard with [`Continuation::seal`] once every queue has been offered.
pub struct Continuation {
    state: Mutex<ContinuationState>,
}

impl Continuation {
    /// Create a continuation holding its registration guard
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ContinuationState {
                pending: 1,
                fired: false,
                callback: Some(Box::new(callback)),
            }),
        })
    }

    /// Queues still outstanding (plus the guard while unsealed)
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    /// Whether the continuation has fired or was consumed by `seal`
    pub fn has_fired(&self) -> bool {
        self.state.lock().fired
    }

    /// Release the registration guard
    ///
    /// Returns true when no queue is outstanding. The continuation is then
    /// consumed without running its callback: the caller continues
    /// synchronously instead.
    pub fn seal(&self) -> bool {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 && !state.fired {
            state.fired = true;
            state.callback = None;
            return true;
        }
        false
    }

    fn increment(&self) {
        self.state.lock().pending += 1;
    }

    fn decrement(&self) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
    }

    fn fire_if_ready(&self) -> bool {
        let callback = {
            let mut state = self.state.lock();
            if state.pending != 0 || state.fired {
                return false;
            }
            state.fired = true;
            state.callback.take()
        };
        tracing::trace!("Continuation fired");
        if let Some(callback) = callback {
            callback();
        }
        true
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Continuation")
            .field("pending", &state.pending)
            .field("fired", &state.fired)
            .finish()
    }
}

/// Capabilities every normalized dependency exposes
pub trait AsyncCapable: Send + Sync {
    /// Exports as of now; valid before settlement
    fn exports_snapshot(&self) -> Value;

    /// Failure captured at settlement, if any
    fn error_snapshot(&self) -> Option<RuntimeError>;

    /// Offer every queue a waiter should register against
    fn visit_queues(&self, visitor: &mut dyn FnMut(&Queue));

    /// Replace the exports snapshot; a no-op for read-only capabilities
    fn set_exports_snapshot(&self, _value: Value) {}
}

/// Capabilities of a module wrapped by [`begin_async_module`]
struct AsyncModuleState {
    queue: Option<Queue>,
    dep_queues: Mutex<Vec<Queue>>,
    exports: RwLock<Value>,
    error: RwLock<Option<RuntimeError>>,
    completed: AtomicBool,
}

impl AsyncModuleState {
    fn new(queue: Option<Queue>, exports: Value) -> Self {
        Self {
            queue,
            dep_queues: Mutex::new(Vec::new()),
            exports: RwLock::new(exports),
            error: RwLock::new(None),
            completed: AtomicBool::new(false),
        }
    }

    fn own_queue_id(&self) -> Option<u64> {
        self.queue.as_ref().map(Queue::id)
    }

    fn record_dep_queue(&self, queue: &Queue) {
        let mut dep_queues = self.dep_queues.lock();
        if !dep_queues.iter().any(|q| q.id() == queue.id()) {
            dep_queues.push(queue.clone());
        }
    }
}

impl AsyncCapable for AsyncModuleState {
    fn exports_snapshot(&self) -> Value {
        self.exports.read().clone()
    }

    fn error_snapshot(&self) -> Option<RuntimeError> {
        self.error.read().clone()
    }

    fn visit_queues(&self, visitor: &mut dyn FnMut(&Queue)) {
        if let Some(queue) = &self.queue {
            visitor(queue);
        }
        // The visitor may record into this very list.
        let dep_queues = self.dep_queues.lock().clone();
        for queue in &dep_queues {
            visitor(queue);
        }
    }

    fn set_exports_snapshot(&self, value: Value) {
        let mut exports = self.exports.write();
        if self.completed.load(Ordering::SeqCst) {
            tracing::warn!("Ignoring exports assignment after async module settled");
            return;
        }
        *exports = value;
    }
}

/// A plain deferred dependency, tracked through a single-shot queue
struct DeferredDependency {
    queue: Queue,
    exports: RwLock<Value>,
    error: RwLock<Option<RuntimeError>>,
}

impl DeferredDependency {
    fn watch(deferred: &Deferred) -> Arc<Self> {
        let dependency = Arc::new(Self {
            queue: Queue::new(),
            exports: RwLock::new(Value::Object(ObjectRef::null_prototype())),
            error: RwLock::new(None),
        });
        let target = Arc::clone(&dependency);
        deferred.then(move |settlement| {
            match settlement {
                Ok(value) => *target.exports.write() = value,
                Err(err) => *target.error.write() = Some(err),
            }
            target.queue.resolve();
        });
        dependency
    }
}

impl AsyncCapable for DeferredDependency {
    fn exports_snapshot(&self) -> Value {
        self.exports.read().clone()
    }

    fn error_snapshot(&self) -> Option<RuntimeError> {
        self.error.read().clone()
    }

    fn visit_queues(&self, visitor: &mut dyn FnMut(&Queue)) {
        visitor(&self.queue);
    }
}

/// A synchronous dependency; never causes suspension
struct SettledDependency {
    value: Value,
}

impl AsyncCapable for SettledDependency {
    fn exports_snapshot(&self) -> Value {
        self.value.clone()
    }

    fn error_snapshot(&self) -> Option<RuntimeError> {
        None
    }

    fn visit_queues(&self, _visitor: &mut dyn FnMut(&Queue)) {}
}

/// Deferred value composed with async module capabilities
#[derive(Clone)]
pub struct AsyncModuleValue {
    deferred: Deferred,
    capabilities: Arc<dyn AsyncCapable>,
}

impl AsyncModuleValue {
    /// Compose a deferred value with capabilities
    pub fn new(deferred: Deferred, capabilities: Arc<dyn AsyncCapable>) -> Self {
        Self {
            deferred,
            capabilities,
        }
    }

    /// The underlying deferred value
    pub fn deferred(&self) -> &Deferred {
        &self.deferred
    }

    /// The capabilities
    pub fn capabilities(&self) -> Arc<dyn AsyncCapable> {
        Arc::clone(&self.capabilities)
    }

    /// Exports as of now
    pub fn exports_snapshot(&self) -> Value {
        self.capabilities.exports_snapshot()
    }

    /// Captured failure, if any
    pub fn error_snapshot(&self) -> Option<RuntimeError> {
        self.capabilities.error_snapshot()
    }

    /// Offer every queue a waiter should register against
    pub fn visit_queues(&self, visitor: &mut dyn FnMut(&Queue)) {
        self.capabilities.visit_queues(visitor);
    }

    /// Derive a value settling with `f` applied, keeping these capabilities
    pub fn map<F>(&self, f: F) -> Self
    where
        F: FnOnce(Value) -> Value + Send + 'static,
    {
        Self {
            deferred: self.deferred.map(f),
            capabilities: Arc::clone(&self.capabilities),
        }
    }

    pub(crate) fn set_exports_snapshot(&self, value: Value) {
        self.capabilities.set_exports_snapshot(value);
    }
}

impl fmt::Debug for AsyncModuleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncModuleValue")
            .field("deferred", &self.deferred)
            .finish()
    }
}

/// Derive from a possibly deferred exports value
///
/// Deferred values map on settlement (async capabilities carried over);
/// anything else maps immediately.
pub fn map_exports<F>(value: &Value, f: F) -> Value
where
    F: FnOnce(Value) -> Value + Send + 'static,
{
    match value {
        Value::AsyncModule(module) => Value::AsyncModule(module.map(f)),
        Value::Deferred(deferred) => Value::Deferred(deferred.map(f)),
        other => f(other.clone()),
    }
}

/// Give any dependency value the async capabilities
///
/// Async module values are used as they are, plain deferred values get a
/// fresh single-shot queue resolved on settlement, and everything else is a
/// settled snapshot with nothing to wait on.
pub fn normalize_dependency(dep: &Value) -> Arc<dyn AsyncCapable> {
    match dep {
        Value::AsyncModule(module) => {
            module.deferred().mark_handled();
            module.capabilities()
        }
        Value::Deferred(deferred) => DeferredDependency::watch(deferred),
        other => Arc::new(SettledDependency {
            value: other.clone(),
        }),
    }
}

/// Dependency exports, read lazily
#[derive(Clone)]
pub struct DependencyResults {
    deps: Arc<[Arc<dyn AsyncCapable>]>,
}

impl DependencyResults {
    fn new(deps: Vec<Arc<dyn AsyncCapable>>) -> Self {
        Self { deps: deps.into() }
    }

    /// Number of dependencies
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    /// Whether there are no dependencies
    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Read one dependency's exports, re-raising its captured failure
    ///
    /// Indexes past the end read as undefined.
    pub fn get(&self, index: usize) -> Result<Value> {
        let Some(dep) = self.deps.get(index) else {
            return Ok(Value::Undefined);
        };
        match dep.error_snapshot() {
            Some(err) => Err(err),
            None => Ok(dep.exports_snapshot()),
        }
    }

    /// Read every dependency, failing on the first captured failure
    pub fn values(&self) -> Result<Vec<Value>> {
        (0..self.deps.len()).map(|index| self.get(index)).collect()
    }
}

impl fmt::Debug for DependencyResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyResults")
            .field("len", &self.deps.len())
            .finish()
    }
}

/// Marker returned while dependencies are still settling
#[derive(Clone)]
pub struct PendingDependencies {
    latch: Latch<DependencyResults>,
    continuation: Arc<Continuation>,
}

impl PendingDependencies {
    /// Queues still outstanding
    pub fn pending_count(&self) -> usize {
        self.continuation.pending()
    }

    /// Whether every dependency queue resolved
    pub fn is_ready(&self) -> bool {
        self.latch.is_set()
    }

    /// The results, if ready
    pub fn try_results(&self) -> Option<DependencyResults> {
        self.latch.peek()
    }

    /// Run `f` once ready; immediately if already ready
    pub fn on_ready(&self, f: impl FnOnce(DependencyResults) + Send + 'static) {
        self.latch.on_settled(f);
    }
}

impl Future for PendingDependencies {
    type Output = DependencyResults;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.latch.poll_settled(cx)
    }
}

impl fmt::Debug for PendingDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDependencies")
            .field("continuation", &self.continuation)
            .finish()
    }
}

/// Outcome of [`AsyncModuleHandle::await_dependencies`]
#[derive(Debug, Clone)]
pub enum DependencyWait {
    /// Every dependency had settled; read the results right away
    Ready(DependencyResults),
    /// Wait on the marker before reading results
    Pending(PendingDependencies),
}

impl DependencyWait {
    /// Whether the caller has to wait
    pub fn is_pending(&self) -> bool {
        match self {
            DependencyWait::Ready(_) => false,
            DependencyWait::Pending(pending) => !pending.is_ready(),
        }
    }

    /// The results, if available without waiting
    pub fn try_results(&self) -> Option<DependencyResults> {
        match self {
            DependencyWait::Ready(results) => Some(results.clone()),
            DependencyWait::Pending(pending) => pending.try_results(),
        }
    }

    /// Continue with the results, synchronously when they are ready
    pub fn then(self, f: impl FnOnce(DependencyResults) + Send + 'static) {
        match self {
            DependencyWait::Ready(results) => f(results),
            DependencyWait::Pending(pending) => pending.on_ready(f),
        }
    }

    /// Wait for the results
    pub async fn resolved(self) -> DependencyResults {
        match self {
            DependencyWait::Ready(results) => results,
            DependencyWait::Pending(pending) => pending.await,
        }
    }
}

/// Capability handed to an async module body
#[derive(Clone)]
pub struct AsyncModuleHandle {
    module: ModuleRef,
    deferred: Deferred,
    state: Arc<AsyncModuleState>,
    trace_unhandled: bool,
}

impl AsyncModuleHandle {
    /// The module being initialized
    pub fn module(&self) -> &ModuleRef {
        &self.module
    }

    /// The module's own queue, if it has a suspension point
    pub fn queue(&self) -> Option<&Queue> {
        self.state.queue.as_ref()
    }

    /// Whether `complete` has been called
    pub fn is_completed(&self) -> bool {
        self.state.completed.load(Ordering::SeqCst)
    }

    /// Wait for `deps` to settle
    ///
    /// Registers one continuation against every queue the dependencies
    /// expose, skipping this module's own queue, queues already offered in
    /// this call, and queues that cannot be waited on. If nothing was
    /// registered the results are returned synchronously.
    pub fn await_dependencies(&self, deps: Vec<Value>) -> DependencyWait {
        let deps: Vec<Arc<dyn AsyncCapable>> = deps.iter().map(normalize_dependency).collect();
        let results = DependencyResults::new(deps.clone());

        let latch = Latch::new();
        let continuation = Continuation::new({
            let latch = latch.clone();
            let results = results.clone();
            move || {
                latch.settle(results);
            }
        });

        let own_queue = self.state.own_queue_id();
        let mut offered = HashSet::new();
        for dep in &deps {
            dep.visit_queues(&mut |queue| {
                if Some(queue.id()) == own_queue || !offered.insert(queue.id()) {
                    return;
                }
                self.state.record_dep_queue(queue);
                if queue.register(&continuation) {
                    tracing::trace!("Registered on queue {}", queue.id());
                }
            });
        }

        if continuation.seal() {
            DependencyWait::Ready(results)
        } else {
            tracing::debug!(
                "Module {} waiting on {} queue(s)",
                self.module.read().id,
                continuation.pending()
            );
            DependencyWait::Pending(PendingDependencies {
                latch,
                continuation,
            })
        }
    }

    /// Terminal callback of the body
    ///
    /// Settles the module's deferred value and resolves its queue. A failure
    /// is recorded on the module and as the error snapshot; waiters are
    /// released either way. Returns false if the module already completed.
    pub fn complete(&self, result: Result<()>) -> bool {
        let id = self.module.read().id.clone();
        // Freezes the snapshot: assignments check `completed` under this lock.
        let snapshot = {
            let exports = self.state.exports.write();
            if self.state.completed.swap(true, Ordering::SeqCst) {
                tracing::warn!("Async module {} completed more than once", id);
                return false;
            }
            exports.clone()
        };

        match result {
            Ok(()) => {
                tracing::debug!("Async module {} settled", id);
                self.deferred.resolve(snapshot);
            }
            Err(err) => {
                tracing::debug!("Async module {} failed: {}", id, err);
                *self.state.error.write() = Some(err.clone());
                self.module.write().error = Some(err.clone());
                if self.trace_unhandled && !self.deferred.is_observed() {
                    tracing::warn!("Async module {} failed with no observer: {}", id, err);
                }
                self.deferred.reject(err);
            }
        }

        if let Some(queue) = &self.state.queue {
            queue.resolve();
        }
        true
    }
}

impl fmt::Debug for AsyncModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncModuleHandle")
            .field("module", &self.module.read().id)
            .field("queue", &self.state.queue)
            .finish()
    }
}

/// Wrap `module` as an async module and run `body`
///
/// The exports become an [`AsyncModuleValue`] whose snapshot starts as the
/// current (possibly incomplete) exports. With `has_suspension_point`, the
/// module gets a queue that turns waitable once `body`'s synchronous segment
/// returns, unless `body` already completed.
pub fn begin_async_module<F>(
    module: &ModuleRef,
    body: F,
    has_suspension_point: bool,
    trace_unhandled: bool,
) -> AsyncModuleValue
where
    F: FnOnce(AsyncModuleHandle),
{
    let queue = has_suspension_point.then(|| Queue::with_status(QueueStatus::Unknown));
    let deferred = Deferred::pending();
    let current = module.read().exports();
    let state = Arc::new(AsyncModuleState::new(queue.clone(), current));
    let value = AsyncModuleValue::new(deferred.clone(), Arc::clone(&state) as Arc<dyn AsyncCapable>);
    module.write().set_exports(Value::AsyncModule(value.clone()));

    tracing::debug!(
        "Module {} wrapped as async module (suspends: {})",
        module.read().id,
        has_suspension_point
    );

    body(AsyncModuleHandle {
        module: Arc::clone(module),
        deferred,
        state,
        trace_unhandled,
    });

    if let Some(queue) = &queue {
        queue.mark_waitable();
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Module, ModuleId};
    use std::sync::atomic::AtomicUsize;

    fn new_module(id: &str) -> ModuleRef {
        let exports = ObjectRef::null_prototype();
        Module::new(ModuleId::from(id), Value::Object(exports)).into_ref()
    }

    fn counting_continuation(calls: &Arc<AtomicUsize>) -> Arc<Continuation> {
        let calls = Arc::clone(calls);
        Continuation::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_resolve_queue_twice_fires_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let queue = Queue::new();
        let continuation = counting_continuation(&calls);
        assert!(queue.register(&continuation));
        assert!(!continuation.seal());

        assert!(resolve_queue(&queue));
        assert!(!resolve_queue(&queue));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(continuation.has_fired());
    }

    #[test]
    fn test_continuation_waits_for_every_queue() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = Queue::new();
        let second = Queue::new();
        let continuation = counting_continuation(&calls);
        first.register(&continuation);
        second.register(&continuation);
        continuation.seal();
        assert_eq!(continuation.pending(), 2);

        first.resolve();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        second.resolve();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registration_skips_resolved_and_unknown_queues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolved = Queue::new();
        resolved.resolve();
        let unknown = Queue::with_status(QueueStatus::Unknown);
        let continuation = counting_continuation(&calls);

        assert!(!resolved.register(&continuation));
        assert!(!unknown.register(&continuation));
        assert!(continuation.seal());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_guard_prevents_early_fire() {
        let calls = Arc::new(AtomicUsize::new(0));
        let first = Queue::new();
        let second = Queue::new();
        let continuation = counting_continuation(&calls);
        first.register(&continuation);
        first.resolve();
        // Still registering; must not fire yet.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        second.register(&continuation);
        assert!(!continuation.seal());
        second.resolve();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_queue_batch_fires_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let queue = Queue::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            let continuation = Continuation::new(move || order.lock().push(i));
            queue.register(&continuation);
            continuation.seal();
        }
        queue.resolve();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_normalize_plain_value() {
        let dep = normalize_dependency(&Value::from(5));
        assert_eq!(dep.exports_snapshot(), Value::from(5));
        assert!(dep.error_snapshot().is_none());
        let mut visited = 0;
        dep.visit_queues(&mut |_| visited += 1);
        assert_eq!(visited, 0);
    }

    #[test]
    fn test_normalize_plain_deferred() {
        let deferred = Deferred::pending();
        let dep = normalize_dependency(&Value::Deferred(deferred.clone()));
        let mut queues = Vec::new();
        dep.visit_queues(&mut |q| queues.push(q.clone()));
        assert_eq!(queues.len(), 1);
        assert!(!queues[0].is_resolved());

        deferred.resolve(Value::from("ready"));
        assert!(queues[0].is_resolved());
        assert_eq!(dep.exports_snapshot(), Value::from("ready"));
    }

    #[test]
    fn test_normalize_rejected_deferred() {
        let deferred = Deferred::pending();
        let dep = normalize_dependency(&Value::Deferred(deferred.clone()));
        deferred.reject(RuntimeError::thrown("nope"));
        assert_eq!(dep.error_snapshot(), Some(RuntimeError::thrown("nope")));
    }

    #[test]
    fn test_all_settled_returns_synchronously() {
        let module = new_module("a");
        let mut wait = None;
        begin_async_module(
            &module,
            |handle| {
                wait = Some(handle.await_dependencies(vec![
                    Value::from(1),
                    Value::Deferred(Deferred::resolved(Value::from(2))),
                ]));
                handle.complete(Ok(()));
            },
            true,
            false,
        );
        let wait = wait.unwrap();
        assert!(matches!(wait, DependencyWait::Ready(_)));
        let values = wait.try_results().unwrap().values().unwrap();
        assert_eq!(values, vec![Value::from(1), Value::from(2)]);
    }

    #[test]
    fn test_pending_dependency_suspends() {
        let module = new_module("a");
        let gate = Deferred::pending();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let dep = Value::Deferred(gate.clone());
        let exports = begin_async_module(
            &module,
            move |handle| {
                let wait = handle.await_dependencies(vec![dep]);
                assert!(wait.is_pending());
                let done = handle.clone();
                wait.then(move |results| {
                    *sink.lock() = Some(results.get(0));
                    done.complete(Ok(()));
                });
            },
            true,
            false,
        );

        assert!(exports.deferred().is_pending());
        gate.resolve(Value::from("late"));
        assert_eq!(*seen.lock(), Some(Ok(Value::from("late"))));
        assert!(exports.deferred().is_settled());
    }

    #[test]
    fn test_failure_is_lazy() {
        let failing = new_module("failing");
        let handle_slot = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&handle_slot);
        let failing_exports =
            begin_async_module(&failing, move |handle| *slot.lock() = Some(handle), true, false);

        let consumer = new_module("consumer");
        let dep = Value::AsyncModule(failing_exports.clone());
        let mut wait = None;
        begin_async_module(
            &consumer,
            |handle| wait = Some(handle.await_dependencies(vec![dep])),
            true,
            false,
        );
        let wait = wait.unwrap();
        assert!(wait.is_pending());

        let failing_handle: AsyncModuleHandle = handle_slot.lock().take().unwrap();
        failing_handle.complete(Err(RuntimeError::thrown("broken")));

        let results = wait.try_results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results.get(0), Err(RuntimeError::thrown("broken")));
        assert_eq!(failing_exports.error_snapshot(), Some(RuntimeError::thrown("broken")));
        assert_eq!(failing.read().error, Some(RuntimeError::thrown("broken")));
    }

    #[test]
    fn test_complete_twice_is_rejected() {
        let module = new_module("a");
        let handle = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&handle);
        begin_async_module(&module, move |h| *slot.lock() = Some(h), true, false);
        let handle = handle.lock().take().unwrap();
        assert!(handle.complete(Ok(())));
        assert!(!handle.complete(Err(RuntimeError::thrown("late"))));
        assert!(module.read().error.is_none());
    }

    #[test]
    fn test_queue_not_waitable_during_sync_segment() {
        let module = new_module("a");
        let status = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&status);
        let exports = begin_async_module(
            &module,
            move |handle| *slot.lock() = handle.queue().map(Queue::status),
            true,
            false,
        );
        assert_eq!(*status.lock(), Some(QueueStatus::Unknown));
        let mut after = Vec::new();
        exports.visit_queues(&mut |q| after.push(q.status()));
        assert_eq!(after, vec![QueueStatus::Unresolved]);
    }

    #[test]
    fn test_without_suspension_point_exposes_no_queue() {
        let module = new_module("a");
        let exports = begin_async_module(
            &module,
            |handle| assert!(handle.queue().is_none()),
            false,
            false,
        );
        let mut visited = 0;
        exports.visit_queues(&mut |_| visited += 1);
        assert_eq!(visited, 0);
    }

    #[test]
    fn test_snapshot_tracks_exports_assignment() {
        let module = new_module("a");
        let exports = begin_async_module(&module, |_| {}, true, false);
        module.write().set_exports(Value::from("replaced"));
        assert_eq!(exports.exports_snapshot(), Value::from("replaced"));
        assert!(matches!(module.read().exports(), Value::AsyncModule(_)));
    }

    #[test]
    fn test_snapshot_frozen_once_settled() {
        let module = new_module("a");
        let exports = begin_async_module(
            &module,
            |handle| {
                handle.complete(Ok(()));
            },
            true,
            false,
        );
        let settled = exports.deferred().peek().unwrap().unwrap();

        crate::exports::set_exports_value(&module, Value::from("after")).unwrap();
        module.write().set_namespace_object(Value::from("late namespace"));

        assert_eq!(exports.exports_snapshot(), settled);
        assert!(matches!(settled, Value::Object(_)));
    }

    #[test]
    fn test_map_keeps_capabilities() {
        let module = new_module("a");
        let exports = begin_async_module(&module, |_| {}, true, false);
        let derived = exports.map(|v| v);
        let mut original = Vec::new();
        let mut mapped = Vec::new();
        exports.visit_queues(&mut |q| original.push(q.id()));
        derived.visit_queues(&mut |q| mapped.push(q.id()));
        assert_eq!(original, mapped);
        assert!(!derived.deferred().ptr_eq(exports.deferred()));
    }
}
