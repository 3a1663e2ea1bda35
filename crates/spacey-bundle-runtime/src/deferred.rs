// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Deferred values
//!
//! A [`Deferred`] is the promise-equivalent the runtime hands around for
//! asynchronous exports. It settles at most once, runs its reactions after
//! the internal lock is released, and can be awaited as a [`Future`].

use crate::error::RuntimeError;
use crate::value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

/// Unique ID generator for deferred values
static DEFERRED_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Outcome of a settled deferred value
pub type Settlement = Result<Value, RuntimeError>;

type Reaction<T> = Box<dyn FnOnce(T) + Send>;

struct LatchState<T> {
    value: Option<T>,
    reactions: Vec<Reaction<T>>,
    wakers: Vec<Waker>,
}

/// One-shot cell that runs reactions and wakes tasks when it is set
pub(crate) struct Latch<T> {
    state: Arc<Mutex<LatchState<T>>>,
}

impl<T> Clone for Latch<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Latch<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LatchState {
                value: None,
                reactions: Vec::new(),
                wakers: Vec::new(),
            })),
        }
    }

    /// Set the value. Returns false if it was already set.
    pub(crate) fn settle(&self, value: T) -> bool {
        let (reactions, wakers) = {
            let mut state = self.state.lock();
            if state.value.is_some() {
                return false;
            }
            state.value = Some(value.clone());
            (
                std::mem::take(&mut state.reactions),
                std::mem::take(&mut state.wakers),
            )
        };
        for reaction in reactions {
            reaction(value.clone());
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    pub(crate) fn peek(&self) -> Option<T> {
        self.state.lock().value.clone()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.state.lock().value.is_some()
    }

    /// Run `reaction` once the value is set; immediately if it already is.
    pub(crate) fn on_settled(&self, reaction: impl FnOnce(T) + Send + 'static) {
        let mut state = self.state.lock();
        if let Some(value) = state.value.clone() {
            drop(state);
            reaction(value);
            return;
        }
        state.reactions.push(Box::new(reaction));
    }

    pub(crate) fn poll_settled(&self, cx: &mut Context<'_>) -> Poll<T> {
        let mut state = self.state.lock();
        if let Some(value) = state.value.clone() {
            return Poll::Ready(value);
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }

    pub(crate) fn ptr_eq(&self, other: &Latch<T>) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Settlement state of a deferred value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    /// Not settled yet
    Pending,
    /// Settled with a value
    Fulfilled,
    /// Settled with an error
    Rejected,
}

/// A value that is not available yet
///
/// Clones share the same settlement. The deferred value is its own
/// capability: whoever holds it may resolve or reject it.
#[derive(Clone)]
pub struct Deferred {
    id: u64,
    latch: Latch<Settlement>,
    observed: Arc<AtomicBool>,
}

impl Deferred {
    /// Create a new pending deferred value
    pub fn pending() -> Self {
        Self {
            id: DEFERRED_ID_COUNTER.fetch_add(1, Ordering::SeqCst),
            latch: Latch::new(),
            observed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a fulfilled deferred value
    pub fn resolved(value: Value) -> Self {
        let deferred = Self::pending();
        deferred.resolve(value);
        deferred
    }

    /// Create a rejected deferred value
    pub fn rejected(err: RuntimeError) -> Self {
        let deferred = Self::pending();
        deferred.mark_handled();
        deferred.reject(err);
        deferred
    }

    /// Unique ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Fulfill with a value. Returns false if already settled.
    pub fn resolve(&self, value: Value) -> bool {
        let settled = self.latch.settle(Ok(value));
        if settled {
            tracing::trace!("Deferred {} fulfilled", self.id);
        }
        settled
    }

    /// Reject with an error. Returns false if already settled.
    pub fn reject(&self, err: RuntimeError) -> bool {
        let settled = self.latch.settle(Err(err));
        if settled {
            tracing::trace!("Deferred {} rejected", self.id);
        }
        settled
    }

    /// Current state
    pub fn state(&self) -> DeferredState {
        match self.latch.peek() {
            None => DeferredState::Pending,
            Some(Ok(_)) => DeferredState::Fulfilled,
            Some(Err(_)) => DeferredState::Rejected,
        }
    }

    /// Check if still pending
    pub fn is_pending(&self) -> bool {
        !self.latch.is_set()
    }

    /// Check if settled (fulfilled or rejected)
    pub fn is_settled(&self) -> bool {
        self.latch.is_set()
    }

    /// The settlement, if any, without waiting
    pub fn peek(&self) -> Option<Settlement> {
        self.latch.peek()
    }

    /// Whether anyone has attached a reaction, awaited, or marked it handled
    pub fn is_observed(&self) -> bool {
        self.observed.load(Ordering::SeqCst)
    }

    /// Mark a rejection as handled without attaching a reaction
    pub fn mark_handled(&self) {
        self.observed.store(true, Ordering::SeqCst);
    }

    /// Run `reaction` once settled; immediately if already settled
    pub fn then(&self, reaction: impl FnOnce(Settlement) + Send + 'static) {
        self.mark_handled();
        self.latch.on_settled(reaction);
    }

    /// Derive a deferred value that settles with `f` applied to the value
    ///
    /// Rejections pass through unchanged.
    pub fn map<F>(&self, f: F) -> Deferred
    where
        F: FnOnce(Value) -> Value + Send + 'static,
    {
        let derived = Deferred::pending();
        let target = derived.clone();
        self.then(move |settlement| match settlement {
            Ok(value) => {
                target.resolve(f(value));
            }
            Err(err) => {
                target.reject(err);
            }
        });
        derived
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        self.latch.ptr_eq(&other.latch)
    }
}

impl Future for Deferred {
    type Output = Settlement;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.mark_handled();
        self.latch.poll_settled(cx)
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
