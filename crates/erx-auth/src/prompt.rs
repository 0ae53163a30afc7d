//! The prompt capability and the attempt machinery shared by all strategies.
//!
//! # Architecture
//!
//! Every prompt owns one [`PromptCore`]:
//!
//! - a generation counter identifying the attempt that currently owns the prompt
//! - a single-slot request intake that only exists while an attempt listens
//! - a cancel signal per attempt, kept apart from the intake so a queued
//!   request never holds up cancellation
//! - the observable state (`watch` for the latest value, `broadcast` for every transition)
//! - the profile the running attempt belongs to
//!
//! [`PromptCore::begin`] opens an [`Attempt`]. The attempt is the only writer
//! of state while it is current; dropping it closes the intake and resets the
//! state, so nothing leaks into the next attempt. Starting a new attempt while
//! an older one still runs hands the prompt to the new one: the older intake
//! closes and the older attempt resolves to `Cancelled`.
//!
//! [`Latest`] holds the processing of the most recent request. Replacing it
//! drops, and thereby cancels, the previous processing before the new one starts.

use std::fmt::Debug;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::{Notify, broadcast, mpsc, watch};

use crate::error::AuthError;
use crate::types::{AuthResult, AuthScope, Profile, ProfileId};

/// Stream yielding at most one terminal [`AuthResult`].
pub type AuthStream = BoxStream<'static, AuthResult>;

/// Uniform capability implemented by every authentication strategy.
///
/// # Example
///
/// ```ignore
/// use erx_auth::prelude::*;
/// use futures_util::StreamExt;
///
/// let result = prompt
///     .authenticate(&ProfileId::from("p-1"), AuthScope::Prescriptions)
///     .next()
///     .await;
/// ```
#[async_trait]
pub trait PromptAuthenticator: Send + Sync {
    /// Starts one authentication attempt.
    ///
    /// The stream is cold: nothing happens until it is polled. Dropping it
    /// abandons the attempt and releases every card session or network call
    /// it started. If an attempt is already running on this prompt it is
    /// superseded and resolves to [`AuthResult::Cancelled`].
    fn authenticate(&self, profile_id: &ProfileId, scope: AuthScope) -> AuthStream;

    /// Requests abandonment of the running attempt.
    ///
    /// Idempotent; a no-op when nothing runs.
    async fn cancel_authentication(&self);
}

/// Turns an attempt future into the public result stream.
pub(crate) fn attempt_stream<F>(attempt: F) -> AuthStream
where
    F: Future<Output = Option<AuthResult>> + Send + 'static,
{
    stream::once(attempt).filter_map(future::ready).boxed()
}

/// Bounds shared by all prompt state enums.
pub(crate) trait PromptState: Clone + Default + PartialEq + Debug + Send + Sync + 'static {}

impl<T> PromptState for T where T: Clone + Default + PartialEq + Debug + Send + Sync + 'static {}

struct Intake<R> {
    generation: u64,
    sender: mpsc::Sender<R>,
    cancel: Arc<Notify>,
}

/// What a running attempt is woken up by.
#[derive(Debug, PartialEq)]
pub(crate) enum Signal<R> {
    Request(R),
    /// Cancellation was requested.
    Cancel,
    /// A newer attempt took over the prompt.
    Superseded,
}

/// Request intake and observable state of one prompt.
pub(crate) struct PromptCore<R, S: PromptState> {
    name: &'static str,
    generation: Mutex<u64>,
    intake: watch::Sender<Option<Intake<R>>>,
    state: watch::Sender<S>,
    transitions: broadcast::Sender<S>,
    profile: watch::Sender<Option<Profile>>,
}

impl<R, S: PromptState> PromptCore<R, S> {
    pub(crate) fn new(name: &'static str, transition_capacity: usize) -> Arc<Self> {
        let (intake, _) = watch::channel(None);
        let (state, _) = watch::channel(S::default());
        let (transitions, _) = broadcast::channel(transition_capacity.max(1));
        let (profile, _) = watch::channel(None);
        Arc::new(Self {
            name,
            generation: Mutex::new(0),
            intake,
            state,
            transitions,
            profile,
        })
    }

    fn lock_generation(&self) -> MutexGuard<'_, u64> {
        match self.generation.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(prompt = self.name, "Prompt generation mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Opens a new attempt, superseding any attempt still running.
    pub(crate) fn begin(self: &Arc<Self>) -> Attempt<R, S> {
        let (sender, requests) = mpsc::channel(1);
        let cancel = Arc::new(Notify::new());
        let generation = {
            let mut current = self.lock_generation();
            *current += 1;
            let superseded = self
                .intake
                .send_replace(Some(Intake {
                    generation: *current,
                    sender,
                    cancel: Arc::clone(&cancel),
                }))
                .is_some();
            if superseded {
                tracing::debug!(prompt = self.name, "Superseding running attempt");
            }
            self.publish(S::default());
            self.profile.send_replace(None);
            *current
        };
        tracing::debug!(prompt = self.name, generation, "Attempt started");

        Attempt {
            handle: AttemptHandle {
                core: Arc::clone(self),
                generation,
            },
            requests,
            cancel,
        }
    }

    fn publish(&self, state: S) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });
        if changed {
            tracing::debug!(prompt = self.name, state = ?state, "Prompt state changed");
            // No subscribers is fine
            let _ = self.transitions.send(state);
        }
    }

    pub(crate) fn state(&self) -> S {
        self.state.borrow().clone()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<S> {
        self.state.subscribe()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<S> {
        self.transitions.subscribe()
    }

    pub(crate) fn profile(&self) -> Option<Profile> {
        self.profile.borrow().clone()
    }

    /// Queues `request` for the running attempt.
    ///
    /// Waits until an attempt listens and its slot is free. The slot holds one
    /// request, so returning `Ok` means the request was queued, not yet
    /// received: an attempt that ends before reading it drops it.
    pub(crate) async fn send(&self, request: R) -> Result<(), AuthError> {
        let mut intake = self.intake.subscribe();
        let sender = {
            let current = intake
                .wait_for(Option::is_some)
                .await
                .map_err(|_| AuthError::request_not_delivered(self.name))?;
            (*current).as_ref().map(|intake| intake.sender.clone())
        };
        let Some(sender) = sender else {
            return Err(AuthError::request_not_delivered(self.name));
        };
        sender
            .send(request)
            .await
            .map_err(|_| AuthError::request_not_delivered(self.name))
    }

    /// Signals cancellation to the running attempt without waiting.
    ///
    /// Returns `false` if no attempt listens. The signal is remembered until
    /// the attempt next waits, and it overtakes a queued request.
    pub(crate) fn cancel(&self) -> bool {
        let intake = self.intake.borrow();
        match intake.as_ref() {
            Some(intake) => {
                tracing::debug!(prompt = self.name, generation = intake.generation, "Cancellation signalled");
                intake.cancel.notify_one();
                true
            }
            None => false,
        }
    }

    /// Signals cancellation once an attempt listens.
    pub(crate) async fn cancel_when_listening(&self) -> Result<(), AuthError> {
        let mut intake = self.intake.subscribe();
        let current = intake
            .wait_for(Option::is_some)
            .await
            .map_err(|_| AuthError::request_not_delivered(self.name))?;
        match (*current).as_ref() {
            Some(intake) => {
                intake.cancel.notify_one();
                Ok(())
            }
            None => Err(AuthError::request_not_delivered(self.name)),
        }
    }
}

/// Write access to the prompt state for the current attempt.
///
/// Writes from an attempt that has been superseded are dropped.
pub(crate) struct AttemptHandle<R, S: PromptState> {
    core: Arc<PromptCore<R, S>>,
    generation: u64,
}

impl<R, S: PromptState> Clone for AttemptHandle<R, S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            generation: self.generation,
        }
    }
}

impl<R, S: PromptState> AttemptHandle<R, S> {
    pub(crate) fn set_state(&self, state: S) {
        let current = self.core.lock_generation();
        if *current == self.generation {
            self.core.publish(state);
        }
    }

    pub(crate) fn set_profile(&self, profile: Profile) {
        let current = self.core.lock_generation();
        if *current == self.generation {
            self.core.profile.send_replace(Some(profile));
        }
    }

    pub(crate) fn state(&self) -> S {
        self.core.state()
    }

    pub(crate) fn prompt(&self) -> &'static str {
        self.core.name
    }
}

/// One running attempt: the request receiver plus state ownership.
pub(crate) struct Attempt<R, S: PromptState> {
    handle: AttemptHandle<R, S>,
    requests: mpsc::Receiver<R>,
    cancel: Arc<Notify>,
}

impl<R, S: PromptState> Attempt<R, S> {
    pub(crate) fn handle(&self) -> AttemptHandle<R, S> {
        self.handle.clone()
    }

    /// Waits for the next request or cancellation. Cancellation wins over a
    /// request that is already queued.
    pub(crate) async fn next_signal(&mut self) -> Signal<R> {
        tokio::select! {
            biased;
            _ = self.cancel.notified() => Signal::Cancel,
            request = self.requests.recv() => match request {
                Some(request) => Signal::Request(request),
                None => Signal::Superseded,
            },
        }
    }

    pub(crate) fn set_state(&self, state: S) {
        self.handle.set_state(state);
    }

    pub(crate) fn set_profile(&self, profile: Profile) {
        self.handle.set_profile(profile);
    }

    pub(crate) fn state(&self) -> S {
        self.handle.state()
    }
}

impl<R, S: PromptState> Drop for Attempt<R, S> {
    fn drop(&mut self) {
        let core = &self.handle.core;
        let current = core.lock_generation();
        if *current != self.handle.generation {
            return;
        }
        core.intake.send_replace(None);
        core.publish(S::default());
        core.profile.send_replace(None);
        tracing::debug!(
            prompt = core.name,
            generation = self.handle.generation,
            "Attempt finished"
        );
    }
}

/// Processing of the most recent request.
pub(crate) struct Latest<T> {
    current: Option<BoxFuture<'static, T>>,
}

impl<T> Latest<T> {
    pub(crate) fn new() -> Self {
        Self { current: None }
    }

    /// Starts `task`, dropping whatever ran before.
    pub(crate) fn replace<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.current = Some(task.boxed());
    }

    /// Drops the running task; returns `true` if there was one.
    pub(crate) fn cancel(&mut self) -> bool {
        self.current.take().is_some()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.current.is_some()
    }

    /// Resolves when the running task completes; pending while idle.
    pub(crate) async fn finished(&mut self) -> T {
        let output = match self.current.as_mut() {
            Some(task) => task.await,
            None => future::pending().await,
        };
        self.current = None;
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Clone, Default, PartialEq)]
    enum TestState {
        #[default]
        Idle,
        Busy(u8),
    }

    #[derive(Debug, PartialEq)]
    enum TestRequest {
        Ping(u8),
    }

    fn core() -> Arc<PromptCore<TestRequest, TestState>> {
        PromptCore::new("test", 16)
    }

    #[test]
    fn test_cancel_without_attempt_is_dropped() {
        let core = core();
        assert!(!core.cancel());
    }

    #[tokio::test]
    async fn test_stale_cancel_does_not_reach_next_attempt() {
        let core = core();
        assert!(!core.cancel());

        let mut attempt = core.begin();
        core.send(TestRequest::Ping(1)).await.unwrap();
        assert_eq!(attempt.next_signal().await, Signal::Request(TestRequest::Ping(1)));
    }

    #[tokio::test]
    async fn test_request_reaches_running_attempt() {
        let core = core();
        let mut attempt = core.begin();

        core.send(TestRequest::Ping(7)).await.unwrap();
        assert_eq!(attempt.next_signal().await, Signal::Request(TestRequest::Ping(7)));
    }

    #[tokio::test]
    async fn test_cancel_overtakes_queued_request() {
        let core = core();
        let mut attempt = core.begin();

        core.send(TestRequest::Ping(1)).await.unwrap();
        assert!(core.cancel());
        assert_eq!(attempt.next_signal().await, Signal::Cancel);
        assert_eq!(attempt.next_signal().await, Signal::Request(TestRequest::Ping(1)));
    }

    #[tokio::test]
    async fn test_cancel_when_listening_waits_for_attempt() {
        let core = core();
        let canceller = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.cancel_when_listening().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!canceller.is_finished());

        let mut attempt = core.begin();
        assert!(canceller.await.unwrap().is_ok());
        assert_eq!(attempt.next_signal().await, Signal::Cancel);
    }

    #[tokio::test]
    async fn test_send_waits_for_attempt() {
        let core = core();
        let sender = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.send(TestRequest::Ping(3)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sender.is_finished());

        let mut attempt = core.begin();
        assert_eq!(attempt.next_signal().await, Signal::Request(TestRequest::Ping(3)));
        assert!(sender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_single_slot_holds_back_second_undelivered_request() {
        let core = core();
        let mut attempt = core.begin();
        core.send(TestRequest::Ping(1)).await.unwrap();

        let second = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.send(TestRequest::Ping(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second.is_finished());

        assert_eq!(attempt.next_signal().await, Signal::Request(TestRequest::Ping(1)));
        assert!(second.await.unwrap().is_ok());
        assert_eq!(attempt.next_signal().await, Signal::Request(TestRequest::Ping(2)));
    }

    #[tokio::test]
    async fn test_queued_request_ends_with_its_attempt() {
        let core = core();
        let attempt = core.begin();
        core.send(TestRequest::Ping(1)).await.unwrap();
        drop(attempt);

        let mut next = core.begin();
        let signal = tokio::time::timeout(Duration::from_millis(20), next.next_signal()).await;
        assert!(signal.is_err(), "request leaked into the next attempt: {signal:?}");
    }

    #[tokio::test]
    async fn test_drop_resets_state_and_closes_intake() {
        let core = core();
        let mut transitions = core.subscribe();
        {
            let attempt = core.begin();
            attempt.set_profile(Profile::new("p-1", "Ada"));
            attempt.set_state(TestState::Busy(1));
            assert_eq!(core.state(), TestState::Busy(1));
            assert!(core.profile().is_some());
        }
        assert_eq!(core.state(), TestState::Idle);
        assert!(core.profile().is_none());
        assert!(!core.cancel());

        assert_eq!(transitions.recv().await.unwrap(), TestState::Busy(1));
        assert_eq!(transitions.recv().await.unwrap(), TestState::Idle);
    }

    #[tokio::test]
    async fn test_superseded_attempt_loses_state_ownership() {
        let core = core();
        let mut first = core.begin();
        let handle = first.handle();
        let second = core.begin();

        // The first intake closed when the second attempt opened.
        assert_eq!(first.next_signal().await, Signal::Superseded);

        handle.set_state(TestState::Busy(1));
        assert_eq!(core.state(), TestState::Idle);

        second.set_state(TestState::Busy(2));
        drop(first);
        assert_eq!(core.state(), TestState::Busy(2));
        assert!(core.cancel());
    }

    #[tokio::test]
    async fn test_duplicate_state_is_not_rebroadcast() {
        let core = core();
        let mut transitions = core.subscribe();
        let attempt = core.begin();
        attempt.set_state(TestState::Busy(1));
        attempt.set_state(TestState::Busy(1));
        attempt.set_state(TestState::Busy(2));

        assert_eq!(transitions.recv().await.unwrap(), TestState::Busy(1));
        assert_eq!(transitions.recv().await.unwrap(), TestState::Busy(2));
    }

    #[tokio::test]
    async fn test_latest_replace_cancels_previous() {
        let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();
        let mut latest = Latest::new();

        let first_tx = tx.clone();
        latest.replace(async move {
            future::pending::<()>().await;
            let _ = first_tx.send("first");
            1
        });
        assert!(latest.is_running());

        let second_tx = tx.clone();
        latest.replace(async move {
            let _ = second_tx.send("second");
            2
        });
        drop(tx);

        assert_eq!(latest.finished().await, 2);
        assert!(!latest.is_running());
        assert_eq!(rx.recv().await, Some("second"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_attempt_stream_skips_missing_result() {
        let results: Vec<_> = attempt_stream(async { None }).collect().await;
        assert!(results.is_empty());

        let results: Vec<_> = attempt_stream(async { Some(AuthResult::Cancelled) })
            .collect()
            .await;
        assert_eq!(results, vec![AuthResult::Cancelled]);
    }
}
