//! The shared reducer handle.

use crate::config::ReducerConfig;
use crate::context::Context;
use crate::error::{SyncError, SyncResult};
use crate::lock::DispatchLock;
use crate::reconciler::{Effects, Reconciler, ReducerStats};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::spec::{SpecSource, SyncMarker};
use crate::transport::{ConnectionHandler, Transport};
use crate::websocket::WebSocketTransport;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shared_reducer_protocol::{ClientMessage, ProtocolError, ServerMessage};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

type ChangeHandler<T> = Box<dyn Fn(Arc<T>) + Send + Sync>;
type TextHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Callbacks for state changes and problems.
///
/// Warnings and errors are also logged through `tracing`, so every handler
/// is optional.
pub struct Observers<T> {
    on_change: Option<ChangeHandler<T>>,
    on_error: Option<TextHandler>,
    on_warning: Option<TextHandler>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            on_change: None,
            on_error: None,
            on_warning: None,
        }
    }
}

impl<T> Observers<T> {
    /// Creates observers with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the new local state whenever it changes.
    pub fn with_change_handler(mut self, handler: impl Fn(Arc<T>) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Box::new(handler));
        self
    }

    /// Called when the connection fails or a send cannot be completed.
    pub fn with_error_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Called for rejected changes and ignored server messages.
    pub fn with_warning_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_warning = Some(Box::new(handler));
        self
    }
}

/// Client-side replica of a server-owned state.
///
/// Local dispatches apply immediately and are sent to the server in
/// batches. Server acknowledgements, foreign changes and rejections are
/// reconciled so the local state always equals the confirmed server state
/// followed by every change not yet confirmed.
///
/// Cloning yields another handle to the same replica. Handles may be used
/// from several threads; observers are called one at a time, in the order
/// the operations took effect.
pub struct SharedReducer<C: Context> {
    inner: Arc<Inner<C>>,
}

impl<C: Context> Clone for SharedReducer<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<C: Context> {
    core: DispatchLock<Reconciler<C>>,
    /// Local state as of the last completed operation.
    published: RwLock<Option<Arc<C::State>>>,
    transport: OnceLock<Arc<dyn Transport>>,
    scheduler: Arc<dyn Scheduler>,
    observers: Observers<C::State>,
    /// Effects of completed operations, in commit order.
    pending: Mutex<VecDeque<Effects<C::State>>>,
    /// Set while a thread is performing pending effects.
    delivering: AtomicBool,
    closed: AtomicBool,
}

/// Clears the delivery flag, even if a callback panics.
struct Delivery<'a>(&'a AtomicBool);

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<C> SharedReducer<C>
where
    C: Context,
    C::State: DeserializeOwned,
    C::Delta: Serialize + DeserializeOwned,
{
    /// Connects to the server described by `config`.
    ///
    /// Must be called from within a current-thread tokio runtime; any other
    /// runtime fails with [`SyncError::Config`]. Dispatches made on that
    /// runtime's thread within one turn are sent as a single message.
    /// Connection failures are reported to the error handler, not returned
    /// here.
    pub fn connect(
        context: C,
        config: ReducerConfig,
        observers: Observers<C::State>,
    ) -> SyncResult<Self> {
        let url = config.validate()?;
        let scheduler = TokioScheduler::current()?;
        let runtime = scheduler.handle().clone();
        debug!("connecting shared reducer to {}", url);

        Self::with_transport(context, Arc::new(scheduler), observers, move |handler| {
            let transport = WebSocketTransport::connect(url, &config, handler, &runtime);
            Ok(Arc::new(transport) as Arc<dyn Transport>)
        })
    }

    /// Builds a reducer over a caller-supplied transport.
    ///
    /// `make_transport` receives the handler the transport should deliver
    /// inbound messages and errors to.
    pub fn with_transport<F>(
        context: C,
        scheduler: Arc<dyn Scheduler>,
        observers: Observers<C::State>,
        make_transport: F,
    ) -> SyncResult<Self>
    where
        F: FnOnce(Arc<dyn ConnectionHandler>) -> SyncResult<Arc<dyn Transport>>,
    {
        let inner = Arc::new(Inner {
            core: DispatchLock::new(Reconciler::new(Arc::new(context))),
            published: RwLock::new(None),
            transport: OnceLock::new(),
            scheduler,
            observers,
            pending: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let handler: Arc<dyn ConnectionHandler> = Arc::new(Link(Arc::downgrade(&inner)));
        let transport = make_transport(handler)?;
        // Only ever set here.
        let _ = inner.transport.set(transport);

        Ok(Self { inner })
    }

    /// Applies `sources` to the local state.
    ///
    /// Before the first baseline arrives the sources are queued and applied
    /// once it does. Observers and settled sync callbacks are called before
    /// this returns, unless another thread or an enclosing callback is
    /// already notifying, in which case that one delivers them. Fails with [`SyncError::ReentrantDispatch`] when called
    /// from a generator or a synchronously invoked sync callback, and with
    /// [`SyncError::Closed`] after [`close`](Self::close).
    pub fn dispatch(&self, sources: Vec<SpecSource<C::State, C::Delta>>) -> SyncResult<()> {
        self.inner.run(|core, effects| core.dispatch(sources, effects))
    }

    /// Registers callbacks for when every change dispatched so far has been
    /// confirmed by the server, or when one of them is rejected.
    pub fn add_sync_callback<S, R>(&self, on_synced: S, on_rejected: R) -> SyncResult<()>
    where
        S: FnOnce(Arc<C::State>) + Send + 'static,
        R: FnOnce(String) + Send + 'static,
    {
        self.dispatch(vec![SpecSource::Sync(SyncMarker::new(on_synced, on_rejected))])
    }

    /// Resolves with the state once every change dispatched before this call
    /// has been confirmed.
    ///
    /// The callback is registered immediately, not on first poll. Fails with
    /// [`SyncError::Rejected`] if a preceding change is rejected and with
    /// [`SyncError::Closed`] if the reducer closes first.
    pub fn synced_state(
        &self,
    ) -> impl Future<Output = SyncResult<Arc<C::State>>> + Send + 'static {
        let (sender, receiver) = oneshot::channel();
        let on_synced = Arc::new(Mutex::new(Some(sender)));
        let on_rejected = Arc::clone(&on_synced);

        let registered = self.add_sync_callback(
            move |state| {
                if let Some(sender) = on_synced.lock().take() {
                    let _ = sender.send(Ok(state));
                }
            },
            move |reason| {
                if let Some(sender) = on_rejected.lock().take() {
                    let _ = sender.send(Err(SyncError::Rejected(reason)));
                }
            },
        );

        async move {
            registered?;
            receiver.await.map_err(|_| SyncError::Closed)?
        }
    }

    /// Delivers one inbound server message.
    ///
    /// Transports call this through their [`ConnectionHandler`]; it is public
    /// for transports driven from outside the engine.
    pub fn receive(&self, message: Value) -> SyncResult<()> {
        self.inner.receive(message)
    }

    /// Current local state, or `None` before the first baseline and after
    /// close.
    pub fn state(&self) -> Option<Arc<C::State>> {
        self.inner.published.read().clone()
    }

    /// Sizes of the reconciliation queues.
    pub fn stats(&self) -> SyncResult<ReducerStats> {
        Ok(self.inner.core.enter()?.stats())
    }

    /// Checks if the reducer has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Closes the connection and drops all state.
    ///
    /// Pending sync callbacks never fire; pending [`synced_state`] futures
    /// fail with [`SyncError::Closed`]. Idempotent.
    ///
    /// [`synced_state`]: Self::synced_state
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing shared reducer");
        if let Some(transport) = self.inner.transport.get() {
            transport.close();
        }
        // When called from inside an operation on this thread, that
        // operation resets the state on its way out.
        if let Ok(mut core) = self.inner.core.enter() {
            core.close();
            *self.inner.published.write() = None;
        }
    }
}

impl<C> Inner<C>
where
    C: Context,
    C::State: DeserializeOwned,
    C::Delta: Serialize + DeserializeOwned,
{
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Runs `op` under the lock, then performs its effects.
    fn run<F>(self: &Arc<Self>, op: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Reconciler<C>, &mut Effects<C::State>),
    {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }

        {
            let mut core = self.core.enter()?;
            let mut effects = Effects::default();
            op(&mut *core, &mut effects);

            if self.is_closed() {
                core.close();
                *self.published.write() = None;
                return Err(SyncError::Closed);
            }
            *self.published.write() = core.state();
            // Queued while still holding the lock, so queue order is commit
            // order.
            self.pending.lock().push_back(effects);
        }

        self.deliver();
        Ok(())
    }

    /// Performs pending effects in commit order.
    ///
    /// One thread delivers at a time. A caller that finds delivery in
    /// progress returns at once and the delivering thread picks its effects
    /// up, which also covers operations started from inside a callback.
    fn deliver(self: &Arc<Self>) {
        loop {
            if self
                .delivering
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            {
                let _delivery = Delivery(&self.delivering);
                loop {
                    let next = self.pending.lock().pop_front();
                    match next {
                        Some(effects) => self.perform(effects),
                        None => break,
                    }
                }
            }
            // Effects queued between the last pop and the flag clearing
            // would otherwise wait for the next operation.
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    fn perform(self: &Arc<Self>, effects: Effects<C::State>) {
        let Effects {
            changed,
            resolved,
            rejected,
            warnings,
            errors,
            flush,
        } = effects;

        for warning in warnings {
            warn!("{}", warning);
            if let Some(handler) = &self.observers.on_warning {
                handler(&warning);
            }
        }
        for message in errors {
            self.report_error(&message);
        }
        if let (Some(state), Some(handler)) = (changed, &self.observers.on_change) {
            handler(state);
        }
        for (marker, state) in resolved {
            marker.resolve(state);
        }
        for (marker, reason) in rejected {
            marker.reject(reason);
        }
        if flush {
            self.schedule_flush();
        }
    }

    fn report_error(&self, message: &str) {
        error!("{}", message);
        if let Some(handler) = &self.observers.on_error {
            handler(message);
        }
    }

    fn schedule_flush(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.scheduler.defer(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.flush();
            }
        }));
    }

    /// Sends the batching delta. The send happens under the lock so
    /// messages leave in id order.
    fn flush(self: &Arc<Self>) {
        let flushed = self.run(|core, effects| {
            let Some(message) = core.flush() else {
                return;
            };
            debug!("sending change {}", message.id);
            if let Err(e) = self.send(&message) {
                effects
                    .errors
                    .push(format!("Failed to send change {}: {}", message.id, e));
            }
        });
        if let Err(e) = flushed {
            debug!("flush skipped: {}", e);
        }
    }

    fn send(&self, message: &ClientMessage<C::Delta>) -> SyncResult<()> {
        let value = message.encode()?;
        self.transport
            .get()
            .ok_or_else(|| SyncError::Transport("no transport attached".into()))?
            .send(value)
    }

    fn receive(self: &Arc<Self>, message: Value) -> SyncResult<()> {
        // Only a message arriving before the baseline can need its text.
        let raw = self.published.read().is_none().then(|| message.to_string());
        let decoded = ServerMessage::<C::State, C::Delta>::decode(message);

        self.run(|core, effects| match decoded {
            Ok(message) => core.receive(message, raw.as_deref(), effects),
            Err(ProtocolError::UnknownMessage(text) | ProtocolError::NotAnObject(text)) => effects
                .warnings
                .push(format!("Ignoring unknown API message: {}", text)),
            Err(e) => effects
                .warnings
                .push(format!("Ignoring malformed API message: {}", e)),
        })
    }
}

/// Connection-side view of a reducer; does not keep it alive.
struct Link<C: Context>(Weak<Inner<C>>);

impl<C> ConnectionHandler for Link<C>
where
    C: Context,
    C::State: DeserializeOwned,
    C::Delta: Serialize + DeserializeOwned,
{
    fn on_message(&self, message: Value) {
        if let Some(inner) = self.0.upgrade() {
            // Only fails once closed.
            let _ = inner.receive(message);
        }
    }

    fn on_malformed(&self, frame: &str, error: &str) {
        if let Some(inner) = self.0.upgrade() {
            let _ = inner.run(|_, effects| {
                effects
                    .warnings
                    .push(format!("Ignoring malformed API message: {} ({})", frame, error));
            });
        }
    }

    fn on_error(&self, error: &str) {
        if let Some(inner) = self.0.upgrade() {
            if !inner.is_closed() {
                let mut effects = Effects::default();
                effects.errors.push(error.to_string());
                inner.pending.lock().push_back(effects);
                inner.deliver();
            }
        }
    }
}
