//! Integration tests for the shared reducer against an in-memory server.

use parking_lot::Mutex;
use serde_json::{json, Value};
use shared_reducer::protocol::{ClientMessage, ServerMessage};
use shared_reducer::{
    ConnectionHandler, Context, FieldContext, FieldDelta, FieldOp, ManualScheduler, Observers,
    Scheduler, SharedReducer, SpecSource, SyncError, SyncResult, Transport,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A server holding one state, delivering replies only when pumped.
#[derive(Default)]
struct InMemoryServer {
    state: Mutex<Option<Arc<Value>>>,
    clients: Mutex<Vec<Arc<dyn ConnectionHandler>>>,
    outbox: Mutex<VecDeque<(usize, Value)>>,
}

impl InMemoryServer {
    fn new(initial: Value) -> Arc<Self> {
        let server = Self::default();
        *server.state.lock() = Some(Arc::new(initial));
        Arc::new(server)
    }

    fn attach(&self, handler: Arc<dyn ConnectionHandler>) -> usize {
        let mut clients = self.clients.lock();
        clients.push(handler);
        let client = clients.len() - 1;
        let init = ServerMessage::<Value, FieldDelta>::init(self.state().as_ref().clone());
        self.outbox.lock().push_back((client, init.encode().unwrap()));
        client
    }

    fn state(&self) -> Arc<Value> {
        self.state.lock().clone().unwrap()
    }

    fn handle(&self, client: usize, read_only: bool, message: Value) {
        let ClientMessage { delta, id } = ClientMessage::<FieldDelta>::decode(message).unwrap();
        let mut outbox = self.outbox.lock();

        if read_only {
            let reply = ServerMessage::<Value, FieldDelta>::rejection("Cannot modify data", Some(id));
            outbox.push_back((client, reply.encode().unwrap()));
            return;
        }

        let mut state = self.state.lock();
        let next = FieldContext.update(state.as_ref().unwrap(), &delta);
        *state = Some(next);

        for other in 0..self.clients.lock().len() {
            let reply = if other == client {
                ServerMessage::<Value, FieldDelta>::ack(delta.clone(), id)
            } else {
                ServerMessage::change(delta.clone())
            };
            outbox.push_back((other, reply.encode().unwrap()));
        }
    }

    /// Delivers queued replies, including any they cause.
    fn pump(&self) {
        loop {
            let Some((client, message)) = self.outbox.lock().pop_front() else {
                return;
            };
            let handler = Arc::clone(&self.clients.lock()[client]);
            handler.on_message(message);
        }
    }
}

struct InMemoryTransport {
    server: Arc<InMemoryServer>,
    client: usize,
    read_only: bool,
    closed: AtomicBool,
}

impl Transport for InMemoryTransport {
    fn send(&self, message: Value) -> SyncResult<()> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        self.server.handle(self.client, self.read_only, message);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct Client {
    reducer: SharedReducer<FieldContext>,
    scheduler: Arc<ManualScheduler>,
    events: Arc<Mutex<Vec<String>>>,
}

impl Client {
    fn connect(server: &Arc<InMemoryServer>, read_only: bool) -> Self {
        let scheduler = Arc::new(ManualScheduler::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let (changes, warnings) = (Arc::clone(&events), Arc::clone(&events));
        let observers = Observers::new()
            .with_change_handler(move |state| changes.lock().push(format!("change {state}")))
            .with_warning_handler(move |text| warnings.lock().push(format!("warning {text}")));

        let server = Arc::clone(server);
        let reducer = SharedReducer::with_transport(
            FieldContext,
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            observers,
            move |handler| {
                let client = server.attach(handler);
                Ok(Arc::new(InMemoryTransport {
                    server,
                    client,
                    read_only,
                    closed: AtomicBool::new(false),
                }) as Arc<dyn Transport>)
            },
        )
        .unwrap();

        Self {
            reducer,
            scheduler,
            events,
        }
    }

    fn dispatch(&self, delta: FieldDelta) {
        self.reducer.dispatch(vec![SpecSource::delta(delta)]).unwrap();
    }

    fn state(&self) -> Value {
        self.reducer.state().unwrap().as_ref().clone()
    }
}

fn initial() -> Value {
    json!({"foo": "v1", "bar": 10})
}

fn add(field: &str, n: i64) -> FieldDelta {
    FieldOp::delta(field, FieldOp::Add(n))
}

fn set(field: &str, value: Value) -> FieldDelta {
    FieldOp::delta(field, FieldOp::Set(value))
}

#[test]
fn test_local_change_round_trip() {
    let server = InMemoryServer::new(initial());
    let client = Client::connect(&server, false);
    server.pump();

    client.dispatch(add("bar", 5));
    assert_eq!(client.state(), json!({"foo": "v1", "bar": 15}));

    client.scheduler.run_pending();
    server.pump();

    assert_eq!(*server.state(), json!({"foo": "v1", "bar": 15}));
    assert_eq!(client.reducer.stats().unwrap().outstanding, 0);
    // Baseline plus the local change; the acknowledgement is silent.
    assert_eq!(client.events.lock().len(), 2);
}

#[test]
fn test_two_clients_converge() {
    let server = InMemoryServer::new(initial());
    let a = Client::connect(&server, false);
    let b = Client::connect(&server, false);
    server.pump();

    a.dispatch(set("foo", json!("v2")));
    b.dispatch(add("bar", 1));
    a.scheduler.run_pending();
    b.scheduler.run_pending();
    server.pump();

    let expected = json!({"foo": "v2", "bar": 11});
    assert_eq!(a.state(), expected);
    assert_eq!(b.state(), expected);
    assert_eq!(*server.state(), expected);
}

#[test]
fn test_foreign_change_merges_with_pending_local_change() {
    let server = InMemoryServer::new(initial());
    let a = Client::connect(&server, false);
    let b = Client::connect(&server, false);
    server.pump();

    a.dispatch(add("bar", 5));
    a.scheduler.run_pending();
    b.dispatch(set("foo", json!("v3")));
    b.scheduler.run_pending();

    // a's change is acknowledged first, so b sees it before its own ack.
    server.pump();

    assert_eq!(b.state(), json!({"foo": "v3", "bar": 15}));
    assert_eq!(a.state(), json!({"foo": "v3", "bar": 15}));
}

#[test]
fn test_read_only_client_rolls_back() {
    let server = InMemoryServer::new(initial());
    let client = Client::connect(&server, true);
    server.pump();

    let outcome = Arc::new(Mutex::new(None));
    let (synced, rejected) = (Arc::clone(&outcome), Arc::clone(&outcome));
    client
        .reducer
        .dispatch(vec![
            SpecSource::delta(add("bar", 5)),
            SpecSource::sync(
                move |state: Arc<Value>| *synced.lock() = Some(Ok(state)),
                move |reason| *rejected.lock() = Some(Err(reason)),
            ),
        ])
        .unwrap();
    assert_eq!(client.state()["bar"], 15);

    client.scheduler.run_pending();
    server.pump();

    assert_eq!(client.state(), initial());
    assert_eq!(*outcome.lock(), Some(Err("Cannot modify data".to_string())));
    assert!(client
        .events
        .lock()
        .contains(&"warning API rejected update: Cannot modify data".to_string()));
    assert_eq!(*server.state(), initial());
}

#[test]
fn test_dispatch_before_baseline_notifies_once() {
    let server = InMemoryServer::new(initial());
    let client = Client::connect(&server, false);

    client.dispatch(set("foo", json!("early")));
    client
        .reducer
        .dispatch(vec![SpecSource::generator(|state: &Value| {
            let bar = state["bar"].as_i64().unwrap_or(0);
            vec![SpecSource::delta(set("bar", json!(bar * 2)))]
        })])
        .unwrap();
    assert!(client.reducer.state().is_none());

    server.pump();

    assert_eq!(client.state(), json!({"foo": "early", "bar": 20}));
    assert_eq!(
        *client.events.lock(),
        vec![r#"change {"bar":20,"foo":"early"}"#.to_string()]
    );

    client.scheduler.run_pending();
    server.pump();
    assert_eq!(*server.state(), json!({"foo": "early", "bar": 20}));
}

#[test]
fn test_sync_callback_sees_confirmed_state() {
    let server = InMemoryServer::new(initial());
    let client = Client::connect(&server, false);
    server.pump();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    client
        .reducer
        .dispatch(vec![
            SpecSource::delta(add("bar", 1)),
            SpecSource::synced(move |state: Arc<Value>| log.lock().push(state["bar"].clone())),
        ])
        .unwrap();
    assert!(seen.lock().is_empty());

    client.scheduler.run_pending();
    server.pump();

    assert_eq!(*seen.lock(), vec![json!(11)]);
}

#[test]
fn test_closed_client_ignores_server() {
    let server = InMemoryServer::new(initial());
    let a = Client::connect(&server, false);
    let b = Client::connect(&server, false);
    server.pump();

    b.reducer.close();
    a.dispatch(add("bar", 1));
    a.scheduler.run_pending();
    server.pump();

    assert!(b.reducer.state().is_none());
    assert_eq!(
        b.reducer.dispatch(vec![SpecSource::delta(add("bar", 1))]),
        Err(SyncError::Closed)
    );
}
