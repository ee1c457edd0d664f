//! End-to-end tests over loopback sockets

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use remote_objects::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let client = TcpStream::connect(addr).expect("connect");
    let (server, _) = listener.accept().expect("accept");
    (server, client)
}

/// Open both ends of a loopback connection.
fn open_pair(server: ConnectionBuilder, client: ConnectionBuilder) -> (Connection, Connection) {
    init_tracing();
    let (s, c) = tcp_pair();
    let server = server.open(s).expect("server side");
    let client = client.open(c).expect("client side");
    (server, client)
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Server-side state observable from tests.
struct Fixture {
    executed: Arc<AtomicUsize>,
    remembered: Arc<Mutex<Option<Value>>>,
    gate: Receiver<()>,
    open: Sender<()>,
}

impl Fixture {
    fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            executed: Arc::new(AtomicUsize::new(0)),
            remembered: Arc::new(Mutex::new(None)),
            gate: rx,
            open: tx,
        }
    }

    fn root(&self) -> MethodTable {
        let executed = Arc::clone(&self.executed);
        let secret_executed = Arc::clone(&self.executed);
        let remember = Arc::clone(&self.remembered);
        let compare = Arc::clone(&self.remembered);
        let gate = self.gate.clone();

        MethodTable::new("fixture")
            .method("echo", |args, _| Ok(args.into_iter().next().unwrap_or_default()))
            .method("args", |args, _| Ok(Value::List(args)))
            .method("nil", |_, _| Ok(Value::Nil))
            .method("number", |_, _| Ok(Value::Int(42)))
            .method("same?", |args, _| {
                let [a, b] = expect_args("same?", args)?;
                Ok(Value::Bool(a == b))
            })
            .method("remember", move |args, _| {
                let [v] = expect_args("remember", args)?;
                *remember.lock() = Some(v);
                Ok(Value::Nil)
            })
            .method("is_remembered?", move |args, _| {
                let [v] = expect_args("is_remembered?", args)?;
                Ok(Value::Bool(compare.lock().as_ref() == Some(&v)))
            })
            .method("new_map", |_, _| Ok(Value::object(SharedMap::new())))
            .method("yield_pair", |_, block| {
                let block = block.ok_or_else(|| RpcError::argument("block required"))?;
                block(vec![Value::Int(1), Value::Int(2)])
            })
            .method("ask", |args, _| {
                let [target] = expect_args("ask", args)?;
                let proxy = target
                    .as_proxy()
                    .ok_or_else(|| RpcError::argument("expected a remote object"))?;
                proxy.call("value", vec![])
            })
            .method("divide", |args, _| {
                let [a, b] = expect_args("divide", args)?;
                match (a.as_int(), b.as_int()) {
                    (Some(_), Some(0)) => Err(RpcError::application("ZeroDivisionError", "divided by 0")),
                    (Some(a), Some(b)) => Ok(Value::Int(a / b)),
                    _ => Err(RpcError::argument("integers expected")),
                }
            })
            .method("wait", move |args, _| {
                // one call per `open` message, or all once the fixture is dropped
                let _ = gate.recv_timeout(Duration::from_secs(30));
                Ok(args.into_iter().next().unwrap_or_default())
            })
            .method("nan", |_, _| Ok(Value::Float(f64::NAN)))
            .method("send", move |_, _| {
                executed.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Nil)
            })
            .method("_secret", move |_, _| {
                secret_executed.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Nil)
            })
    }
}

fn served(fixture: &Fixture) -> ConnectionBuilder {
    Connection::builder().root_object(fixture.root())
}

mod passing_tests {
    use super::*;

    #[test]
    fn test_by_value_round_trip() {
        let fixture = Fixture::new();
        let (_server, client) = open_pair(served(&fixture), Connection::builder());

        let value = Value::Map(vec![
            (Value::sym("name"), Value::from("counter")),
            (Value::sym("ratio"), Value::Float(0.75)),
            (
                Value::sym("list"),
                Value::List(vec![Value::Int(-3), Value::Bool(true), Value::Nil]),
            ),
            (Value::sym("raw"), Value::Bytes(vec![0, 1, 255])),
        ]);
        let back = client.call("echo", vec![value.clone()]).expect("echo");
        assert_eq!(back, value);
    }

    #[test]
    fn test_object_comes_back_as_itself() {
        let fixture = Fixture::new();
        let (_server, client) = open_pair(served(&fixture), Connection::builder());

        let local: Arc<dyn RemoteObject> = Arc::new(SharedMap::new());
        let original = Value::from_arc(Arc::clone(&local));
        let back = client.call("echo", vec![original.clone()]).expect("echo");

        assert_eq!(back, original);
        assert!(back.as_proxy().is_none(), "own object must not come back as a proxy");
    }

    #[test]
    fn test_one_proxy_per_remote_object() {
        let fixture = Fixture::new();
        let (_server, client) = open_pair(served(&fixture), Connection::builder());

        let obj = Value::object(SharedMap::new());
        client.call("remember", vec![obj.clone()]).expect("remember");
        let still_same = client
            .call("is_remembered?", vec![obj.clone()])
            .expect("compare");
        assert_eq!(still_same, Value::Bool(true));

        let same = client
            .call("same?", vec![obj.clone(), obj])
            .expect("same?");
        assert_eq!(same, Value::Bool(true));

        let other = client
            .call("is_remembered?", vec![Value::object(SharedMap::new())])
            .expect("compare");
        assert_eq!(other, Value::Bool(false));
    }

    #[test]
    fn test_remote_object_returned_twice_is_one_proxy() {
        let fixture = Fixture::new();
        let (_server, client) = open_pair(served(&fixture), Connection::builder());

        let map = client.call("new_map", vec![]).expect("new_map");
        let proxy = map.as_proxy().expect("proxy").clone();
        let again = proxy.resolve().expect("resolve");
        assert!(again.as_proxy().is_some_and(|p| p.ptr_eq(&proxy)));
        assert_eq!(client.proxy_count(), 1);
    }

    #[test]
    fn test_nil_is_never_a_reference() {
        let fixture = Fixture::new();
        let config = ConnectionConfig::builder()
            .ref_call_enabled(true)
            .build()
            .expect("config");
        let (_server, client) = open_pair(served(&fixture).config(config), Connection::builder());

        assert_eq!(client.root().call_by_ref("nil", vec![]).expect("nil"), Value::Nil);
        let echoed = client.call("echo", vec![Value::Nil.into_ref()]).expect("echo");
        assert_eq!(echoed, Value::Nil);
    }

    #[test]
    fn test_application_error_crosses_the_wire() {
        let fixture = Fixture::new();
        let (_server, client) = open_pair(served(&fixture), Connection::builder());

        let err = client
            .call("divide", vec![Value::Int(1), Value::Int(0)])
            .expect_err("division by zero");
        assert_eq!(err, RpcError::application("ZeroDivisionError", "divided by 0"));

        let err = client.call("no_such", vec![]).expect_err("missing method");
        assert!(matches!(err, RpcError::NoSuchMethod(_)));
        assert_eq!(
            client.call("divide", vec![Value::Int(9), Value::Int(3)]).expect("divide"),
            Value::Int(3)
        );
    }
}

mod ref_call_tests {
    use super::*;

    #[test]
    fn test_ref_call_enabled_returns_proxy() {
        let fixture = Fixture::new();
        let config = ConnectionConfig::builder()
            .ref_call_enabled(true)
            .build()
            .expect("config");
        let (server, client) = open_pair(served(&fixture).config(config), Connection::builder());

        let number = client.root().call_by_ref("number", vec![]).expect("number");
        let proxy = number.as_proxy().expect("result by reference");
        assert_eq!(proxy.call("value", vec![]).expect("value"), Value::Int(42));
        assert_eq!(proxy.resolve().expect("resolve"), Value::Int(42));
        assert_eq!(server.exported_count(), 1);
    }

    #[test]
    fn test_ref_call_disabled_returns_copy() {
        let fixture = Fixture::new();
        let (server, client) = open_pair(served(&fixture), Connection::builder());

        let number = client.root().call_by_ref("number", vec![]).expect("number");
        assert_eq!(number, Value::Int(42));
        assert_eq!(server.exported_count(), 0);
    }
}

mod callback_tests {
    use super::*;

    #[test]
    fn test_block_runs_once_on_calling_thread() {
        let fixture = Fixture::new();
        let (_server, client) = open_pair(served(&fixture), Connection::builder());

        let caller = thread::current().id();
        let runs = AtomicUsize::new(0);
        let block = |args: Vec<Value>| -> RpcResult<Value> {
            runs.fetch_add(1, Ordering::SeqCst);
            assert_eq!(thread::current().id(), caller);
            assert_eq!(args, vec![Value::Int(1), Value::Int(2)]);
            Ok(Value::Int(args.iter().filter_map(Value::as_int).sum()))
        };

        let result = client
            .root()
            .call_with_block("yield_pair", vec![], Some(&block))
            .expect("yield_pair");
        assert_eq!(result, Value::Int(3));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_block_may_call_back_into_the_peer() {
        let fixture = Fixture::new();
        let (_server, client) = open_pair(served(&fixture), Connection::builder());

        let root = client.root().clone();
        let block = |args: Vec<Value>| root.call("args", args);
        let result = client
            .root()
            .call_with_block("yield_pair", vec![], Some(&block))
            .expect("nested call");
        assert_eq!(result, Value::List(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_block_error_propagates_through_both_sides() {
        let fixture = Fixture::new();
        let (_server, client) = open_pair(served(&fixture), Connection::builder());

        let block = |_: Vec<Value>| -> RpcResult<Value> { Err(RpcError::runtime("stop")) };
        let err = client
            .root()
            .call_with_block("yield_pair", vec![], Some(&block))
            .expect_err("block failed");
        assert_eq!(err, RpcError::runtime("stop"));
    }

    #[test]
    fn test_server_calls_client_object() {
        let fixture = Fixture::new();
        let (server, client) = open_pair(served(&fixture), Connection::builder());

        let cell = MethodTable::new("cell").method("value", |_, _| Ok(Value::from("from client")));
        let answer = client.call("ask", vec![Value::object(cell)]).expect("ask");
        assert_eq!(answer, Value::from("from client"));
        assert!(server.stats().calls_issued >= 1);
    }

    #[test]
    fn test_proxy_forwarded_to_a_third_party() {
        init_tracing();
        let left_obj = MethodTable::new("left").method("value", |_, _| Ok(Value::Int(7)));
        let (_left, hub_left) = open_pair(Connection::builder().root_object(left_obj), Connection::builder());

        let fixture = Fixture::new();
        let (_right, hub_right) = open_pair(served(&fixture), Connection::builder());

        let forwarded = Value::from(hub_left.root().clone());
        let answer = hub_right.call("ask", vec![forwarded]).expect("forwarded call");
        assert_eq!(answer, Value::Int(7));
    }
}

mod concurrency_tests {
    use super::*;

    #[test]
    fn test_concurrent_callers_get_their_own_results() {
        let fixture = Fixture::new();
        let (_server, client) = open_pair(served(&fixture), Connection::builder());

        let handles: Vec<_> = (0..16i64)
            .map(|i| {
                let client = client.clone();
                thread::spawn(move || {
                    for round in 0..50i64 {
                        let sent = Value::List(vec![Value::Int(i), Value::Int(round)]);
                        let back = client.call("echo", vec![sent.clone()]).expect("echo");
                        assert_eq!(back, sent);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("caller thread");
        }
    }

    #[test]
    fn test_later_reply_overtakes_blocked_caller() {
        let fixture = Fixture::new();
        let (_server, client) = open_pair(served(&fixture), Connection::builder());

        let slow = {
            let client = client.clone();
            thread::spawn(move || client.call("wait", vec![Value::Int(1)]))
        };
        assert!(wait_until(|| client.pending_count() == 1));

        let fast = client.call("echo", vec![Value::Int(2)]).expect("echo");
        assert_eq!(fast, Value::Int(2));
        assert!(!slow.is_finished());

        fixture.open.send(()).expect("open gate");
        let slow = slow.join().expect("slow caller").expect("wait");
        assert_eq!(slow, Value::Int(1));
    }

    #[test]
    fn test_ten_thousand_increments() {
        init_tracing();
        let counter = SharedMap::with_entries([(Value::sym("counter"), Value::Int(1))]);
        let (server, client) =
            open_pair(Connection::builder(), Connection::builder().root_object(counter));

        for _ in 0..10_000 {
            server
                .call("increment", vec![Value::sym("counter")])
                .expect("increment");
        }

        let total = server.call("get", vec![Value::sym("counter")]).expect("read");
        assert_eq!(total, Value::Int(10_001));
        assert_eq!(client.stats().calls_served, 10_001);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        init_tracing();
        let counter = SharedMap::with_entries([(Value::sym("counter"), Value::Int(1))]);
        let (_server, client) =
            open_pair(Connection::builder().root_object(counter), Connection::builder());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        client
                            .call("increment", vec![Value::sym("counter")])
                            .expect("increment");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("incrementing thread");
        }

        let total = client.call("[]", vec![Value::sym("counter")]).expect("read");
        assert_eq!(total, Value::Int(2_001));
    }

    #[test]
    fn test_close_fails_every_blocked_caller() {
        let fixture = Fixture::new();
        let (_server, client) = open_pair(served(&fixture), Connection::builder());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                thread::spawn(move || client.call("wait", vec![]))
            })
            .collect();
        assert!(wait_until(|| client.pending_count() == 4));

        client.close().expect("close");
        for handle in handles {
            let result = handle.join().expect("caller thread");
            assert!(matches!(result, Err(RpcError::Connection(_))));
        }

        client.join();
        assert!(client.is_closed());
        let after = client.call("echo", vec![Value::Int(1)]);
        assert!(matches!(after, Err(RpcError::Connection(_))));
    }

    #[test]
    fn test_peer_disconnect_closes_connection() {
        let fixture = Fixture::new();
        let (server, client) = open_pair(served(&fixture), Connection::builder());

        client.close().expect("close");
        assert!(wait_until(|| server.is_closed()));
        server.join();
        assert_eq!(server.exported_count(), 0);
    }
}

mod release_tests {
    use super::*;

    #[test]
    fn test_dropping_last_proxy_releases_remote_object() {
        let fixture = Fixture::new();
        let (server, client) = open_pair(served(&fixture), Connection::builder());

        let map = client.call("new_map", vec![]).expect("new_map");
        let copy = map.clone();
        assert_eq!(server.exported_count(), 1);

        drop(map);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(server.exported_count(), 1, "a clone is still alive");

        drop(copy);
        assert!(wait_until(|| server.exported_count() == 0));
        assert!(wait_until(|| server.stats().releases_received == 1));
    }

    #[test]
    fn test_released_id_is_not_found() {
        let fixture = Fixture::new();
        let (server, client) = open_pair(served(&fixture), Connection::builder());

        let map = client.call("new_map", vec![]).expect("new_map");
        let id = map.as_proxy().expect("proxy").remote_id();
        drop(map);
        assert!(wait_until(|| server.exported_count() == 0));

        let stale = client.proxy_for(id);
        let err = stale.call("size", vec![]).expect_err("released");
        assert!(matches!(err, RpcError::ReferenceNotFound(m) if m.contains("not found")));
    }

    #[test]
    fn test_release_of_unknown_or_released_id_is_ignored() {
        let fixture = Fixture::new();
        let (server, client) = open_pair(served(&fixture), Connection::builder());

        drop(client.proxy_for(ObjectId(9_999)));
        drop(client.proxy_for(ObjectId(9_999)));
        assert!(wait_until(|| server.stats().releases_received == 2));

        assert!(!server.is_closed());
        assert_eq!(client.call("number", vec![]).expect("still usable"), Value::Int(42));
    }

    #[test]
    fn test_root_proxy_is_never_released() {
        let fixture = Fixture::new();
        let (server, client) = open_pair(served(&fixture), Connection::builder());

        let root = client.proxy_for(ObjectId::ROOT);
        drop(root);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(server.stats().releases_received, 0);
        assert_eq!(client.call("number", vec![]).expect("root"), Value::Int(42));
    }
}

mod security_tests {
    use super::*;

    #[test]
    fn test_denied_method_is_never_executed() {
        let fixture = Fixture::new();
        let (server, client) = open_pair(served(&fixture), Connection::builder());

        let err = client.call("send", vec![]).expect_err("denied");
        assert!(matches!(err, RpcError::SecurityViolation(_)));
        assert_eq!(fixture.executed.load(Ordering::SeqCst), 0);
        assert_eq!(server.stats().security_violations, 1);
    }

    #[test]
    fn test_custom_policy() {
        let fixture = Fixture::new();
        let (_server, client) = open_pair(
            served(&fixture).policy(AllowList::new(["echo"])),
            Connection::builder(),
        );

        assert_eq!(client.call("echo", vec![Value::Int(1)]).expect("allowed"), Value::Int(1));
        let err = client.call("number", vec![]).expect_err("not allowed");
        assert!(matches!(err, RpcError::SecurityViolation(m) if m.contains("number")));
    }

    #[test]
    fn test_underscore_call_fails_locally() {
        let fixture = Fixture::new();
        let (server, client) = open_pair(served(&fixture), Connection::builder());

        let err = client.call("_secret", vec![]).expect_err("internal");
        assert!(matches!(err, RpcError::NoSuchMethod(_)));
        assert_eq!(server.stats().frames_received, 0);
        assert_eq!(fixture.executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_root_object() {
        let fixture = Fixture::new();
        let (server, _client) = open_pair(served(&fixture), Connection::builder());

        let err = server.call("anything", vec![]).expect_err("no root on client");
        assert!(matches!(err, RpcError::ReferenceNotFound(m) if m.contains("No root")));
    }
}

mod transport_tests {
    use super::*;

    #[test]
    fn test_json_serializer_connection() {
        let fixture = Fixture::new();
        let json = ConnectionConfig::builder()
            .serializer(SerializerKind::Json)
            .build()
            .expect("config");
        let (_server, client) = open_pair(
            served(&fixture).config(json.clone()),
            Connection::builder().config(json),
        );
        assert_eq!(
            client.call("echo", vec![Value::from("json")]).expect("echo"),
            Value::from("json")
        );
    }

    #[test]
    fn test_unencodable_value_fails_only_its_call() {
        let fixture = Fixture::new();
        let json = ConnectionConfig::builder()
            .serializer(SerializerKind::Json)
            .build()
            .expect("config");
        let (server, client) = open_pair(
            served(&fixture).config(json.clone()),
            Connection::builder().config(json),
        );

        let sent = client.call("echo", vec![Value::Float(f64::NAN)]);
        assert!(matches!(sent, Err(RpcError::Protocol(_))));

        let returned = client.call("nan", vec![]);
        assert!(matches!(returned, Err(RpcError::Protocol(_))));

        let block = |_: Vec<Value>| -> RpcResult<Value> { Ok(Value::Float(f64::INFINITY)) };
        let from_block = client
            .root()
            .call_with_block("yield_pair", vec![], Some(&block));
        assert!(matches!(from_block, Err(RpcError::Protocol(_))));

        assert_eq!(client.call("number", vec![]).expect("number"), Value::Int(42));
        assert!(!client.is_closed());
        assert!(!server.is_closed());
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn test_too_deeply_nested_value_fails_only_its_call() {
        let fixture = Fixture::new();
        let (server, client) = open_pair(served(&fixture), Connection::builder());

        let deep = (0..=MAX_NESTING).fold(Value::Nil, |inner, _| Value::List(vec![inner]));
        let result = client.call("echo", vec![deep]);
        assert!(matches!(result, Err(RpcError::Protocol(m)) if m.contains("nested")));
        assert_eq!(client.call("number", vec![]).expect("number"), Value::Int(42));
        assert!(!server.is_closed());
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_socket_pair() {
        init_tracing();
        let (a, b) = std::os::unix::net::UnixStream::pair().expect("socket pair");
        let fixture = Fixture::new();
        let _server = served(&fixture).open(a).expect("server side");
        let client = Connection::open(b, None).expect("client side");
        assert_eq!(client.call("number", vec![]).expect("number"), Value::Int(42));
    }

    #[test]
    fn test_server_accepts_clients() {
        init_tracing();
        let server = Server::bind(ServerConfig::bind("127.0.0.1", 0), Arc::new(SharedMap::new()))
            .expect("bind");
        let endpoint = server.local_addr().to_string();

        let a = Connection::connect(&endpoint).expect("client a");
        let b = Connection::connect(&endpoint).expect("client b");
        a.call("[]=", vec![Value::sym("k"), Value::Int(1)]).expect("set");
        assert_eq!(b.call("[]", vec![Value::sym("k")]).expect("get"), Value::Int(1));
        assert!(wait_until(|| server.connections().len() == 2));

        server.shutdown();
        assert!(wait_until(|| a.is_closed() && b.is_closed()));
        server.join();
    }
}

mod wire_level_tests {
    use super::*;
    use remote_objects::message::{Call, Release, Return};

    /// Hand-driven peer speaking the raw protocol.
    struct RawPeer {
        stream: TcpStream,
        codec: FrameCodec,
        serializer: BincodeSerializer,
        decoder: MessageDecoder,
        next: u64,
    }

    impl RawPeer {
        fn new(stream: TcpStream) -> Self {
            Self {
                stream,
                codec: FrameCodec::new(),
                serializer: BincodeSerializer,
                decoder: MessageDecoder::new(true),
                next: 100,
            }
        }

        fn send_frame(&mut self, bytes: &[u8]) {
            self.codec.write_frame(&mut self.stream, bytes).expect("write");
        }

        fn send_envelope(&mut self, envelope: &[WireValue]) {
            let bytes = self.serializer.serialize(envelope).expect("serialize");
            self.codec.write_frame(&mut self.stream, &bytes).expect("write");
        }

        fn send(&mut self, message: &Message) {
            self.send_envelope(&message.to_envelope());
        }

        fn recv(&mut self) -> Message {
            let frame = self.codec.read_frame(&mut self.stream).expect("read");
            let envelope = self.serializer.deserialize(&frame).expect("deserialize");
            self.decoder.decode(envelope).expect("decode")
        }

        fn call(&mut self, method: &str, args: Vec<WireValue>, by_ref: bool) -> Return {
            self.next += 1;
            let call = Call {
                caller: CallId(self.next),
                target: ObjectId::ROOT,
                method: Some(method.to_string()),
                args,
                has_block: false,
            };
            self.send(&if by_ref { Message::RefCall(call) } else { Message::Call(call) });
            match self.recv() {
                Message::Return(ret) if ret.id == CallId(self.next) => ret,
                other => panic!("unexpected reply {other:?}"),
            }
        }
    }

    fn raw_pair(builder: ConnectionBuilder) -> (Connection, RawPeer) {
        init_tracing();
        let (s, c) = tcp_pair();
        (builder.open(s).expect("server side"), RawPeer::new(c))
    }

    fn error_kind(ret: &Return) -> Option<&str> {
        match &ret.payload {
            WireValue::Error(e) if ret.is_error => Some(e.kind.as_str()),
            _ => None,
        }
    }

    #[test]
    fn test_internal_method_rejected_on_the_wire() {
        let fixture = Fixture::new();
        let (_server, mut raw) = raw_pair(served(&fixture));

        let ret = raw.call("_secret", vec![], false);
        assert_eq!(error_kind(&ret), Some("SecurityViolationError"));
        assert_eq!(fixture.executed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ref_call_tag_without_opt_in_is_plain_call() {
        let fixture = Fixture::new();
        let (_server, mut raw) = raw_pair(served(&fixture));

        let ret = raw.call("number", vec![], true);
        assert_eq!(ret.payload, WireValue::Int(42));
        assert!(!ret.is_error);
    }

    #[test]
    fn test_exported_result_carries_lid() {
        let fixture = Fixture::new();
        let (server, mut raw) = raw_pair(served(&fixture));

        let ret = raw.call("new_map", vec![], false);
        let WireValue::Lid(id) = ret.payload else {
            panic!("expected an exported object, got {:?}", ret.payload);
        };
        assert!(!id.is_root());
        assert_eq!(server.exported_count(), 1);

        raw.send(&Message::Release(Release { id }));
        raw.send(&Message::Release(Release { id }));
        assert!(wait_until(|| server.exported_count() == 0));
        let ret = raw.call("number", vec![], false);
        assert_eq!(ret.payload, WireValue::Int(42));
    }

    #[test]
    fn test_lid_with_root_id_is_rejected() {
        let fixture = Fixture::new();
        let (server, mut raw) = raw_pair(served(&fixture));

        let ret = raw.call("echo", vec![WireValue::Lid(ObjectId::ROOT)], false);
        assert_eq!(error_kind(&ret), Some("ProtocolError"));
        assert!(!server.is_closed());
    }

    #[test]
    fn test_rid_zero_resolves_to_root() {
        let fixture = Fixture::new();
        let (_server, mut raw) = raw_pair(served(&fixture));

        let ret = raw.call(
            "same?",
            vec![WireValue::Rid(ObjectId::ROOT), WireValue::Rid(ObjectId::ROOT)],
            false,
        );
        assert_eq!(ret.payload, WireValue::Bool(true));
    }

    #[test]
    fn test_deeply_nested_frame_closes_only_that_connection() {
        let fixture = Fixture::new();
        let (victim, mut raw) = raw_pair(served(&fixture));
        let (_other_server, other_client) = open_pair(served(&fixture), Connection::builder());

        // bincode for `[List([List([... Nil])])]`, 200k levels deep
        let levels = 200_000;
        let mut bytes = Vec::with_capacity(8 + levels * 12 + 4);
        bytes.extend_from_slice(&1u64.to_le_bytes());
        for _ in 0..levels {
            bytes.extend_from_slice(&8u32.to_le_bytes());
            bytes.extend_from_slice(&1u64.to_le_bytes());
        }
        bytes.extend_from_slice(&0u32.to_le_bytes());
        raw.send_frame(&bytes);

        assert!(wait_until(|| victim.is_closed()));
        victim.join();
        assert_eq!(
            other_client.call("number", vec![]).expect("number"),
            Value::Int(42)
        );
    }

    #[test]
    fn test_unknown_tag_closes_connection() {
        let fixture = Fixture::new();
        let (server, mut raw) = raw_pair(served(&fixture));

        raw.send_envelope(&[WireValue::Uint(9), WireValue::Nil]);
        assert!(wait_until(|| server.is_closed()));
    }
}
