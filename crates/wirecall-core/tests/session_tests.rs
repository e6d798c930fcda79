//! Session behavior over the in-memory transport.
//!
//! The far end is either another `Session` or a scripted peer that speaks
//! the frame codec by hand.

use async_trait::async_trait;
use bytes::BytesMut;
use serde_json::{json, Value};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use wirecall::{
    Action, ActionRegistry, BoxedStream, ConnectOutcome, Connector, DisconnectReason,
    InboundCall, JsonFrameCodec, MemoryAcceptor, MemoryConnector, Message, MessageCodec,
    ReconnectOutcome, Reply, Session, SessionEvent, SessionOptions, SessionState, WirecallError,
};

/// Hand-driven far end of a memory pipe.
struct ScriptedPeer {
    stream: DuplexStream,
    codec: JsonFrameCodec,
    buf: BytesMut,
}

impl ScriptedPeer {
    async fn accept(acceptor: &mut MemoryAcceptor) -> Self {
        let (_, stream) = acceptor.accept().await.unwrap();
        Self {
            stream,
            codec: JsonFrameCodec::new(),
            buf: BytesMut::new(),
        }
    }

    async fn recv(&mut self) -> Message {
        loop {
            if let Some(message) = self.codec.decode(&mut self.buf).unwrap() {
                return message;
            }
            let n = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert!(n > 0, "stream closed while waiting for a message");
        }
    }

    async fn recv_call(&mut self) -> InboundCall {
        match self.recv().await {
            Message::Call(call) => call,
            other => panic!("expected call, got {:?}", other),
        }
    }

    async fn recv_reply(&mut self) -> Reply {
        match self.recv().await {
            Message::Reply(reply) => reply,
            other => panic!("expected reply, got {:?}", other),
        }
    }

    async fn send(&mut self, message: Message) {
        let mut out = BytesMut::new();
        self.codec.encode(&message, &mut out).unwrap();
        self.stream.write_all(&out).await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }
}

/// Connector that counts attempts and waits before delegating.
struct SlowConnector {
    inner: MemoryConnector,
    delay: Duration,
    attempts: AtomicUsize,
}

#[async_trait]
impl Connector for SlowConnector {
    async fn connect(&self, endpoint: &str) -> io::Result<BoxedStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.connect(endpoint).await
    }
}

/// Connector whose attempts never complete.
struct BlackHole;

#[async_trait]
impl Connector for BlackHole {
    async fn connect(&self, _endpoint: &str) -> io::Result<BoxedStream> {
        futures::future::pending::<()>().await;
        Err(io::Error::new(io::ErrorKind::Other, "unreachable"))
    }
}

fn echo_registry() -> Arc<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    registry
        .register(
            Action::builder("Echo")
                .param::<String>()
                .returns::<String>()
                .handler(|_ctx, args| async move { args.get::<String>(0) })
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            Action::builder("Record")
                .param::<String>()
                .handler(|ctx, args| async move {
                    let text: String = args.get(0)?;
                    ctx.session().tags().set("last", text)?;
                    Ok::<_, WirecallError>(())
                })
                .build()
                .unwrap(),
        )
        .unwrap();
    Arc::new(registry)
}

async fn connect_scripted(options: SessionOptions) -> (Session, ScriptedPeer, MemoryAcceptor) {
    let (connector, mut acceptor) = MemoryConnector::pair();
    let session = Session::builder()
        .connector(Arc::new(connector))
        .registry(echo_registry())
        .options(options)
        .build();
    session.connect("mem://peer").await.unwrap();
    let peer = ScriptedPeer::accept(&mut acceptor).await;
    (session, peer, acceptor)
}

#[tokio::test]
async fn test_end_to_end_echo_reply_and_timeout() {
    let (session, mut peer, _acceptor) = connect_scripted(SessionOptions::default()).await;

    // Inbound call is dispatched to the local Echo action.
    peer.send(Message::Call(InboundCall::new(Some(7), "Echo", vec![json!("hi")])))
        .await;
    assert_eq!(peer.recv_reply().await, Reply::success(7, json!("hi")));

    // Outbound call resolved by the peer's reply.
    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.call::<String>("Ping", vec![]).await })
    };
    let call = peer.recv_call().await;
    assert_eq!(call.action, "Ping");
    let id = call.id.unwrap();
    peer.send(Message::Reply(Reply::success(id, json!("pong"))))
        .await;
    assert_eq!(pending.await.unwrap().unwrap(), "pong");

    // Outbound call that never gets a reply.
    let pending = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .call_with_timeout::<String>("Ping", vec![], Duration::from_millis(100))
                .await
        })
    };
    let unanswered = peer.recv_call().await;
    assert!(unanswered.id.is_some());
    assert!(matches!(
        pending.await.unwrap(),
        Err(WirecallError::Timeout(_))
    ));
    assert_eq!(session.pending_calls(), 0);

    // A late reply is ignored and the session stays usable.
    peer.send(Message::Reply(Reply::success(unanswered.id.unwrap(), json!("late"))))
        .await;
    peer.send(Message::Call(InboundCall::new(Some(8), "Echo", vec![json!("still here")])))
        .await;
    assert_eq!(peer.recv_reply().await, Reply::success(8, json!("still here")));
}

#[tokio::test]
async fn test_sweep_times_out_unanswered_calls() {
    let options = SessionOptions::default()
        .with_call_timeout(Duration::from_millis(80))
        .with_sweep_interval(Duration::from_millis(10));
    let (session, mut peer, _acceptor) = connect_scripted(options).await;

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.call::<String>("Slow", vec![]).await })
    };
    peer.recv_call().await;

    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(WirecallError::Timeout(_))), "{:?}", result);
    assert_eq!(session.pending_calls(), 0);
}

#[tokio::test]
async fn test_longer_call_deadline_outlives_session_timeout() {
    let options = SessionOptions::default()
        .with_call_timeout(Duration::from_millis(100))
        .with_sweep_interval(Duration::from_millis(10));
    let (session, mut peer, _acceptor) = connect_scripted(options).await;

    let pending = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .call_with_timeout::<String>("Slow", vec![], Duration::from_secs(2))
                .await
        })
    };
    let call = peer.recv_call().await;

    // Several sweeps past the session default go by before the reply.
    tokio::time::sleep(Duration::from_millis(300)).await;
    peer.send(Message::Reply(Reply::success(call.id.unwrap(), json!("done"))))
        .await;

    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.unwrap(), "done");
}

#[tokio::test]
async fn test_remote_failure_reaches_caller() {
    let (session, mut peer, _acceptor) = connect_scripted(SessionOptions::default()).await;

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.call::<i64>("Divide", vec![json!(1), json!(0)]).await })
    };
    let call = peer.recv_call().await;
    assert_eq!(call.args, vec![json!(1), json!(0)]);
    peer.send(Message::Reply(Reply::failure(call.id.unwrap(), -32603, "division by zero")))
        .await;

    match pending.await.unwrap() {
        Err(WirecallError::Remote { code, message }) => {
            assert_eq!(code, -32603);
            assert_eq!(message, "division by zero");
        }
        other => panic!("expected remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_undecodable_reply_is_local_serialization_error() {
    let (session, mut peer, _acceptor) = connect_scripted(SessionOptions::default()).await;

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.call::<i64>("Count", vec![]).await })
    };
    let call = peer.recv_call().await;
    peer.send(Message::Reply(Reply::success(call.id.unwrap(), json!({"n": 1}))))
        .await;

    assert!(matches!(
        pending.await.unwrap(),
        Err(WirecallError::Serialization { .. })
    ));
}

#[tokio::test]
async fn test_notification_gets_no_reply() {
    let (session, mut peer, _acceptor) = connect_scripted(SessionOptions::default()).await;

    peer.send(Message::Call(InboundCall::new(None, "Record", vec![json!("quiet")])))
        .await;
    peer.send(Message::Call(InboundCall::new(Some(2), "Echo", vec![json!("loud")])))
        .await;

    // The first thing the peer hears back is the reply to the second call.
    assert_eq!(peer.recv_reply().await, Reply::success(2, json!("loud")));

    for _ in 0..100 {
        if session.tags().contains("last") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(session.tags().get("last"), Some(json!("quiet")));
}

#[tokio::test]
async fn test_void_action_with_id_replies_null() {
    let (_session, mut peer, _acceptor) = connect_scripted(SessionOptions::default()).await;

    peer.send(Message::Call(InboundCall::new(Some(3), "Record", vec![json!("x")])))
        .await;
    assert_eq!(peer.recv_reply().await, Reply::success(3, Value::Null));
}

#[tokio::test]
async fn test_outbound_notify_has_no_id() {
    let (session, mut peer, _acceptor) = connect_scripted(SessionOptions::default()).await;

    session.notify("OnChatMessage", vec![json!("hello")]).await.unwrap();
    assert!(session.try_notify("OnChatMessage", vec![json!("again")]).await);

    for expected in ["hello", "again"] {
        let call = peer.recv_call().await;
        assert_eq!(call.id, None);
        assert_eq!(call.args, vec![json!(expected)]);
    }
    assert_eq!(session.pending_calls(), 0);
}

#[tokio::test]
async fn test_bad_message_is_isolated() {
    let (session, mut peer, _acceptor) = connect_scripted(SessionOptions::default()).await;

    let garbage = b"{{{ not json";
    let mut frame = (garbage.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(garbage);
    peer.send_raw(&frame).await;

    peer.send(Message::Call(InboundCall::new(Some(1), "Missing", vec![])))
        .await;
    match peer.recv_reply().await.outcome {
        wirecall::ReplyOutcome::Failure { code, .. } => assert_eq!(code, -32601),
        other => panic!("expected failure reply, got {:?}", other),
    }

    peer.send(Message::Call(InboundCall::new(Some(2), "Echo", vec![json!("ok")])))
        .await;
    assert_eq!(peer.recv_reply().await, Reply::success(2, json!("ok")));
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_framing_fault_tears_down_and_fails_pending() {
    let (session, mut peer, _acceptor) = connect_scripted(SessionOptions::default()).await;
    let mut events = session.subscribe();

    let pending: Vec<_> = (0..3)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.call::<String>("Wait", vec![]).await })
        })
        .collect();
    for _ in 0..3 {
        peer.recv_call().await;
    }

    // A length prefix far above the frame limit.
    peer.send_raw(&u32::MAX.to_be_bytes()).await;

    for handle in pending {
        assert!(matches!(
            handle.await.unwrap(),
            Err(WirecallError::ConnectionClosed)
        ));
    }
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.pending_calls(), 0);

    loop {
        if let SessionEvent::Disconnected { reason, .. } = events.recv().await.unwrap() {
            assert!(matches!(reason, DisconnectReason::Fault(_)));
            break;
        }
    }
}

#[tokio::test]
async fn test_reconnect_after_peer_drop() {
    let (connector, mut acceptor) = MemoryConnector::pair();
    let connector = Arc::new(connector);
    let session = Session::builder().connector(connector.clone()).build();
    session.tags().set("name", "kim").unwrap();

    let first = session.connect("mem://chat").await.unwrap().connection_id();
    let peer = ScriptedPeer::accept(&mut acceptor).await;

    let mut state = session.watch_state();
    drop(peer);
    loop {
        let current = *state.borrow_and_update();
        if current == SessionState::Disconnected {
            break;
        }
        state.changed().await.unwrap();
    }

    let outcome = session.reconnect().await.unwrap();
    let second = match outcome {
        ReconnectOutcome::Reconnected(id) => id,
        other => panic!("expected a new connection, got {:?}", other),
    };
    assert_ne!(first, second);
    assert_eq!(connector.connect_count(), 2);
    assert_eq!(session.remote_endpoint().as_deref(), Some("mem://chat"));
    assert_eq!(session.tags().get_as::<String>("name").unwrap().as_deref(), Some("kim"));

    let (endpoint, _stream) = acceptor.accept().await.unwrap();
    assert_eq!(endpoint, "mem://chat");

    // Connected again: reconnect leaves the connection alone.
    assert_eq!(
        session.reconnect().await.unwrap(),
        ReconnectOutcome::NoOp(second)
    );
    assert_eq!(connector.connect_count(), 2);
}

#[tokio::test]
async fn test_concurrent_connects_share_one_attempt() {
    let (inner, mut acceptor) = MemoryConnector::pair();
    let connector = Arc::new(SlowConnector {
        inner,
        delay: Duration::from_millis(50),
        attempts: AtomicUsize::new(0),
    });
    let session = Session::builder().connector(connector.clone()).build();

    let (a, b, c) = tokio::join!(
        session.connect("mem://one"),
        session.connect("mem://one"),
        session.connect("mem://two"),
    );
    let a = a.unwrap();
    assert_eq!(a, b.unwrap());
    assert_eq!(a, c.unwrap());
    assert!(matches!(a, ConnectOutcome::Connected(_)));
    assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

    let (endpoint, _stream) = acceptor.accept().await.unwrap();
    assert_eq!(endpoint, "mem://one");

    let again = session.connect("mem://one").await.unwrap();
    assert_eq!(again, ConnectOutcome::AlreadyConnected(a.connection_id()));
}

#[tokio::test]
async fn test_connect_failure_leaves_session_disconnected() {
    let (connector, acceptor) = MemoryConnector::pair();
    drop(acceptor);
    let session = Session::builder().connector(Arc::new(connector)).build();

    match session.connect("mem://nobody").await {
        Err(WirecallError::ConnectFailed { endpoint, .. }) => assert_eq!(endpoint, "mem://nobody"),
        other => panic!("expected connect failure, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(session.connection_id().is_none());

    // The endpoint is remembered for a later reconnect attempt.
    assert_eq!(session.remote_endpoint().as_deref(), Some("mem://nobody"));
    assert!(matches!(
        session.reconnect().await,
        Err(WirecallError::ConnectFailed { .. })
    ));
}

#[tokio::test]
async fn test_connect_timeout() {
    let options = SessionOptions::default().with_connect_timeout(Duration::from_millis(50));
    let session = Session::builder()
        .connector(Arc::new(BlackHole))
        .options(options)
        .build();

    match session.connect("mem://void").await {
        Err(WirecallError::ConnectFailed { message, .. }) => assert!(message.contains("timed out")),
        other => panic!("expected connect timeout, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn test_two_sessions_call_each_other() {
    let (connector, mut acceptor) = MemoryConnector::pair();
    let client = Session::builder()
        .connector(Arc::new(connector))
        .registry(echo_registry())
        .build();
    let server = Session::builder()
        .without_connector()
        .registry(echo_registry())
        .build();
    let mut server_events = server.subscribe();

    let accept = {
        let server = server.clone();
        tokio::spawn(async move {
            let (remote, stream) = acceptor.accept().await.unwrap();
            server.attach(Box::new(stream), remote).unwrap();
        })
    };
    client.connect("mem://server").await.unwrap();
    accept.await.unwrap();

    let reply: String = client.call("Echo", vec![json!("hi")]).await.unwrap();
    assert_eq!(reply, "hi");
    let reply: String = server.call("Echo", vec![json!(12)]).await.unwrap();
    assert_eq!(reply, "12");

    loop {
        if let SessionEvent::CallCompleted { action, success, .. } =
            server_events.recv().await.unwrap()
        {
            assert_eq!(action, "Echo");
            assert!(success);
            break;
        }
    }
}
