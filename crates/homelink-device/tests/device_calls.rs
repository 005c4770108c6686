//! Call correlation, timeout and event dispatch against a scripted
//! transport.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use homelink_device::{Device, DeviceError, MessageSet, MessageType, Value, ValueError};
use homelink_transport::{Transport, TransportError, TransportEvent};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;

/// In-process transport whose inbound side is scripted by the test.
struct StubTransport {
    events: broadcast::Sender<TransportEvent>,
    connected_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    writes: mpsc::UnboundedSender<Bytes>,
    identifier_len: usize,
    bound: Mutex<HashSet<Vec<u8>>>,
}

fn stub(identifier_len: usize) -> (Arc<StubTransport>, mpsc::UnboundedReceiver<Bytes>) {
    let (events, _) = broadcast::channel(256);
    let (connected_tx, connected_rx) = watch::channel(true);
    let (writes, writes_rx) = mpsc::unbounded_channel();
    (
        Arc::new(StubTransport {
            events,
            connected_tx,
            connected_rx,
            writes,
            identifier_len,
            bound: Mutex::new(HashSet::new()),
        }),
        writes_rx,
    )
}

impl StubTransport {
    fn inject(&self, body: impl AsRef<[u8]>) {
        let _ = self
            .events
            .send(TransportEvent::Frame(Bytes::copy_from_slice(body.as_ref())));
    }

    fn drop_link(&self) {
        self.connected_tx.send_replace(false);
        let _ = self.events.send(TransportEvent::Disconnected);
    }
}

impl Transport for StubTransport {
    fn connect(&self) {}
    fn disconnect(&self) {}
    fn reconnect(&self) {}

    fn write(&self, body: Bytes) -> homelink_transport::Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let _ = self.writes.send(body);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    fn identifier_len(&self) -> usize {
        self.identifier_len
    }

    fn bind_identifier(&self, ident: &[u8]) -> homelink_transport::Result<()> {
        if ident.len() != self.identifier_len {
            return Err(TransportError::IdentifierWidth {
                expected: self.identifier_len,
                actual: ident.len(),
            });
        }
        if !self.bound.lock().unwrap().insert(ident.to_vec()) {
            return Err(TransportError::DuplicateIdentifier(format!("{ident:02x?}")));
        }
        Ok(())
    }
}

fn u8_codec(name: &str) -> MessageType {
    MessageType::new(
        name,
        |value| {
            let n = value.as_int()?;
            Ok(Bytes::copy_from_slice(&[n as u8]))
        },
        |payload| match payload {
            [n] => Ok(Value::Int(*n as i64)),
            _ => Err(ValueError::Truncated {
                expected: 1,
                found: payload.len(),
            }),
        },
    )
}

async fn next_write(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Bytes {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a write")
        .expect("write channel closed")
}

#[tokio::test]
async fn worked_example_roundtrip() {
    let (transport, mut writes) = stub(0);
    let mut set = MessageSet::new();
    set.register(u8_codec("status").head(&[0x02, 0x00][..])).unwrap();
    let device = Device::bind(transport.clone(), None, set).unwrap();

    let call = tokio::spawn({
        let device = device.clone();
        async move { device.request("status", Value::Int(7)).await }
    });

    // Wire body: [id][head][payload]; the transport adds the length
    // preamble below this layer.
    let body = next_write(&mut writes).await;
    assert_eq!(body.len(), 4);
    let id = body[0];
    assert!((0x01..=0xFE).contains(&id));
    assert_eq!(&body[1..], &[0x02, 0x00, 0x07]);

    transport.inject([id, 0x2A]);
    let value = call.await.unwrap().unwrap();
    assert_eq!(value, Value::Int(42));
}

#[tokio::test]
async fn unknown_message_name_fails_immediately() {
    let (transport, _writes) = stub(0);
    let device = Device::bind(transport, None, MessageSet::new()).unwrap();

    let err = device.request("nope", Value::Null).await.unwrap_err();
    assert!(matches!(err, DeviceError::UnknownMessage(name) if name == "nope"));
}

#[tokio::test]
async fn concurrent_call_ids_are_distinct_and_bounded() {
    let (transport, mut writes) = stub(0);
    let mut set = MessageSet::new();
    set.register(u8_codec("slow").timeout(Duration::from_secs(30))).unwrap();
    let device = Device::bind(transport.clone(), None, set).unwrap();

    let mut calls = Vec::new();
    for _ in 0..254 {
        let device = device.clone();
        calls.push(tokio::spawn(async move {
            device.request("slow", Value::Int(1)).await
        }));
    }

    let mut ids = HashSet::new();
    for _ in 0..254 {
        let body = next_write(&mut writes).await;
        assert!(ids.insert(body[0]), "call id {} reused", body[0]);
    }
    assert_eq!(ids.len(), 254);

    // The pool is exhausted; the next call must fail fast instead of
    // searching forever.
    let err = device.request("slow", Value::Int(1)).await.unwrap_err();
    assert!(matches!(err, DeviceError::CallsExhausted));

    // Disconnection drains exactly the pending set.
    transport.drop_link();
    let mut aborted = 0;
    for call in calls {
        match call.await.unwrap() {
            Err(DeviceError::Aborted) => aborted += 1,
            other => panic!("expected Aborted, got {other:?}"),
        }
    }
    assert_eq!(aborted, 254);
}

#[tokio::test]
async fn timeout_rejects_only_the_silent_call() {
    let (transport, mut writes) = stub(0);
    let mut set = MessageSet::new();
    set.register(u8_codec("fast").timeout(Duration::from_millis(100))).unwrap();
    set.register(u8_codec("slow").timeout(Duration::from_secs(10)).head(&[0x01][..]))
        .unwrap();
    let device = Device::bind(transport.clone(), None, set).unwrap();

    let fast = tokio::spawn({
        let device = device.clone();
        async move { device.request("fast", Value::Int(1)).await }
    });
    let slow = tokio::spawn({
        let device = device.clone();
        async move { device.request("slow", Value::Int(2)).await }
    });

    let first = next_write(&mut writes).await;
    let second = next_write(&mut writes).await;
    let slow_id = if first.len() > 2 { first[0] } else { second[0] };

    let started = Instant::now();
    let err = fast.await.unwrap().unwrap_err();
    let elapsed = started.elapsed();
    assert!(matches!(err, DeviceError::Timeout { ref name, .. } if name == "fast"));
    assert!(elapsed < Duration::from_secs(2), "timeout fired far too late");

    // The sibling call is unaffected and still resolves.
    transport.inject([slow_id, 0x09]);
    assert_eq!(slow.await.unwrap().unwrap(), Value::Int(9));
}

#[tokio::test]
async fn late_response_after_timeout_is_dropped() {
    let (transport, mut writes) = stub(0);
    let mut set = MessageSet::new();
    set.register(u8_codec("fast").timeout(Duration::from_millis(50))).unwrap();
    let device = Device::bind(transport.clone(), None, set).unwrap();

    let call = tokio::spawn({
        let device = device.clone();
        async move { device.request("fast", Value::Int(1)).await }
    });
    let body = next_write(&mut writes).await;
    let id = body[0];

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, DeviceError::Timeout { .. }));

    // The id was freed on timeout; a response for it now goes nowhere.
    transport.inject([id, 0x2A]);

    // The device still serves fresh calls.
    let call = tokio::spawn({
        let device = device.clone();
        async move { device.request("fast", Value::Int(2)).await }
    });
    let body = next_write(&mut writes).await;
    transport.inject([body[0], 0x05]);
    assert_eq!(call.await.unwrap().unwrap(), Value::Int(5));
}

#[tokio::test]
async fn quiet_types_resolve_null_on_decode_failure() {
    let (transport, mut writes) = stub(0);
    let mut set = MessageSet::new();
    set.register(u8_codec("noisy").quiet()).unwrap();
    set.register(u8_codec("strict").head(&[0x01][..])).unwrap();
    let device = Device::bind(transport.clone(), None, set).unwrap();

    let noisy = tokio::spawn({
        let device = device.clone();
        async move { device.request("noisy", Value::Int(1)).await }
    });
    let body = next_write(&mut writes).await;
    // Two payload bytes where the decoder expects one.
    transport.inject([body[0], 0xAA, 0xBB]);
    assert_eq!(noisy.await.unwrap().unwrap(), Value::Null);

    let strict = tokio::spawn({
        let device = device.clone();
        async move { device.request("strict", Value::Int(1)).await }
    });
    let body = next_write(&mut writes).await;
    transport.inject([body[0], 0xAA, 0xBB]);
    let err = strict.await.unwrap().unwrap_err();
    assert!(matches!(err, DeviceError::Decode { ref name, .. } if name == "strict"));
}

#[tokio::test]
async fn write_failure_rejects_the_call() {
    let (transport, _writes) = stub(0);
    let mut set = MessageSet::new();
    set.register(u8_codec("status")).unwrap();
    let device = Device::bind(transport.clone(), None, set).unwrap();

    transport.connected_tx.send_replace(false);
    let err = device.request("status", Value::Int(1)).await.unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Transport(TransportError::NotConnected)
    ));
}

#[tokio::test]
async fn events_are_decoded_and_republished() {
    let (transport, _writes) = stub(0);
    let mut set = MessageSet::new();
    set.register(
        u8_codec("motion")
            .head(&[0x05, 0x01][..])
            .event("motion_detected", |payload| match payload {
                [n] => Ok(Value::Int(*n as i64)),
                _ => Err(ValueError::Truncated {
                    expected: 1,
                    found: payload.len(),
                }),
            }),
    )
    .unwrap();
    let device = Device::bind(transport.clone(), None, set).unwrap();
    let mut events = device.events();

    // Unmatched event frames disappear without a trace.
    transport.inject([0x00, 0x99, 0x99]);
    // Keep-alive acknowledgements are ignored.
    transport.inject([0xFF]);

    transport.inject([0x00, 0x05, 0x01, 0x03]);
    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .unwrap();
    assert_eq!(event.name, "motion_detected");
    assert_eq!(event.value, Value::Int(3));
    assert!(event.service.is_none());

    // Nothing else was republished.
    assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());
}

#[tokio::test]
async fn multiplexed_devices_filter_by_identifier() {
    let (transport, mut writes) = stub(2);

    let mut set_a = MessageSet::new();
    set_a
        .register(u8_codec("tick").event("tick", |p| Ok(Value::Int(p[0] as i64))))
        .unwrap();
    let device_a = Device::bind(transport.clone(), Some(&[0x10, 0x01]), set_a).unwrap();

    let mut set_b = MessageSet::new();
    set_b
        .register(u8_codec("tick").event("tick", |p| Ok(Value::Int(p[0] as i64))))
        .unwrap();
    let device_b = Device::bind(transport.clone(), Some(&[0x10, 0x02]), set_b).unwrap();

    // Identifier collisions and width mismatches fail at bind time.
    let err = Device::bind(transport.clone(), Some(&[0x10, 0x01]), MessageSet::new()).unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Transport(TransportError::DuplicateIdentifier(_))
    ));
    let err = Device::bind(transport.clone(), None, MessageSet::new()).unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Transport(TransportError::IdentifierWidth { expected: 2, actual: 0 })
    ));

    // Outbound frames carry the identifier prefix.
    let call = tokio::spawn({
        let device = device_a.clone();
        async move { device.request("tick", Value::Int(1)).await }
    });
    let body = next_write(&mut writes).await;
    assert_eq!(&body[..2], &[0x10, 0x01]);
    let id = body[2];
    transport.inject([0x10, 0x01, id, 0x07]);
    assert_eq!(call.await.unwrap().unwrap(), Value::Int(7));

    // Inbound events only reach the device whose identifier matches.
    let mut events_a = device_a.events();
    let mut events_b = device_b.events();
    transport.inject([0x10, 0x01, 0x00, 0x04]);

    let event = timeout(Duration::from_secs(2), events_a.recv())
        .await
        .expect("device A should see its event")
        .unwrap();
    assert_eq!(event.value, Value::Int(4));
    assert!(timeout(Duration::from_millis(100), events_b.recv()).await.is_err());
}

#[tokio::test]
async fn services_scope_requests_and_events() {
    let (transport, mut writes) = stub(0);
    let device = Device::bind(transport.clone(), None, MessageSet::new()).unwrap();

    let mut buttons = MessageSet::new();
    buttons
        .register(
            u8_codec("read")
                .head(&[0x01][..])
                .event("pressed", |p| Ok(Value::Int(p[0] as i64))),
        )
        .unwrap();
    let service = device.service([0x21], buttons).unwrap();
    assert_eq!(service.sub_identifier(), &[0x21]);

    // Same sub-identifier twice is a configuration bug.
    let err = device.service([0x21], MessageSet::new()).unwrap_err();
    assert!(matches!(err, DeviceError::DuplicateService(_)));
    let err = device.service([0u8; 0], MessageSet::new()).unwrap_err();
    assert!(matches!(err, DeviceError::EmptySubIdentifier));

    // Requests carry the sub-identifier between call id and head.
    let call = tokio::spawn({
        let service = service.clone();
        async move { service.request("read", Value::Int(0)).await }
    });
    let body = next_write(&mut writes).await;
    let id = body[0];
    assert_eq!(&body[1..], &[0x21, 0x01, 0x00]);
    transport.inject([id, 0x02]);
    assert_eq!(call.await.unwrap().unwrap(), Value::Int(2));

    // Events behind the sub-identifier land on the service's stream.
    let mut service_events = service.events();
    transport.inject([0x00, 0x21, 0x01, 0x05]);
    let event = timeout(Duration::from_secs(2), service_events.recv())
        .await
        .expect("timed out waiting for service event")
        .unwrap();
    assert_eq!(event.name, "pressed");
    assert_eq!(event.value, Value::Int(5));
    assert_eq!(event.service.as_deref(), Some(&[0x21][..]));
}
