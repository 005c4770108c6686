use std::collections::{HashMap, HashSet};
use std::future::poll_fn;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use homelink_transport::{Transport, TransportEvent};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, warn};

use crate::error::{DeviceError, Result};
use crate::message::{MessageSet, MessageType};
use crate::service::Service;
use crate::value::Value;

/// Call id marking an unsolicited event frame.
pub const EVENT_ID: u8 = 0x00;

/// Call id marking a keep-alive acknowledgement.
pub const KEEPALIVE_ID: u8 = 0xFF;

/// Smallest and largest correlation ids.
const CALL_ID_MIN: u8 = 0x01;
const CALL_ID_MAX: u8 = 0xFE;

/// Upper bound on simultaneously outstanding calls per device.
pub const MAX_PENDING_CALLS: usize = (CALL_ID_MAX - CALL_ID_MIN + 1) as usize;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A decoded unsolicited event.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    /// Sub-identifier of the emitting service, `None` for device-level
    /// events.
    pub service: Option<Bytes>,
    /// Event name from the matching message type.
    pub name: String,
    /// Decoded event payload.
    pub value: Value,
}

enum DeviceCommand {
    Request {
        ty: Arc<MessageType>,
        scope: Bytes,
        payload: Bytes,
        reply: oneshot::Sender<Result<Value>>,
    },
    AddScope {
        prefix: Bytes,
        set: Arc<MessageSet>,
    },
}

/// One logical endpoint bound to exactly one transport.
///
/// Cloning is cheap and yields another handle to the same device. The
/// device is online whenever its transport is connected; requests made
/// while offline fail instead of queueing.
#[derive(Clone)]
pub struct Device {
    cmd_tx: mpsc::UnboundedSender<DeviceCommand>,
    events: broadcast::Sender<DeviceEvent>,
    transport: Arc<dyn Transport>,
    set: Arc<MessageSet>,
    ident: Bytes,
    services: Arc<Mutex<HashSet<Bytes>>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("ident", &self.ident)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Bind a device to its transport.
    ///
    /// `ident` is required on a multiplexed transport (identifier width
    /// > 0) and must be unique there; on a plain transport it must be
    /// absent. Violations fail here, not at first use.
    pub fn bind(
        transport: Arc<dyn Transport>,
        ident: Option<&[u8]>,
        set: MessageSet,
    ) -> Result<Self> {
        let ident = ident.map(Bytes::copy_from_slice).unwrap_or_default();
        transport.bind_identifier(&ident)?;

        let set = Arc::new(set);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let actor = DeviceActor {
            transport: Arc::clone(&transport),
            transport_rx: transport.events(),
            ident: ident.clone(),
            cmd_rx,
            events: events.clone(),
            scopes: vec![Scope {
                prefix: Bytes::new(),
                set: Arc::clone(&set),
            }],
            pending: HashMap::new(),
            expirations: DelayQueue::new(),
            next_id: CALL_ID_MIN,
        };
        tokio::spawn(actor.run());

        Ok(Self {
            cmd_tx,
            events,
            transport,
            set,
            ident,
            services: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Issue one request and await its correlated response.
    pub async fn request(&self, name: &str, value: Value) -> Result<Value> {
        self.request_scoped(Bytes::new(), &self.set, name, value).await
    }

    pub(crate) async fn request_scoped(
        &self,
        scope: Bytes,
        set: &Arc<MessageSet>,
        name: &str,
        value: Value,
    ) -> Result<Value> {
        let ty = set
            .get(name)
            .ok_or_else(|| DeviceError::UnknownMessage(name.to_string()))?
            .clone();
        let payload = ty.encode_value(&value).map_err(|source| {
            warn!(name, error = %source, "request value failed to encode");
            DeviceError::Encode {
                name: name.to_string(),
                source,
            }
        })?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(DeviceCommand::Request {
                ty,
                scope,
                payload,
                reply: reply_tx,
            })
            .map_err(|_| DeviceError::Shutdown)?;
        reply_rx.await.map_err(|_| DeviceError::Shutdown)?
    }

    /// Open a named sub-channel of this device.
    ///
    /// The sub-identifier must be non-empty and unique within the device;
    /// a duplicate fails and registers nothing.
    pub fn service(&self, sub_ident: impl AsRef<[u8]>, set: MessageSet) -> Result<Service> {
        let sub = Bytes::copy_from_slice(sub_ident.as_ref());
        if sub.is_empty() {
            return Err(DeviceError::EmptySubIdentifier);
        }
        {
            let mut registered = self
                .services
                .lock()
                .expect("service registry lock poisoned");
            if !registered.insert(sub.clone()) {
                return Err(DeviceError::DuplicateService(hex(&sub)));
            }
        }

        let set = Arc::new(set);
        self.cmd_tx
            .send(DeviceCommand::AddScope {
                prefix: sub.clone(),
                set: Arc::clone(&set),
            })
            .map_err(|_| DeviceError::Shutdown)?;

        Ok(Service::new(self.clone(), sub, set))
    }

    /// Whether the owning transport is currently connected.
    pub fn online(&self) -> bool {
        self.transport.is_connected()
    }

    /// Subscribe to decoded events from this device and its services.
    pub fn events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// This device's multiplex identifier (empty on a plain transport).
    pub fn identifier(&self) -> &[u8] {
        &self.ident
    }

    /// Deliberate startup delay some endpoints need between powering their
    /// link and accepting the first request.
    pub async fn settle(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

struct Scope {
    prefix: Bytes,
    set: Arc<MessageSet>,
}

struct PendingCall {
    reply: oneshot::Sender<Result<Value>>,
    ty: Arc<MessageType>,
    timer: delay_queue::Key,
}

struct DeviceActor {
    transport: Arc<dyn Transport>,
    transport_rx: broadcast::Receiver<TransportEvent>,
    ident: Bytes,
    cmd_rx: mpsc::UnboundedReceiver<DeviceCommand>,
    events: broadcast::Sender<DeviceEvent>,
    scopes: Vec<Scope>,
    pending: HashMap<u8, PendingCall>,
    expirations: DelayQueue<u8>,
    next_id: u8,
}

impl DeviceActor {
    async fn run(mut self) {
        loop {
            let timers_armed = !self.expirations.is_empty();
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return,
                    Some(cmd) => self.handle_command(cmd),
                },
                event = self.transport_rx.recv() => match event {
                    Ok(TransportEvent::Frame(body)) => self.handle_frame(body),
                    Ok(TransportEvent::Disconnected) => self.abort_pending(),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "device lagged behind transport events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
                expired = poll_fn(|cx| self.expirations.poll_expired(cx)), if timers_armed => {
                    if let Some(expired) = expired {
                        self.handle_timeout(expired.into_inner());
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: DeviceCommand) {
        match cmd {
            DeviceCommand::Request {
                ty,
                scope,
                payload,
                reply,
            } => self.start_call(ty, scope, payload, reply),
            DeviceCommand::AddScope { prefix, set } => {
                self.scopes.push(Scope { prefix, set });
            }
        }
    }

    fn start_call(
        &mut self,
        ty: Arc<MessageType>,
        scope: Bytes,
        payload: Bytes,
        reply: oneshot::Sender<Result<Value>>,
    ) {
        let Some(id) = self.alloc_id() else {
            warn!(name = %ty.name(), "call id pool exhausted");
            let _ = reply.send(Err(DeviceError::CallsExhausted));
            return;
        };

        let head = ty.head_bytes();
        let tail = ty.tail_bytes();
        let mut body = BytesMut::with_capacity(
            self.ident.len() + 1 + scope.len() + head.len() + payload.len() + tail.len(),
        );
        body.extend_from_slice(&self.ident);
        body.extend_from_slice(&[id]);
        body.extend_from_slice(&scope);
        body.extend_from_slice(head);
        body.extend_from_slice(&payload);
        body.extend_from_slice(tail);

        if let Err(err) = self.transport.write(body.freeze()) {
            warn!(name = %ty.name(), id, error = %err, "request write failed");
            let _ = reply.send(Err(err.into()));
            return;
        }

        let timer = self.expirations.insert(id, ty.call_timeout());
        self.pending.insert(id, PendingCall { reply, ty, timer });
    }

    /// Rolling allocation over `0x01..=0xFE`, skipping ids still in
    /// flight. Bounded: gives up after one full sweep instead of recursing.
    fn alloc_id(&mut self) -> Option<u8> {
        for _ in 0..MAX_PENDING_CALLS {
            let id = self.next_id;
            self.next_id = if id == CALL_ID_MAX { CALL_ID_MIN } else { id + 1 };
            if !self.pending.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }

    fn handle_frame(&mut self, body: Bytes) {
        // The bare keep-alive probe/ack sits beneath the identifier space.
        if body.len() == 1 && body[0] == KEEPALIVE_ID {
            return;
        }

        let ident_len = self.transport.identifier_len();
        if body.len() < ident_len + 1 {
            debug!(len = body.len(), "dropping short frame");
            return;
        }
        if body[..ident_len] != self.ident[..] {
            return; // addressed to a sibling device
        }

        let id = body[ident_len];
        let payload = body.slice(ident_len + 1..);
        match id {
            EVENT_ID => self.handle_event(&payload),
            KEEPALIVE_ID => {}
            id => self.handle_response(id, &payload),
        }
    }

    fn handle_event(&mut self, payload: &Bytes) {
        for scope in &self.scopes {
            if !payload.starts_with(&scope.prefix) {
                continue;
            }
            let rest = &payload[scope.prefix.len()..];
            for ty in scope.set.iter() {
                let Some(spec) = ty.event_spec() else { continue };
                let head = ty.head_bytes();
                let tail = ty.tail_bytes();
                if rest.len() < head.len() + tail.len()
                    || !rest.starts_with(head)
                    || !rest.ends_with(tail)
                {
                    continue;
                }

                let inner = &rest[head.len()..rest.len() - tail.len()];
                match (spec.decode)(inner) {
                    Ok(value) => {
                        let service = if scope.prefix.is_empty() {
                            None
                        } else {
                            Some(scope.prefix.clone())
                        };
                        let _ = self.events.send(DeviceEvent {
                            service,
                            name: spec.name.clone(),
                            value,
                        });
                    }
                    Err(err) => {
                        warn!(event = %spec.name, error = %err, "event decode failed");
                    }
                }
                return;
            }
        }
        debug!(len = payload.len(), "unmatched event frame dropped");
    }

    fn handle_response(&mut self, id: u8, payload: &Bytes) {
        let Some(call) = self.pending.remove(&id) else {
            // Late response after a timeout freed the id; never deliver it
            // to an unrelated future call.
            debug!(id, "response for unknown or expired call id");
            return;
        };
        self.expirations.remove(&call.timer);

        match call.ty.decode_payload(payload) {
            Ok(value) => {
                let _ = call.reply.send(Ok(value));
            }
            Err(source) => {
                warn!(name = %call.ty.name(), id, error = %source, "response decode failed");
                if call.ty.is_quiet() {
                    let _ = call.reply.send(Ok(Value::Null));
                } else {
                    let _ = call.reply.send(Err(DeviceError::Decode {
                        name: call.ty.name().to_string(),
                        source,
                    }));
                }
            }
        }
    }

    fn handle_timeout(&mut self, id: u8) {
        let Some(call) = self.pending.remove(&id) else {
            return;
        };
        let after = call.ty.call_timeout();
        warn!(name = %call.ty.name(), id, ?after, "call timed out");
        let _ = call.reply.send(Err(DeviceError::Timeout {
            name: call.ty.name().to_string(),
            after,
        }));
    }

    /// Reject every pending call; calls are never left to ride out their
    /// timeout across a connectivity loss.
    fn abort_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        warn!(count = self.pending.len(), "aborting pending calls after disconnect");
        self.expirations.clear();
        for (_, call) in self.pending.drain() {
            let _ = call.reply.send(Err(DeviceError::Aborted));
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
