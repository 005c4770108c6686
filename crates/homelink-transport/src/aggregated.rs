use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::error::{ident_hex, Result, TransportError};
use crate::event::TransportEvent;
use crate::traits::Transport;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Several redundant physical links presented as one logical transport.
///
/// Used when one identifier space is reachable over multiple concrete
/// endpoints, e.g. several independent receivers listening for the same
/// class of radio devices. Lifecycle calls fan out to every member, writes
/// are broadcast, and the members' event streams merge into one.
pub struct AggregatedTransport {
    members: Vec<Arc<dyn Transport>>,
    events: broadcast::Sender<TransportEvent>,
    connected_rx: watch::Receiver<bool>,
    identifier_len: usize,
    identifiers: Mutex<HashSet<Vec<u8>>>,
}

impl std::fmt::Debug for AggregatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatedTransport")
            .field("members", &self.members.len())
            .field("identifier_len", &self.identifier_len)
            .finish_non_exhaustive()
    }
}

impl AggregatedTransport {
    /// Aggregate the given members. Fails on an empty member list or when
    /// members disagree on the multiplex identifier width.
    pub fn new(members: Vec<Arc<dyn Transport>>) -> Result<Self> {
        let first = members.first().ok_or(TransportError::NoMembers)?;
        let identifier_len = first.identifier_len();
        for member in &members {
            if member.identifier_len() != identifier_len {
                return Err(TransportError::MixedIdentifierWidths {
                    first: identifier_len,
                    other: member.identifier_len(),
                });
            }
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        // Subscribe before sampling the flags so a connect landing in
        // between is seen at least once.
        let receivers: Vec<_> = members.iter().map(|m| m.events()).collect();
        let initially_up = members.iter().filter(|m| m.is_connected()).count();
        let (connected_tx, connected_rx) = watch::channel(initially_up > 0);

        let up_count = Arc::new(AtomicUsize::new(initially_up));
        let connected_tx = Arc::new(connected_tx);
        for rx in receivers {
            tokio::spawn(forward_member(
                rx,
                events.clone(),
                Arc::clone(&up_count),
                Arc::clone(&connected_tx),
            ));
        }

        Ok(Self {
            members,
            events,
            connected_rx,
            identifier_len,
            identifiers: Mutex::new(HashSet::new()),
        })
    }

    /// Number of aggregated members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the aggregate has no members (never true after `new`).
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Transport for AggregatedTransport {
    fn connect(&self) {
        for member in &self.members {
            member.connect();
        }
    }

    fn disconnect(&self) {
        for member in &self.members {
            member.disconnect();
        }
    }

    fn reconnect(&self) {
        for member in &self.members {
            member.reconnect();
        }
    }

    fn write(&self, body: Bytes) -> Result<()> {
        // Redundant links: the frame goes out on every member that will
        // take it, and the write succeeds if at least one did.
        let mut accepted = 0usize;
        for member in &self.members {
            match member.write(body.clone()) {
                Ok(()) => accepted += 1,
                Err(err) => debug!(error = %err, "aggregated member rejected write"),
            }
        }
        if accepted == 0 {
            return Err(TransportError::NotConnected);
        }
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

    fn bind_identifier(&self, ident: &[u8]) -> Result<()> {
        if ident.len() != self.identifier_len {
            return Err(TransportError::IdentifierWidth {
                expected: self.identifier_len,
                actual: ident.len(),
            });
        }
        {
            let mut bound = self
                .identifiers
                .lock()
                .expect("identifier registry lock poisoned");
            if !bound.insert(ident.to_vec()) {
                return Err(TransportError::DuplicateIdentifier(ident_hex(ident)));
            }
        }
        for member in &self.members {
            member.bind_identifier(ident)?;
        }
        Ok(())
    }
}

/// Merge one member's event stream into the aggregate and keep the
/// any-member-connected flag current.
async fn forward_member(
    mut rx: broadcast::Receiver<TransportEvent>,
    events: broadcast::Sender<TransportEvent>,
    up_count: Arc<AtomicUsize>,
    connected_tx: Arc<watch::Sender<bool>>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                match event {
                    TransportEvent::Connected => {
                        if up_count.fetch_add(1, Ordering::SeqCst) == 0 {
                            connected_tx.send_replace(true);
                        }
                    }
                    TransportEvent::Disconnected => {
                        if up_count.fetch_sub(1, Ordering::SeqCst) == 1 {
                            connected_tx.send_replace(false);
                        }
                    }
                    _ => {}
                }
                let _ = events.send(event);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "aggregated member event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
