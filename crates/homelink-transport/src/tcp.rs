use std::collections::HashSet;
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use homelink_frame::FrameCodec;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::error::{ident_hex, Result, TransportError};
use crate::event::TransportEvent;
use crate::traits::Transport;
use crate::KEEPALIVE;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const READ_CHUNK_CAPACITY: usize = 8 * 1024;

enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Write(Bytes),
}

/// One physical TCP endpoint with its reconnection and liveness machinery.
///
/// Construction spawns a supervisor task that owns the socket for the
/// process lifetime. The handle only flips the desired-connected flag and
/// queues writes; every socket event is reported through [`TransportEvent`].
///
/// Must be created from within a tokio runtime.
pub struct TcpTransport {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<TransportEvent>,
    connected_rx: watch::Receiver<bool>,
    identifier_len: usize,
    identifiers: Mutex<HashSet<Vec<u8>>>,
}

impl TcpTransport {
    /// Create the transport and spawn its supervisor. The link stays down
    /// until [`Transport::connect`] is called.
    pub fn new(config: TransportConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(false);
        let identifier_len = config.identifier_len;

        tokio::spawn(supervise(config, cmd_rx, events.clone(), connected_tx));

        Self {
            cmd_tx,
            events,
            connected_rx,
            identifier_len,
            identifiers: Mutex::new(HashSet::new()),
        }
    }

    fn send(&self, cmd: Command) {
        // The supervisor only exits when every handle is gone, so a closed
        // channel here means we are mid-shutdown and the command is moot.
        let _ = self.cmd_tx.send(cmd);
    }
}

impl Transport for TcpTransport {
    fn connect(&self) {
        self.send(Command::Connect);
    }

    fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    fn write(&self, body: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.send(Command::Write(body));
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
        let mut bound = self
            .identifiers
            .lock()
            .expect("identifier registry lock poisoned");
        if !bound.insert(ident.to_vec()) {
            return Err(TransportError::DuplicateIdentifier(ident_hex(ident)));
        }
        Ok(())
    }
}

enum SessionEnd {
    /// Socket torn down; reconcile again on the next tick.
    Teardown,
    /// Caller requested an immediate teardown-and-retry.
    Redial,
    /// Every handle is gone; the supervisor should exit.
    HandlesGone,
}

/// Supervisor loop: reconciles the actual socket state toward the desired
/// flag, alternating between an idle (disconnected) phase and a connected
/// session.
async fn supervise(
    cfg: TransportConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<TransportEvent>,
    connected_tx: watch::Sender<bool>,
) {
    let codec = FrameCodec::with_max_frame_len(cfg.preamble, cfg.max_frame_len);
    let mut desired = false;
    let mut dial_now = false;
    // Armed while an outage is ongoing and not yet reported.
    let mut outage_deadline: Option<Instant> = None;

    let mut tick = interval(cfg.reconcile_interval());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if desired && dial_now {
            dial_now = false;
            if let Some(stream) = dial(&cfg).await {
                connected_tx.send_replace(true);
                outage_deadline = None;
                info!(addr = %cfg.addr, "connected");
                let _ = events.send(TransportEvent::Connected);

                let end =
                    run_session(&cfg, codec.clone(), stream, &mut cmd_rx, &events, &mut desired)
                        .await;

                connected_tx.send_replace(false);
                info!(addr = %cfg.addr, "disconnected");
                let _ = events.send(TransportEvent::Disconnected);
                if desired {
                    outage_deadline = Some(Instant::now() + cfg.prolonged_outage());
                }

                match end {
                    SessionEnd::HandlesGone => return,
                    SessionEnd::Redial => dial_now = true,
                    SessionEnd::Teardown => {}
                }
            }
            continue;
        }

        let outage_at = outage_deadline.unwrap_or_else(Instant::now);
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None => return,
                Some(Command::Connect) => {
                    if !desired {
                        desired = true;
                        outage_deadline = Some(Instant::now() + cfg.prolonged_outage());
                    }
                }
                Some(Command::Disconnect) => {
                    desired = false;
                    outage_deadline = None;
                }
                Some(Command::Reconnect) => {
                    if desired {
                        dial_now = true;
                    }
                }
                Some(Command::Write(_)) => {
                    // Lost the race against a teardown; the caller already
                    // treats the link as gone.
                    debug!(addr = %cfg.addr, "dropping write while disconnected");
                }
            },
            _ = tick.tick() => {
                if desired {
                    dial_now = true;
                }
            }
            _ = sleep_until(outage_at), if outage_deadline.is_some() => {
                outage_deadline = None;
                warn!(addr = %cfg.addr, "link outage persists");
                let _ = events.send(TransportEvent::ProlongedOutage);
            }
        }
    }
}

async fn dial(cfg: &TransportConfig) -> Option<TcpStream> {
    match timeout(cfg.keep_alive, TcpStream::connect(&cfg.addr)).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            Some(stream)
        }
        Ok(Err(err)) => {
            debug!(addr = %cfg.addr, error = %err, "connect failed");
            None
        }
        Err(_) => {
            debug!(addr = %cfg.addr, "connect timed out");
            None
        }
    }
}

/// One connected session: pull-based frame reads with the liveness timer
/// set, keep-alive emission, and the connect-debounce window.
async fn run_session(
    cfg: &TransportConfig,
    mut codec: FrameCodec,
    stream: TcpStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    events: &broadcast::Sender<TransportEvent>,
    desired: &mut bool,
) -> SessionEnd {
    let (mut rd, mut wr) = stream.into_split();
    let mut buf = BytesMut::with_capacity(READ_CHUNK_CAPACITY);

    let mut read_deadline = Instant::now() + cfg.read_liveness();
    let mut partial_deadline: Option<Instant> = None;
    let stable_at = Instant::now() + cfg.stable_debounce;
    let mut stable_pending = true;
    let mut keepalive = tokio::time::interval_at(Instant::now() + cfg.keep_alive, cfg.keep_alive);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let partial_at = partial_deadline.unwrap_or(read_deadline);
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None => return SessionEnd::HandlesGone,
                Some(Command::Connect) => {}
                Some(Command::Disconnect) => {
                    *desired = false;
                    return SessionEnd::Teardown;
                }
                Some(Command::Reconnect) => {
                    info!(addr = %cfg.addr, "forced reconnect");
                    return SessionEnd::Redial;
                }
                Some(Command::Write(body)) => {
                    if let Err(err) = write_frame(&mut wr, &mut codec, body).await {
                        warn!(addr = %cfg.addr, error = %err, "write failed");
                        return SessionEnd::Teardown;
                    }
                }
            },
            res = rd.read_buf(&mut buf) => match res {
                Ok(0) => {
                    debug!(addr = %cfg.addr, "peer closed connection");
                    return SessionEnd::Teardown;
                }
                Ok(_) => {
                    // A single readiness may carry several frames, and a
                    // frame may span several; drain what is complete.
                    loop {
                        match codec.decode(&mut buf) {
                            Ok(Some(frame)) => {
                                read_deadline = Instant::now() + cfg.read_liveness();
                                let _ = events.send(TransportEvent::Frame(frame));
                            }
                            Ok(None) => break,
                            Err(err) => {
                                warn!(addr = %cfg.addr, error = %err, "undecodable byte stream");
                                return SessionEnd::Teardown;
                            }
                        }
                    }
                    if !codec.has_partial(&buf) {
                        partial_deadline = None;
                    } else if partial_deadline.is_none() {
                        partial_deadline = Some(Instant::now() + cfg.partial_frame());
                    }
                }
                Err(err) => {
                    debug!(addr = %cfg.addr, error = %err, "read failed");
                    return SessionEnd::Teardown;
                }
            },
            _ = sleep_until(read_deadline) => {
                warn!(addr = %cfg.addr, "read silence exceeded liveness window");
                return SessionEnd::Teardown;
            }
            _ = sleep_until(partial_at), if partial_deadline.is_some() => {
                warn!(
                    addr = %cfg.addr,
                    buffered = buf.len(),
                    "frame stalled mid-body, discarding"
                );
                buf.clear();
                return SessionEnd::Teardown;
            }
            _ = keepalive.tick() => {
                let probe = Bytes::from_static(&[KEEPALIVE]);
                if let Err(err) = write_frame(&mut wr, &mut codec, probe).await {
                    warn!(addr = %cfg.addr, error = %err, "keep-alive write failed");
                    return SessionEnd::Teardown;
                }
            }
            _ = sleep_until(stable_at), if stable_pending => {
                stable_pending = false;
                debug!(addr = %cfg.addr, "connection held through debounce window");
                let _ = events.send(TransportEvent::StableConnected);
            }
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(
    wr: &mut W,
    codec: &mut FrameCodec,
    body: Bytes,
) -> homelink_frame::Result<()> {
    let mut out = BytesMut::with_capacity(codec.width().len() + body.len());
    codec.encode(body, &mut out)?;
    wr.write_all(&out).await?;
    Ok(())
}
