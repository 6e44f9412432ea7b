//! Connection to one plotter and its fixed-delay retry loop.
//!
//! The link is driven from outside: the owner feeds it transport events and
//! calls [`DeviceLink::tick`] so a due retry can fire. Nothing here blocks or
//! spawns, which keeps the state machine testable with fake transports.
//!
//! Invariants:
//! - at most one transport is held; opening a new one requests close of the old one first;
//! - events tagged with a [`ConnectionId`] other than the held one are ignored;
//! - at most one retry is pending, keyed to the address it targets, and it
//!   no-ops when that address is no longer the desired target.

use crate::protocol::{ConnectionId, PlotterMessage, TransportEvent};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const RETRY_DELAY: Duration = Duration::from_millis(5000);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("outbound queue is full")]
    Busy,
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// The transmit side of one opened connection.
pub trait Transport {
    fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    /// Requests a close; completion is reported later as [`TransportEvent::Closed`].
    fn close(&mut self);
}

/// Opens transports. Events for the returned transport must be reported with `id`.
pub trait Connector {
    type Transport: Transport;

    fn open(&mut self, url: &str, id: ConnectionId) -> Self::Transport;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Errored,
}

/// What the status reporter block shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    NotConnected,
    Connecting,
    Connected,
    Closing,
    Closed,
    Unknown,
}

impl ConnectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionStatus::NotConnected => "Not Connected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Closing => "Closing",
            ConnectionStatus::Closed => "Closed",
            ConnectionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRetry {
    pub address: String,
    pub due: Instant,
}

pub type OpenHook = Box<dyn FnMut(&str) + Send>;

struct ActiveTransport<T> {
    id: ConnectionId,
    address: String,
    transport: T,
}

pub struct DeviceLink<C: Connector> {
    connector: C,
    port: u16,
    retry_delay: Duration,
    state: LinkState,
    slot: Option<ActiveTransport<C::Transport>>,
    target: Option<String>,
    pending_retry: Option<PendingRetry>,
    next_id: u64,
    on_open: Option<OpenHook>,
}

impl<C: Connector> DeviceLink<C> {
    pub fn new(connector: C, port: u16) -> Self {
        Self {
            connector,
            port,
            retry_delay: RETRY_DELAY,
            state: LinkState::Idle,
            slot: None,
            target: None,
            pending_retry: None,
            next_id: 0,
            on_open: None,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Runs synchronously each time a transport reports open, with its address.
    pub fn set_on_open(&mut self, hook: OpenHook) {
        self.on_open = Some(hook);
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.slot.is_none() {
            return ConnectionStatus::NotConnected;
        }
        match self.state {
            LinkState::Connecting => ConnectionStatus::Connecting,
            LinkState::Open => ConnectionStatus::Connected,
            LinkState::Closing => ConnectionStatus::Closing,
            LinkState::Closed | LinkState::Errored => ConnectionStatus::Closed,
            LinkState::Idle => ConnectionStatus::Unknown,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    /// Address of the transport currently held, if any.
    pub fn address(&self) -> Option<&str> {
        self.slot.as_ref().map(|active| active.address.as_str())
    }

    /// Address the link should be connected to; `None` after a disconnect.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.slot.as_ref().map(|active| active.id)
    }

    pub fn pending_retry(&self) -> Option<&PendingRetry> {
        self.pending_retry.as_ref()
    }

    pub fn next_retry_due(&self) -> Option<Instant> {
        self.pending_retry.as_ref().map(|retry| retry.due)
    }

    pub fn url_for(&self, address: &str) -> String {
        format!("ws://{address}:{}", self.port)
    }

    pub fn connect(&mut self, address: &str) -> ConnectionId {
        self.pending_retry = None;
        self.target = Some(address.to_string());
        info!(address, "connecting to plotter");
        self.replace(address.to_string())
    }

    /// Connects again to the current target. Returns `None` when there is no target.
    pub fn reconnect(&mut self) -> Option<ConnectionId> {
        let address = self.target.clone()?;
        Some(self.connect(&address))
    }

    pub fn disconnect(&mut self) {
        self.pending_retry = None;
        self.target = None;
        if let Some(mut active) = self.slot.take() {
            info!(address = %active.address, "disconnecting from plotter");
            active.transport.close();
        }
        self.state = LinkState::Closed;
    }

    /// Requests close but keeps the transport until it reports closed, so queued
    /// frames can drain. Returns whether a transport was held.
    pub fn close(&mut self) -> bool {
        self.pending_retry = None;
        self.target = None;
        let Some(active) = self.slot.as_mut() else {
            self.state = LinkState::Closed;
            return false;
        };
        active.transport.close();
        self.state = LinkState::Closing;
        true
    }

    /// Serializes and transmits `message` when open; drops it otherwise.
    pub fn send(&mut self, message: &PlotterMessage) -> bool {
        if self.state != LinkState::Open {
            debug!(kind = message.type_tag(), state = ?self.state, "link not open, dropping");
            return false;
        }
        let Some(active) = self.slot.as_mut() else {
            return false;
        };
        let payload = match serde_json::to_string(message) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode plotter message");
                return false;
            }
        };
        match active.transport.send_text(payload) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, kind = message.type_tag(), "send failed, dropping");
                false
            }
        }
    }

    /// Applies a transport callback. Returns false when `id` is stale.
    pub fn handle_event(&mut self, id: ConnectionId, event: TransportEvent, now: Instant) -> bool {
        let Some(active) = self.slot.as_ref() else {
            debug!(?id, ?event, "event with no transport held");
            return false;
        };
        if active.id != id {
            debug!(?id, current = ?active.id, ?event, "event from replaced transport");
            return false;
        }
        let address = active.address.clone();

        match event {
            TransportEvent::Opened => {
                // Close was already requested; the transport is on its way out.
                if self.state == LinkState::Closing {
                    debug!(%address, "late open on a closing transport ignored");
                    return true;
                }
                self.state = LinkState::Open;
                info!(%address, "plotter connected");
                if let Some(hook) = self.on_open.as_mut() {
                    hook(&address);
                }
            }
            TransportEvent::Message(text) => {
                debug!(%address, %text, "plotter message");
            }
            TransportEvent::Closed => {
                // An error already scheduled a retry; the trailing close must not cancel it.
                if self.state != LinkState::Errored {
                    info!(%address, "plotter connection closed");
                    self.state = LinkState::Closed;
                }
            }
            TransportEvent::Error(reason) => {
                warn!(%address, %reason, "plotter connection error");
                self.state = LinkState::Errored;
                if self.target.as_deref() == Some(address.as_str()) {
                    let due = now + self.retry_delay;
                    debug!(%address, delay_ms = self.retry_delay.as_millis() as u64, "retry scheduled");
                    self.pending_retry = Some(PendingRetry { address, due });
                }
            }
        }
        true
    }

    /// Fires the pending retry if it is due. Returns whether a reconnect started.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(retry) = self.pending_retry.as_ref() else {
            return false;
        };
        if retry.due > now {
            return false;
        }
        let Some(retry) = self.pending_retry.take() else {
            return false;
        };
        if self.target.as_deref() != Some(retry.address.as_str()) {
            debug!(address = %retry.address, "retry superseded");
            return false;
        }
        info!(address = %retry.address, "retrying plotter connection");
        self.replace(retry.address);
        true
    }

    fn replace(&mut self, address: String) -> ConnectionId {
        if let Some(mut old) = self.slot.take() {
            debug!(id = ?old.id, address = %old.address, "closing replaced transport");
            old.transport.close();
        }
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        let url = self.url_for(&address);
        let transport = self.connector.open(&url, id);
        self.slot = Some(ActiveTransport {
            id,
            address,
            transport,
        });
        self.state = LinkState::Connecting;
        id
    }
}

impl<C: Connector> fmt::Debug for DeviceLink<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLink")
            .field("state", &self.state)
            .field("address", &self.address())
            .field("target", &self.target)
            .field("pending_retry", &self.pending_retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ActorId;
    use crate::testing::FakeWire;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn link(wire: &FakeWire) -> DeviceLink<crate::testing::FakeConnector> {
        DeviceLink::new(wire.connector(), 8766)
    }

    fn pen_down() -> PlotterMessage {
        PlotterMessage::PenDown {
            target: ActorId::new("a"),
        }
    }

    #[test]
    fn starts_idle_and_not_connected() {
        let wire = FakeWire::default();
        let link = link(&wire);
        assert_eq!(link.state(), LinkState::Idle);
        assert_eq!(link.status(), ConnectionStatus::NotConnected);
        assert_eq!(link.status().to_string(), "Not Connected");
    }

    #[test]
    fn connect_opens_fixed_port_url_and_reports_open() {
        let wire = FakeWire::default();
        let mut link = link(&wire);
        let id = link.connect("10.0.0.6");
        assert_eq!(wire.opened_urls(), vec!["ws://10.0.0.6:8766".to_string()]);
        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(link.status(), ConnectionStatus::Connecting);

        assert!(link.handle_event(id, TransportEvent::Opened, Instant::now()));
        assert_eq!(link.status(), ConnectionStatus::Connected);
        assert_eq!(link.address(), Some("10.0.0.6"));
    }

    #[test]
    fn open_hook_runs_on_open() {
        let wire = FakeWire::default();
        let mut link = link(&wire);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        link.set_on_open(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let id = link.connect("10.0.0.6");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        link.handle_event(id, TransportEvent::Opened, Instant::now());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn send_while_not_open_never_transmits() {
        let wire = FakeWire::default();
        let mut link = link(&wire);
        assert!(!link.send(&pen_down()));

        let id = link.connect("10.0.0.6");
        assert!(!link.send(&pen_down()));

        link.handle_event(id, TransportEvent::Error("refused".into()), Instant::now());
        assert!(!link.send(&pen_down()));

        link.disconnect();
        assert!(!link.send(&pen_down()));
        assert!(wire.log().sent.is_empty());
    }

    #[test]
    fn error_schedules_exactly_one_retry_after_the_delay() {
        let wire = FakeWire::default();
        let mut link = link(&wire);
        let t0 = Instant::now();
        let id = link.connect("10.0.0.6");

        link.handle_event(id, TransportEvent::Error("refused".into()), t0);
        assert_eq!(link.state(), LinkState::Errored);
        assert_eq!(link.status(), ConnectionStatus::Closed);
        assert_eq!(
            link.pending_retry(),
            Some(&PendingRetry {
                address: "10.0.0.6".into(),
                due: t0 + RETRY_DELAY,
            })
        );

        // A trailing close after the error keeps the retry.
        link.handle_event(id, TransportEvent::Closed, t0);
        assert_eq!(link.state(), LinkState::Errored);
        assert!(link.pending_retry().is_some());

        assert!(!link.tick(t0 + RETRY_DELAY - Duration::from_millis(1)));
        assert_eq!(wire.opened_urls().len(), 1);

        assert!(link.tick(t0 + RETRY_DELAY));
        assert_eq!(wire.opened_urls().len(), 2);
        assert_eq!(link.state(), LinkState::Connecting);
        assert!(link.pending_retry().is_none());

        // Nothing else fires later.
        assert!(!link.tick(t0 + RETRY_DELAY * 10));
        assert_eq!(wire.opened_urls().len(), 2);
    }

    #[test]
    fn three_failures_then_success() {
        let wire = FakeWire::default();
        let mut link = link(&wire);
        let mut now = Instant::now();
        let mut states = Vec::new();

        let mut id = link.connect("10.0.0.6");
        states.push(link.state());
        for _ in 0..3 {
            link.handle_event(id, TransportEvent::Error("unreachable".into()), now);
            states.push(link.state());
            now += RETRY_DELAY;
            assert!(link.tick(now));
            states.push(link.state());
            id = link.connection_id().unwrap();
        }
        link.handle_event(id, TransportEvent::Opened, now);
        states.push(link.state());

        use LinkState::*;
        assert_eq!(
            states,
            vec![
                Connecting, Errored, Connecting, Errored, Connecting, Errored, Connecting, Open
            ]
        );
        assert_eq!(wire.opened_urls().len(), 4);
        assert!(wire
            .opened_urls()
            .iter()
            .all(|url| url == "ws://10.0.0.6:8766"));
    }

    #[test]
    fn disconnect_cancels_pending_retry() {
        let wire = FakeWire::default();
        let mut link = link(&wire);
        let t0 = Instant::now();
        let id = link.connect("10.0.0.6");
        link.handle_event(id, TransportEvent::Error("refused".into()), t0);

        link.disconnect();
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(link.status(), ConnectionStatus::NotConnected);
        assert!(link.pending_retry().is_none());
        assert!(!link.tick(t0 + RETRY_DELAY * 2));
        assert_eq!(wire.opened_urls().len(), 1);
    }

    #[test]
    fn retry_for_superseded_address_never_fires() {
        let wire = FakeWire::default();
        let mut link = link(&wire);
        let t0 = Instant::now();
        let old = link.connect("10.0.0.5");
        link.handle_event(old, TransportEvent::Error("refused".into()), t0);

        let new = link.connect("10.0.0.6");
        assert!(link.pending_retry().is_none());
        // Late error from the replaced socket is ignored.
        assert!(!link.handle_event(old, TransportEvent::Error("late".into()), t0));
        assert!(!link.tick(t0 + RETRY_DELAY));

        assert_eq!(
            wire.opened_urls(),
            vec!["ws://10.0.0.5:8766".to_string(), "ws://10.0.0.6:8766".to_string()]
        );
        assert_eq!(link.connection_id(), Some(new));
    }

    #[test]
    fn replacing_requests_close_of_the_old_transport_first() {
        let wire = FakeWire::default();
        let mut link = link(&wire);
        let first = link.connect("10.0.0.5");
        link.handle_event(first, TransportEvent::Opened, Instant::now());
        let second = link.connect("10.0.0.5");
        assert_ne!(first, second);
        assert_eq!(wire.closed(), vec![first]);
        assert_eq!(link.state(), LinkState::Connecting);
    }

    #[test]
    fn clean_close_does_not_retry() {
        let wire = FakeWire::default();
        let mut link = link(&wire);
        let t0 = Instant::now();
        let id = link.connect("10.0.0.6");
        link.handle_event(id, TransportEvent::Opened, t0);
        link.handle_event(id, TransportEvent::Closed, t0);
        assert_eq!(link.state(), LinkState::Closed);
        assert_eq!(link.status(), ConnectionStatus::Closed);
        assert!(link.pending_retry().is_none());
        assert!(!link.tick(t0 + RETRY_DELAY));
    }

    #[test]
    fn graceful_close_waits_for_transport() {
        let wire = FakeWire::default();
        let mut link = link(&wire);
        let id = link.connect("10.0.0.6");
        link.handle_event(id, TransportEvent::Opened, Instant::now());

        assert!(link.close());
        assert_eq!(link.status(), ConnectionStatus::Closing);
        assert!(!link.send(&pen_down()));

        link.handle_event(id, TransportEvent::Closed, Instant::now());
        assert_eq!(link.status(), ConnectionStatus::Closed);
    }

    #[test]
    fn open_after_close_request_stays_closing() {
        let wire = FakeWire::default();
        let mut link = link(&wire);
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        link.set_on_open(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        let id = link.connect("10.0.0.6");
        assert!(link.close());

        assert!(link.handle_event(id, TransportEvent::Opened, Instant::now()));
        assert_eq!(link.state(), LinkState::Closing);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!link.send(&pen_down()));
        assert!(wire.log().sent.is_empty());

        link.handle_event(id, TransportEvent::Closed, Instant::now());
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[test]
    fn reconnect_uses_current_target() {
        let wire = FakeWire::default();
        let mut link = link(&wire);
        assert!(link.reconnect().is_none());
        link.connect("10.0.0.7");
        assert!(link.reconnect().is_some());
        assert_eq!(wire.opened_urls().len(), 2);
        link.disconnect();
        assert!(link.reconnect().is_none());
    }

    #[test]
    fn custom_retry_delay_is_honoured() {
        let wire = FakeWire::default();
        let mut link = link(&wire).with_retry_delay(Duration::from_millis(50));
        let t0 = Instant::now();
        let id = link.connect("10.0.0.6");
        link.handle_event(id, TransportEvent::Error("x".into()), t0);
        assert_eq!(link.next_retry_due(), Some(t0 + Duration::from_millis(50)));
    }
}
