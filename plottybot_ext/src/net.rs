use crate::link::{Connector, Transport, TransportError};
use crate::protocol::{ConnectionId, OutboundMsg, TransportEvent, OUTBOUND_CAP};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type EventRx = mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>;
type EventTx = mpsc::UnboundedSender<(ConnectionId, TransportEvent)>;

/// Opens one tokio task per connection; every task reports on the shared event channel.
pub struct WsConnector {
    runtime: Handle,
    events: EventTx,
}

impl WsConnector {
    /// Must be called from inside a tokio runtime.
    pub fn new() -> (Self, EventRx) {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(runtime: Handle) -> (Self, EventRx) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { runtime, events }, rx)
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    fn open(&mut self, url: &str, id: ConnectionId) -> WsTransport {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAP);
        self.runtime
            .spawn(run_connection(url.to_string(), id, rx, self.events.clone()));
        WsTransport { tx: Some(tx) }
    }
}

pub struct WsTransport {
    tx: Option<mpsc::Sender<OutboundMsg>>,
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.try_send(OutboundMsg::Text(text)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Busy,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    fn close(&mut self) {
        // Dropping the sender also ends the task if the queue is full.
        if let Some(tx) = self.tx.take() {
            let _ = tx.try_send(OutboundMsg::Close);
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(
    url: String,
    id: ConnectionId,
    mut outbound: mpsc::Receiver<OutboundMsg>,
    events: EventTx,
) {
    let emit = |event: TransportEvent| {
        let _ = events.send((id, event));
    };

    let connected = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(&url)).await;
    let mut socket = match connected {
        Ok(Ok((socket, _))) => socket,
        Ok(Err(e)) => {
            debug!(%url, error = %e, "websocket connect failed");
            emit(TransportEvent::Error(e.to_string()));
            emit(TransportEvent::Closed);
            return;
        }
        Err(_) => {
            debug!(%url, "websocket connect timed out");
            emit(TransportEvent::Error("connect timed out".to_string()));
            emit(TransportEvent::Closed);
            return;
        }
    };
    emit(TransportEvent::Opened);

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                match msg {
                    Some(OutboundMsg::Text(payload)) => {
                        if let Err(e) = socket.send(Message::Text(payload.into())).await {
                            warn!(%url, error = %e, "websocket send failed");
                            emit(TransportEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    Some(OutboundMsg::Close) | None => {
                        let _ = socket.close(None).await;
                        break;
                    }
                }
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => emit(TransportEvent::Message(text.as_str().to_owned())),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        emit(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
        }
    }

    emit(TransportEvent::Closed);
}
