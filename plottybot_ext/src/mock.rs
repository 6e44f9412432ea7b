//! Stand-in plotter: a WebSocket server that decodes and records every
//! instruction it receives. Used by the `mock_plotter` binary and by tests.

use crate::protocol::PlotterMessage;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message;

#[derive(Default)]
struct Shared {
    received: Mutex<Vec<PlotterMessage>>,
    connections: AtomicUsize,
}

pub struct MockPlotter {
    listen_addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MockPlotter {
    pub fn spawn(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let listen_addr = listener.local_addr()?;

        let shared = Arc::new(Shared::default());
        let shutdown = Arc::new(AtomicBool::new(false));
        let join_handle = {
            let shared = Arc::clone(&shared);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || run_server(listener, shared, shutdown))
        };
        info!(%listen_addr, "mock plotter listening");

        Ok(Self {
            listen_addr,
            shared,
            shutdown,
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn received(&self) -> Vec<PlotterMessage> {
        self.shared
            .received
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Number of clients accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for MockPlotter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_server(listener: TcpListener, shared: Arc<Shared>, shutdown: Arc<AtomicBool>) {
    let mut active: Option<(tungstenite::WebSocket<TcpStream>, SocketAddr)> = None;

    while !shutdown.load(Ordering::Relaxed) {
        // Single-client policy: a new client replaces the current one.
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let _ = stream.set_nonblocking(false);
                    let _ = stream.set_nodelay(true);
                    let _ = stream.set_read_timeout(Some(Duration::from_millis(30)));
                    let _ = stream.set_write_timeout(Some(Duration::from_millis(200)));

                    let ws = match tungstenite::accept(stream) {
                        Ok(ws) => ws,
                        Err(e) => {
                            warn!(%peer, error = %e, "ws handshake failed");
                            continue;
                        }
                    };
                    if let Some((mut prev, prev_peer)) = active.take() {
                        debug!(%prev_peer, "replacing client");
                        let _ = prev.close(None);
                    }
                    shared.connections.fetch_add(1, Ordering::Relaxed);
                    info!(%peer, "plotter client connected");
                    active = Some((ws, peer));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(error = %e, "ws accept failed");
                    break;
                }
            }
        }

        let Some((ws, peer)) = active.as_mut() else {
            thread::sleep(Duration::from_millis(25));
            continue;
        };
        match ws.read() {
            Ok(Message::Text(text)) => record(&shared, text.as_str()),
            Ok(Message::Close(_)) => {
                info!(%peer, "plotter client closed");
                // Let tungstenite finish the close handshake.
                let _ = ws.flush();
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                active = None;
            }
            Err(e) => {
                debug!(%peer, error = %e, "client dropped");
                active = None;
            }
        }
    }

    if let Some((mut ws, _)) = active {
        let _ = ws.close(None);
        let _ = ws.flush();
    }
}

fn record(shared: &Shared, text: &str) {
    match serde_json::from_str::<PlotterMessage>(text) {
        Ok(msg) => {
            match &msg {
                PlotterMessage::GoToXy {
                    target,
                    x,
                    y,
                    old_x,
                    old_y,
                } => info!(%target, x = *x, y = *y, old_x = *old_x, old_y = *old_y, "goToXY"),
                other => info!(kind = other.type_tag(), target = ?other.target(), "plotter command"),
            }
            if let Ok(mut guard) = shared.received.lock() {
                guard.push(msg);
            }
        }
        Err(e) => warn!(error = %e, %text, "unrecognized plotter message"),
    }
}
