//! Async host for the extension: one tokio task owns it and serializes block
//! calls, transport callbacks, directory results and retry deadlines.

use crate::blocks::{BlockArgs, BlockOutput, ExtensionInfo, Opcode};
use crate::config::PlottyConfig;
use crate::directory::{DirectoryClient, DiscoveryError};
use crate::extension::PlottyExtension;
use crate::host_api::Renderer;
use crate::link::{ConnectionStatus, DeviceLink, LinkState};
use crate::net::{EventRx, WsConnector};
use crate::protocol::{ActorId, DeviceEntry, COMMAND_CAP};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not running")]
    Unavailable,
    #[error("timed out")]
    Timeout,
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub link_state: LinkState,
    pub selected_device: String,
    pub directory_loaded: bool,
    pub devices: Vec<DeviceEntry>,
    pub retry_pending: bool,
}

pub enum SessionCommand {
    Execute {
        opcode: Opcode,
        actor: ActorId,
        args: BlockArgs,
        reply: oneshot::Sender<BlockOutput>,
    },
    ActorCreated {
        actor: ActorId,
        source: Option<ActorId>,
    },
    ActorDestroyed {
        actor: ActorId,
    },
    ActorMoved {
        actor: ActorId,
        x: f64,
        y: f64,
        forced: bool,
    },
    RefreshDevices {
        reply: oneshot::Sender<BlockOutput>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Info {
        reply: oneshot::Sender<ExtensionInfo>,
    },
    StopAll,
    Shutdown,
}

struct FetchRequest {
    connect_index: Option<f64>,
    reply: Option<oneshot::Sender<BlockOutput>>,
}

type FetchResult = (Result<Vec<DeviceEntry>, DiscoveryError>, FetchRequest);

#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    opened: watch::Receiver<Option<String>>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SessionError::Unavailable)?;
        rx.await.map_err(|_| SessionError::Unavailable)
    }

    async fn notify(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.tx.send(cmd).await.map_err(|_| SessionError::Unavailable)
    }

    /// Runs one block. `connectToPlotty` replies before the device list arrives;
    /// use [`SessionHandle::wait_open`] to wait for the link.
    pub async fn execute(
        &self,
        opcode: Opcode,
        actor: &ActorId,
        args: BlockArgs,
    ) -> Result<BlockOutput, SessionError> {
        let actor = actor.clone();
        self.request(|reply| SessionCommand::Execute {
            opcode,
            actor,
            args,
            reply,
        })
        .await
    }

    pub async fn actor_created(&self, actor: &ActorId, source: Option<&ActorId>) -> Result<(), SessionError> {
        self.notify(SessionCommand::ActorCreated {
            actor: actor.clone(),
            source: source.cloned(),
        })
        .await
    }

    pub async fn actor_destroyed(&self, actor: &ActorId) -> Result<(), SessionError> {
        self.notify(SessionCommand::ActorDestroyed { actor: actor.clone() }).await
    }

    pub async fn actor_moved(&self, actor: &ActorId, x: f64, y: f64, forced: bool) -> Result<(), SessionError> {
        self.notify(SessionCommand::ActorMoved {
            actor: actor.clone(),
            x,
            y,
            forced,
        })
        .await
    }

    pub async fn refresh_devices(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::RefreshDevices { reply }).await?;
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    pub async fn info(&self) -> Result<ExtensionInfo, SessionError> {
        self.request(|reply| SessionCommand::Info { reply }).await
    }

    pub async fn stop_all(&self) -> Result<(), SessionError> {
        self.notify(SessionCommand::StopAll).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.notify(SessionCommand::Shutdown).await
    }

    /// Waits until the link is open and returns its address. An address from a
    /// link that has since closed is not reported.
    pub async fn wait_open(&self, timeout: Duration) -> Result<String, SessionError> {
        let mut opened = self.opened.clone();
        let wait = async {
            loop {
                let current = opened.borrow_and_update().clone();
                if let Some(address) = current {
                    return Ok(address);
                }
                opened.changed().await.map_err(|_| SessionError::Unavailable)?;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SessionError::Timeout)?
    }
}

/// Starts the session task. Must be called from inside a tokio runtime.
///
/// The task returns the extension when it shuts down, so callers can inspect
/// the renderer afterwards.
pub fn spawn<R>(
    config: &PlottyConfig,
    renderer: Option<R>,
) -> Result<(SessionHandle, JoinHandle<PlottyExtension<R, WsConnector>>), SessionError>
where
    R: Renderer + Send + 'static,
{
    let client = DirectoryClient::new(&config.discovery_origin, config.http_timeout)?;
    let (connector, events) = WsConnector::new();
    let mut link = DeviceLink::new(connector, config.device_port).with_retry_delay(config.retry_delay);

    let (opened_tx, opened_rx) = watch::channel(None);
    let opened_tx = Arc::new(opened_tx);
    let on_open = Arc::clone(&opened_tx);
    link.set_on_open(Box::new(move |address| {
        on_open.send_replace(Some(address.to_string()));
    }));

    let extension = PlottyExtension::new(link, renderer);
    let (tx, rx) = mpsc::channel(COMMAND_CAP);
    let task = tokio::spawn(run(extension, events, rx, client, opened_tx));

    Ok((
        SessionHandle {
            tx,
            opened: opened_rx,
        },
        task,
    ))
}

async fn run<R: Renderer>(
    mut ext: PlottyExtension<R, WsConnector>,
    mut events: EventRx,
    mut commands: mpsc::Receiver<SessionCommand>,
    client: DirectoryClient,
    opened: Arc<watch::Sender<Option<String>>>,
) -> PlottyExtension<R, WsConnector> {
    let (fetch_tx, mut fetched) = mpsc::unbounded_channel::<FetchResult>();
    let start_fetch = |request: FetchRequest| {
        let client = client.clone();
        let fetch_tx = fetch_tx.clone();
        tokio::spawn(async move {
            let result = client.fetch().await;
            let _ = fetch_tx.send((result, request));
        });
    };

    info!(endpoint = %client.endpoint(), "plotty session started");
    start_fetch(FetchRequest {
        connect_index: None,
        reply: None,
    });

    loop {
        let retry_due = ext.next_retry_due();
        let deadline = tokio::time::Instant::from_std(retry_due.unwrap_or_else(Instant::now));

        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(SessionCommand::Execute { opcode, actor, args, reply }) => {
                        let output = ext.execute(opcode, &actor, &args);
                        // Callers may wait_open right after the reply.
                        clear_if_not_open(&opened, &ext);
                        match output {
                            // The connect happens once the fetch lands; scripts do not wait for it.
                            BlockOutput::RefreshDirectory { connect_index } => {
                                start_fetch(FetchRequest {
                                    connect_index,
                                    reply: None,
                                });
                                let _ = reply.send(BlockOutput::Done);
                            }
                            output => {
                                let _ = reply.send(output);
                            }
                        }
                    }
                    Some(SessionCommand::ActorCreated { actor, source }) => {
                        ext.actor_created(&actor, source.as_ref());
                    }
                    Some(SessionCommand::ActorDestroyed { actor }) => ext.actor_destroyed(&actor),
                    Some(SessionCommand::ActorMoved { actor, x, y, forced }) => {
                        ext.actor_moved(&actor, x, y, forced);
                    }
                    Some(SessionCommand::RefreshDevices { reply }) => start_fetch(FetchRequest {
                        connect_index: None,
                        reply: Some(reply),
                    }),
                    Some(SessionCommand::Snapshot { reply }) => {
                        let _ = reply.send(snapshot(&ext));
                    }
                    Some(SessionCommand::Info { reply }) => {
                        let _ = reply.send(ext.info());
                    }
                    Some(SessionCommand::StopAll) => ext.stop_all(),
                }
            }
            Some((id, event)) = events.recv() => {
                ext.handle_transport_event(id, event, Instant::now());
            }
            Some((result, request)) = fetched.recv() => {
                ext.apply_directory(result, request.connect_index);
                if let Some(reply) = request.reply {
                    let _ = reply.send(BlockOutput::Done);
                }
            }
            _ = tokio::time::sleep_until(deadline), if retry_due.is_some() => {
                ext.tick(Instant::now());
            }
        }
        clear_if_not_open(&opened, &ext);
    }

    close_gracefully(&mut ext, &mut events).await;
    clear_if_not_open(&opened, &ext);
    info!("plotty session stopped");
    ext
}

/// Lets queued frames drain and the close handshake finish, bounded by [`CLOSE_GRACE`].
async fn close_gracefully<R: Renderer>(ext: &mut PlottyExtension<R, WsConnector>, events: &mut EventRx) {
    if !ext.close_link() {
        return;
    }
    let drain = async {
        while ext.link().state() == LinkState::Closing {
            match events.recv().await {
                Some((id, event)) => {
                    ext.handle_transport_event(id, event, Instant::now());
                }
                None => break,
            }
        }
    };
    if tokio::time::timeout(CLOSE_GRACE, drain).await.is_err() {
        warn!("plotter did not confirm close in time");
    } else {
        debug!("plotter connection closed");
    }
}

/// Withdraws the published address once the link has left `Open`.
fn clear_if_not_open<R: Renderer>(opened: &watch::Sender<Option<String>>, ext: &PlottyExtension<R, WsConnector>) {
    if !ext.link().is_open() {
        opened.send_if_modified(|current| current.take().is_some());
    }
}

fn snapshot<R: Renderer>(ext: &PlottyExtension<R, WsConnector>) -> SessionSnapshot {
    SessionSnapshot {
        status: ext.connection_status(),
        link_state: ext.link().state(),
        selected_device: ext.selected_device().to_string(),
        directory_loaded: ext.directory().is_loaded(),
        devices: ext.directory().entries().to_vec(),
        retry_pending: ext.next_retry_due().is_some(),
    }
}
