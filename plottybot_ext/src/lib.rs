pub mod blocks;
pub mod command;
pub mod config;
pub mod directory;
pub mod extension;
pub mod host_api;
pub mod link;
pub mod mock;
pub mod net;
pub mod pen;
pub mod preview;
pub mod protocol;
pub mod session;
pub mod shapes;
pub mod turtle;

#[cfg(test)]
mod testing;

pub use crate::blocks::{extension_info, ArgValue, BlockArgs, BlockOutput, ExtensionInfo, Opcode};
pub use crate::command::MotionCommand;
pub use crate::config::PlottyConfig;
pub use crate::directory::{DeviceDirectory, DirectoryClient, DiscoveryError, SelectionError};
pub use crate::extension::{PlottyExtension, NO_DEVICE};
pub use crate::host_api::{DrawableId, LayerId, PenAttributes, Renderer};
pub use crate::link::{ConnectionStatus, Connector, DeviceLink, LinkState, Transport, TransportError};
pub use crate::mock::MockPlotter;
pub use crate::net::{WsConnector, WsTransport};
pub use crate::preview::SvgPreview;
pub use crate::protocol::{
    ActorId, ConnectionId, DeviceEntry, PlotterMessage, TransportEvent, COMMAND_CAP, OUTBOUND_CAP,
};
pub use crate::session::{SessionError, SessionHandle, SessionSnapshot};
pub use crate::shapes::Shape;
pub use crate::turtle::{Pose, TurnDirection};

/// Installs a `tracing` subscriber filtered by `RUST_LOG`, falling back to `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
