pub const COMMAND_CAP: usize = 256;
pub const OUTBOUND_CAP: usize = 256;

/// Identifies one opened transport; events from replaced transports carry a stale id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Callbacks a transport delivers back to the link, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed,
    Error(String),
}

pub enum OutboundMsg {
    Text(String),
    Close,
}

pub use plotty_protocol::{ActorId, DeviceEntry, PlotterMessage, DEVICES_PATH, DEVICE_PORT};
