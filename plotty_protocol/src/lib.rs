use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEVICE_PORT: u16 = 8766;
pub const DEVICES_PATH: &str = "/api/devices";

/// Identity of a drawable actor as the host knows it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One outbound instruction for the plotter, one JSON text frame each.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum PlotterMessage {
    #[serde(rename = "penDown")]
    PenDown { target: ActorId },
    #[serde(rename = "penUp")]
    PenUp { target: ActorId },
    #[serde(rename = "penToggle")]
    PenToggle { target: ActorId },
    #[serde(rename = "goToXY", rename_all = "camelCase")]
    GoToXy {
        target: ActorId,
        x: f64,
        y: f64,
        old_x: f64,
        old_y: f64,
    },
    /// Global halt; carries no target.
    #[serde(rename = "stop")]
    Stop,
}

impl PlotterMessage {
    pub fn type_tag(&self) -> &'static str {
        match self {
            PlotterMessage::PenDown { .. } => "penDown",
            PlotterMessage::PenUp { .. } => "penUp",
            PlotterMessage::PenToggle { .. } => "penToggle",
            PlotterMessage::GoToXy { .. } => "goToXY",
            PlotterMessage::Stop => "stop",
        }
    }

    pub fn target(&self) -> Option<&ActorId> {
        match self {
            PlotterMessage::PenDown { target }
            | PlotterMessage::PenUp { target }
            | PlotterMessage::PenToggle { target }
            | PlotterMessage::GoToXy { target, .. } => Some(target),
            PlotterMessage::Stop => None,
        }
    }
}

/// A named plotter as advertised by the discovery endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub name: String,
    pub address: String,
}
