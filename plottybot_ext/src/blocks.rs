//! Block opcodes, argument coercion and the metadata the host registers.

use crate::directory::{DeviceDirectory, MenuItem};
use crate::pen::ColorParam;
use crate::shapes::Shape;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const EXTENSION_ID: &str = "plottybot";
pub const EXTENSION_NAME: &str = "Plottybot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Opcode {
    ConnectToPlotty,
    ConnectToPlottyNamed,
    GetDeviceName,
    GetConnectionStatus,
    DisconnectFromPlotty,
    Clear,
    PenDown,
    PenUp,
    TogglePen,
    SetPenColorParamTo,
    ChangePenColorParamBy,
    SetPenSizeTo,
    ChangePenSizeBy,
    SetPenShadeToNumber,
    ChangePenShadeBy,
    SetPenHueToNumber,
    ChangePenHueBy,
    MoveSteps,
    TurnRight,
    TurnLeft,
    #[serde(rename = "goToXY")]
    GoToXy,
    DrawShape,
}

impl Opcode {
    pub const ALL: [Opcode; 22] = [
        Opcode::ConnectToPlotty,
        Opcode::ConnectToPlottyNamed,
        Opcode::GetDeviceName,
        Opcode::GetConnectionStatus,
        Opcode::DisconnectFromPlotty,
        Opcode::Clear,
        Opcode::PenDown,
        Opcode::PenUp,
        Opcode::TogglePen,
        Opcode::SetPenColorParamTo,
        Opcode::ChangePenColorParamBy,
        Opcode::SetPenSizeTo,
        Opcode::ChangePenSizeBy,
        Opcode::SetPenShadeToNumber,
        Opcode::ChangePenShadeBy,
        Opcode::SetPenHueToNumber,
        Opcode::ChangePenHueBy,
        Opcode::MoveSteps,
        Opcode::TurnRight,
        Opcode::TurnLeft,
        Opcode::GoToXy,
        Opcode::DrawShape,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::ConnectToPlotty => "connectToPlotty",
            Opcode::ConnectToPlottyNamed => "connectToPlottyNamed",
            Opcode::GetDeviceName => "getDeviceName",
            Opcode::GetConnectionStatus => "getConnectionStatus",
            Opcode::DisconnectFromPlotty => "disconnectFromPlotty",
            Opcode::Clear => "clear",
            Opcode::PenDown => "penDown",
            Opcode::PenUp => "penUp",
            Opcode::TogglePen => "togglePen",
            Opcode::SetPenColorParamTo => "setPenColorParamTo",
            Opcode::ChangePenColorParamBy => "changePenColorParamBy",
            Opcode::SetPenSizeTo => "setPenSizeTo",
            Opcode::ChangePenSizeBy => "changePenSizeBy",
            Opcode::SetPenShadeToNumber => "setPenShadeToNumber",
            Opcode::ChangePenShadeBy => "changePenShadeBy",
            Opcode::SetPenHueToNumber => "setPenHueToNumber",
            Opcode::ChangePenHueBy => "changePenHueBy",
            Opcode::MoveSteps => "moveSteps",
            Opcode::TurnRight => "turnRight",
            Opcode::TurnLeft => "turnLeft",
            Opcode::GoToXy => "goToXY",
            Opcode::DrawShape => "drawShape",
        }
    }

    pub fn block_type(self) -> BlockType {
        match self {
            Opcode::GetDeviceName | Opcode::GetConnectionStatus => BlockType::Reporter,
            _ => BlockType::Command,
        }
    }

    /// Scratch 2 compatibility blocks, registered but kept out of the palette.
    pub fn is_legacy(self) -> bool {
        matches!(
            self,
            Opcode::SetPenShadeToNumber
                | Opcode::ChangePenShadeBy
                | Opcode::SetPenHueToNumber
                | Opcode::ChangePenHueBy
        )
    }

    fn text(self) -> &'static str {
        match self {
            Opcode::ConnectToPlotty => "Connect to Plotty [INDEX]",
            Opcode::ConnectToPlottyNamed => "Connect to Plotty named [DEVICE]",
            Opcode::GetDeviceName => "Device name",
            Opcode::GetConnectionStatus => "Connection status",
            Opcode::DisconnectFromPlotty => "Disconnect from Plotty",
            Opcode::Clear => "erase all",
            Opcode::PenDown => "pen down",
            Opcode::PenUp => "pen up",
            Opcode::TogglePen => "toggle pen",
            Opcode::SetPenColorParamTo => "set pen [COLOR_PARAM] to [VALUE]",
            Opcode::ChangePenColorParamBy => "change pen [COLOR_PARAM] by [VALUE]",
            Opcode::SetPenSizeTo => "set pen size to [SIZE]",
            Opcode::ChangePenSizeBy => "change pen size by [SIZE]",
            Opcode::SetPenShadeToNumber => "set pen shade to [SHADE]",
            Opcode::ChangePenShadeBy => "change pen shade by [SHADE]",
            Opcode::SetPenHueToNumber => "set pen color to [HUE]",
            Opcode::ChangePenHueBy => "change pen color by [HUE]",
            Opcode::MoveSteps => "move [STEPS] steps",
            Opcode::TurnRight => "turn right [DEGREES] degrees",
            Opcode::TurnLeft => "turn left [DEGREES] degrees",
            Opcode::GoToXy => "go to x: [X] y: [Y]",
            Opcode::DrawShape => "draw [SHAPE] of size [SIZE]",
        }
    }

    fn arguments(self) -> Vec<ArgumentInfo> {
        match self {
            Opcode::ConnectToPlotty => vec![ArgumentInfo::number("INDEX", 1)],
            Opcode::ConnectToPlottyNamed => vec![ArgumentInfo::menu("DEVICE", MENU_DEVICES, "")],
            Opcode::SetPenColorParamTo => vec![
                ArgumentInfo::menu("COLOR_PARAM", MENU_COLOR_PARAM, ColorParam::Color.as_str()),
                ArgumentInfo::number("VALUE", 50),
            ],
            Opcode::ChangePenColorParamBy => vec![
                ArgumentInfo::menu("COLOR_PARAM", MENU_COLOR_PARAM, ColorParam::Color.as_str()),
                ArgumentInfo::number("VALUE", 10),
            ],
            Opcode::SetPenSizeTo | Opcode::ChangePenSizeBy => vec![ArgumentInfo::number("SIZE", 1)],
            Opcode::SetPenShadeToNumber | Opcode::ChangePenShadeBy => {
                vec![ArgumentInfo::number("SHADE", 1)]
            }
            Opcode::SetPenHueToNumber | Opcode::ChangePenHueBy => vec![ArgumentInfo::number("HUE", 1)],
            Opcode::MoveSteps => vec![ArgumentInfo::number("STEPS", 10)],
            Opcode::TurnRight | Opcode::TurnLeft => vec![ArgumentInfo::number("DEGREES", 15)],
            Opcode::GoToXy => vec![ArgumentInfo::number("X", 0), ArgumentInfo::number("Y", 0)],
            Opcode::DrawShape => vec![
                ArgumentInfo::menu("SHAPE", MENU_SHAPES, Shape::Square.as_str()),
                ArgumentInfo::number("SIZE", 100),
            ],
            Opcode::GetDeviceName
            | Opcode::GetConnectionStatus
            | Opcode::DisconnectFromPlotty
            | Opcode::Clear
            | Opcode::PenDown
            | Opcode::PenUp
            | Opcode::TogglePen => Vec::new(),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown opcode: {0}")]
pub struct UnknownOpcode(pub String);

impl FromStr for Opcode {
    type Err = UnknownOpcode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Opcode::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOpcode(s.to_string()))
    }
}

/// A block argument as the host hands it over: numbers may arrive as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl ArgValue {
    /// Scratch `Cast.toNumber`: unparsable input and NaN become 0.
    pub fn to_number(&self) -> f64 {
        let n = match self {
            ArgValue::Number(n) => *n,
            ArgValue::Bool(b) => f64::from(u8::from(*b)),
            ArgValue::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    0.0
                } else {
                    s.parse::<f64>().unwrap_or(0.0)
                }
            }
        };
        if n.is_nan() {
            0.0
        } else {
            n
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            ArgValue::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                format!("{}", *n as i64)
            }
            ArgValue::Number(n) => n.to_string(),
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Text(s) => s.clone(),
        }
    }
}

impl From<f64> for ArgValue {
    fn from(n: f64) -> Self {
        ArgValue::Number(n)
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockArgs(BTreeMap<String, ArgValue>);

impl BlockArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<ArgValue>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.0.get(name)
    }

    /// Missing arguments read as 0.
    pub fn number(&self, name: &str) -> f64 {
        self.get(name).map(ArgValue::to_number).unwrap_or(0.0)
    }

    pub fn text(&self, name: &str) -> String {
        self.get(name).map(ArgValue::to_text).unwrap_or_default()
    }
}

/// What running one block produced.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutput {
    Done,
    Report(String),
    /// The block needs a fresh device list; once it arrives, connect to
    /// `connect_index` if one is given.
    RefreshDirectory { connect_index: Option<f64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Command,
    Reporter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentInfo {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub arg_type: &'static str,
    pub default_value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub menu: Option<&'static str>,
}

impl ArgumentInfo {
    fn number(name: &'static str, default: i64) -> Self {
        Self {
            name,
            arg_type: "number",
            default_value: json!(default),
            menu: None,
        }
    }

    fn menu(name: &'static str, menu: &'static str, default: &str) -> Self {
        Self {
            name,
            arg_type: "string",
            default_value: json!(default),
            menu: Some(menu),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    pub opcode: Opcode,
    pub block_type: BlockType,
    pub text: &'static str,
    pub arguments: Vec<ArgumentInfo>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub hide_from_palette: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuInfo {
    pub accept_reporters: bool,
    pub items: Vec<MenuItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub blocks: Vec<BlockInfo>,
    pub menus: BTreeMap<&'static str, MenuInfo>,
}

pub const MENU_DEVICES: &str = "devices";
pub const MENU_COLOR_PARAM: &str = "colorParam";
pub const MENU_SHAPES: &str = "shapes";

/// Registration metadata; the device menu reflects `directory` as it is now.
pub fn extension_info(directory: &DeviceDirectory) -> ExtensionInfo {
    let blocks = Opcode::ALL
        .into_iter()
        .map(|opcode| BlockInfo {
            opcode,
            block_type: opcode.block_type(),
            text: opcode.text(),
            arguments: opcode.arguments(),
            hide_from_palette: opcode.is_legacy(),
        })
        .collect();

    let mut menus = BTreeMap::new();
    menus.insert(
        MENU_DEVICES,
        MenuInfo {
            accept_reporters: true,
            items: directory.menu_items().collect(),
        },
    );
    menus.insert(
        MENU_COLOR_PARAM,
        MenuInfo {
            accept_reporters: true,
            items: ColorParam::ALL.into_iter().map(|p| static_item(p.as_str())).collect(),
        },
    );
    menus.insert(
        MENU_SHAPES,
        MenuInfo {
            accept_reporters: true,
            items: Shape::ALL.into_iter().map(|s| static_item(s.as_str())).collect(),
        },
    );

    ExtensionInfo {
        id: EXTENSION_ID,
        name: EXTENSION_NAME,
        blocks,
        menus,
    }
}

fn static_item(value: &str) -> MenuItem {
    MenuItem {
        text: value.to_string(),
        value: value.to_string(),
    }
}
