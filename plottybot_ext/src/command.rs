use crate::link::{Connector, DeviceLink};
use crate::protocol::{ActorId, PlotterMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    PenDown,
    PenUp,
    PenToggle,
    MoveTo,
    Stop,
}

/// One plotter instruction produced by the pen and motion blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionCommand {
    PenDown {
        actor: ActorId,
    },
    PenUp {
        actor: ActorId,
    },
    PenToggle {
        actor: ActorId,
    },
    MoveTo {
        actor: ActorId,
        x: f64,
        y: f64,
        old_x: f64,
        old_y: f64,
    },
    Stop,
}

impl MotionCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            MotionCommand::PenDown { .. } => CommandKind::PenDown,
            MotionCommand::PenUp { .. } => CommandKind::PenUp,
            MotionCommand::PenToggle { .. } => CommandKind::PenToggle,
            MotionCommand::MoveTo { .. } => CommandKind::MoveTo,
            MotionCommand::Stop => CommandKind::Stop,
        }
    }

    pub fn actor(&self) -> Option<&ActorId> {
        match self {
            MotionCommand::PenDown { actor }
            | MotionCommand::PenUp { actor }
            | MotionCommand::PenToggle { actor }
            | MotionCommand::MoveTo { actor, .. } => Some(actor),
            MotionCommand::Stop => None,
        }
    }

    pub fn encode(&self) -> PlotterMessage {
        match self {
            MotionCommand::PenDown { actor } => PlotterMessage::PenDown {
                target: actor.clone(),
            },
            MotionCommand::PenUp { actor } => PlotterMessage::PenUp {
                target: actor.clone(),
            },
            MotionCommand::PenToggle { actor } => PlotterMessage::PenToggle {
                target: actor.clone(),
            },
            MotionCommand::MoveTo {
                actor,
                x,
                y,
                old_x,
                old_y,
            } => PlotterMessage::GoToXy {
                target: actor.clone(),
                x: *x,
                y: *y,
                old_x: *old_x,
                old_y: *old_y,
            },
            MotionCommand::Stop => PlotterMessage::Stop,
        }
    }
}

/// Encodes `cmd` and hands it to the link. Returns whether it went out.
pub fn dispatch<C: Connector>(link: &mut DeviceLink<C>, cmd: &MotionCommand) -> bool {
    link.send(&cmd.encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkState;
    use crate::protocol::TransportEvent;
    use crate::testing::FakeWire;
    use serde_json::json;
    use std::time::Instant;

    #[test]
    fn every_kind_maps_to_its_wire_tag() {
        let actor = ActorId::new("s1");
        let cases = [
            (MotionCommand::PenDown { actor: actor.clone() }, CommandKind::PenDown, "penDown"),
            (MotionCommand::PenUp { actor: actor.clone() }, CommandKind::PenUp, "penUp"),
            (
                MotionCommand::PenToggle { actor: actor.clone() },
                CommandKind::PenToggle,
                "penToggle",
            ),
            (
                MotionCommand::MoveTo {
                    actor: actor.clone(),
                    x: 1.0,
                    y: 2.0,
                    old_x: 0.0,
                    old_y: 0.0,
                },
                CommandKind::MoveTo,
                "goToXY",
            ),
            (MotionCommand::Stop, CommandKind::Stop, "stop"),
        ];
        for (cmd, kind, tag) in cases {
            assert_eq!(cmd.kind(), kind);
            let encoded = cmd.encode();
            assert_eq!(encoded.type_tag(), tag);
            assert_eq!(encoded.target(), cmd.actor());
        }
    }

    #[test]
    fn dispatch_sends_json_only_when_open() {
        let wire = FakeWire::default();
        let mut link = DeviceLink::new(wire.connector(), 8766);
        let cmd = MotionCommand::MoveTo {
            actor: ActorId::new("s1"),
            x: 5.0,
            y: 6.0,
            old_x: 1.0,
            old_y: 2.0,
        };

        assert!(!dispatch(&mut link, &cmd));
        let id = link.connect("10.0.0.5");
        assert!(!dispatch(&mut link, &cmd));
        link.handle_event(id, TransportEvent::Opened, Instant::now());
        assert_eq!(link.state(), LinkState::Open);
        assert!(dispatch(&mut link, &cmd));
        assert!(dispatch(&mut link, &MotionCommand::Stop));

        assert_eq!(
            wire.sent_json(),
            vec![
                json!({"type": "goToXY", "target": "s1", "x": 5.0, "y": 6.0, "oldX": 1.0, "oldY": 2.0}),
                json!({"type": "stop"}),
            ]
        );
    }
}
