use crate::blocks::{extension_info, BlockArgs, BlockOutput, ExtensionInfo, Opcode};
use crate::command::{dispatch, MotionCommand};
use crate::directory::{DeviceDirectory, DiscoveryError};
use crate::host_api::{LayerId, Renderer};
use crate::link::{Connector, ConnectionStatus, DeviceLink};
use crate::pen::PenState;
use crate::protocol::{ActorId, ConnectionId, DeviceEntry, TransportEvent};
use crate::shapes::{Shape, TurtleStep};
use crate::turtle::{Pose, TurnDirection};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const NO_DEVICE: &str = "None";

/// Per-actor state the extension keeps beside the host's own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActorRecord {
    pub pose: Pose,
    pub pen: PenState,
}

pub type BlockHandler<R, C> = fn(&mut PlottyExtension<R, C>, &ActorId, &BlockArgs) -> BlockOutput;

/// Looks up the handler for `opcode`. Every opcode has exactly one entry.
pub fn handler<R: Renderer, C: Connector>(opcode: Opcode) -> BlockHandler<R, C> {
    match opcode {
        Opcode::ConnectToPlotty => |_, _, args| BlockOutput::RefreshDirectory {
            connect_index: Some(args.number("INDEX")),
        },
        Opcode::ConnectToPlottyNamed => |ext, _, args| {
            ext.connect_by_name(&args.text("DEVICE"));
            BlockOutput::Done
        },
        Opcode::GetDeviceName => |ext, _, _| BlockOutput::Report(ext.selected_device().to_string()),
        Opcode::GetConnectionStatus => {
            |ext, _, _| BlockOutput::Report(ext.connection_status().label().to_string())
        }
        Opcode::DisconnectFromPlotty => |ext, _, _| {
            ext.disconnect();
            BlockOutput::Done
        },
        Opcode::Clear => |ext, _, _| {
            ext.clear();
            BlockOutput::Done
        },
        Opcode::PenDown => |ext, actor, _| {
            ext.pen_down(actor);
            BlockOutput::Done
        },
        Opcode::PenUp => |ext, actor, _| {
            ext.pen_up(actor);
            BlockOutput::Done
        },
        Opcode::TogglePen => |ext, actor, _| {
            ext.toggle_pen(actor);
            BlockOutput::Done
        },
        Opcode::SetPenColorParamTo => |ext, actor, args| {
            let (param, value) = (args.text("COLOR_PARAM"), args.number("VALUE"));
            ext.pen_mut(actor).set_or_change_named(&param, value, false);
            BlockOutput::Done
        },
        Opcode::ChangePenColorParamBy => |ext, actor, args| {
            let (param, value) = (args.text("COLOR_PARAM"), args.number("VALUE"));
            ext.pen_mut(actor).set_or_change_named(&param, value, true);
            BlockOutput::Done
        },
        Opcode::SetPenSizeTo => |ext, actor, args| {
            ext.pen_mut(actor).set_diameter(args.number("SIZE"));
            BlockOutput::Done
        },
        Opcode::ChangePenSizeBy => |ext, actor, args| {
            ext.pen_mut(actor).change_diameter(args.number("SIZE"));
            BlockOutput::Done
        },
        Opcode::SetPenShadeToNumber => |ext, actor, args| {
            ext.pen_mut(actor).set_legacy_shade(args.number("SHADE"));
            BlockOutput::Done
        },
        Opcode::ChangePenShadeBy => |ext, actor, args| {
            ext.pen_mut(actor).change_legacy_shade(args.number("SHADE"));
            BlockOutput::Done
        },
        Opcode::SetPenHueToNumber => |ext, actor, args| {
            ext.pen_mut(actor).set_legacy_hue(args.number("HUE"));
            BlockOutput::Done
        },
        Opcode::ChangePenHueBy => |ext, actor, args| {
            ext.pen_mut(actor).change_legacy_hue(args.number("HUE"));
            BlockOutput::Done
        },
        Opcode::MoveSteps => |ext, actor, args| {
            ext.move_steps(actor, args.number("STEPS"));
            BlockOutput::Done
        },
        Opcode::TurnRight => |ext, actor, args| {
            ext.turn(actor, args.number("DEGREES"), TurnDirection::Right);
            BlockOutput::Done
        },
        Opcode::TurnLeft => |ext, actor, args| {
            ext.turn(actor, args.number("DEGREES"), TurnDirection::Left);
            BlockOutput::Done
        },
        Opcode::GoToXy => |ext, actor, args| {
            ext.go_to_xy(actor, args.number("X"), args.number("Y"));
            BlockOutput::Done
        },
        Opcode::DrawShape => |ext, actor, args| {
            match args.text("SHAPE").parse::<Shape>() {
                Ok(shape) => ext.draw_shape(actor, shape, args.number("SIZE")),
                Err(e) => warn!(error = %e, "drawShape ignored"),
            }
            BlockOutput::Done
        },
    }
}

/// The extension instance: device directory, link, per-actor turtle state and
/// the optional preview renderer.
pub struct PlottyExtension<R: Renderer, C: Connector> {
    renderer: Option<R>,
    pen_layer: Option<LayerId>,
    directory: DeviceDirectory,
    link: DeviceLink<C>,
    actors: HashMap<ActorId, ActorRecord>,
    selected_device: String,
}

impl<R: Renderer, C: Connector> PlottyExtension<R, C> {
    pub fn new(link: DeviceLink<C>, renderer: Option<R>) -> Self {
        Self {
            renderer,
            pen_layer: None,
            directory: DeviceDirectory::new(),
            link,
            actors: HashMap::new(),
            selected_device: NO_DEVICE.to_string(),
        }
    }

    pub fn execute(&mut self, opcode: Opcode, actor: &ActorId, args: &BlockArgs) -> BlockOutput {
        debug!(%opcode, %actor, "block");
        handler::<R, C>(opcode)(self, actor, args)
    }

    pub fn info(&self) -> ExtensionInfo {
        extension_info(&self.directory)
    }

    pub fn directory(&self) -> &DeviceDirectory {
        &self.directory
    }

    pub fn link(&self) -> &DeviceLink<C> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut DeviceLink<C> {
        &mut self.link
    }

    pub fn renderer(&self) -> Option<&R> {
        self.renderer.as_ref()
    }

    pub fn into_renderer(self) -> Option<R> {
        self.renderer
    }

    pub fn selected_device(&self) -> &str {
        &self.selected_device
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.link.status()
    }

    pub fn actor(&self, actor: &ActorId) -> Option<&ActorRecord> {
        self.actors.get(actor)
    }

    fn record_mut(&mut self, actor: &ActorId) -> &mut ActorRecord {
        self.actors.entry(actor.clone()).or_default()
    }

    pub fn pen_mut(&mut self, actor: &ActorId) -> &mut PenState {
        &mut self.record_mut(actor).pen
    }

    // Actor lifecycle.

    /// A clone inherits its source's pen and position.
    pub fn actor_created(&mut self, actor: &ActorId, source: Option<&ActorId>) {
        let record = source
            .and_then(|src| self.actors.get(src))
            .cloned()
            .unwrap_or_default();
        self.actors.insert(actor.clone(), record);
    }

    pub fn actor_destroyed(&mut self, actor: &ActorId) {
        self.actors.remove(actor);
    }

    /// The host moved `actor`; `forced` moves (drags) leave no trail and are not sent.
    pub fn actor_moved(&mut self, actor: &ActorId, x: f64, y: f64, forced: bool) {
        let heading = self.record_mut(actor).pose.heading;
        self.commit_move(actor, Pose::new(x, y, heading), forced);
    }

    // Turtle motion.

    pub fn move_steps(&mut self, actor: &ActorId, distance: f64) {
        let next = self.record_mut(actor).pose.forward(distance);
        self.commit_move(actor, next, false);
    }

    pub fn turn(&mut self, actor: &ActorId, degrees: f64, direction: TurnDirection) {
        let record = self.record_mut(actor);
        record.pose = record.pose.turned(degrees, direction);
    }

    pub fn go_to_xy(&mut self, actor: &ActorId, x: f64, y: f64) {
        let heading = self.record_mut(actor).pose.heading;
        self.commit_move(actor, Pose::new(x, y, heading), false);
    }

    pub fn draw_shape(&mut self, actor: &ActorId, shape: Shape, size: f64) {
        debug!(%actor, %shape, size, "drawing shape");
        for step in shape.steps(size) {
            let next = step.apply(&self.record_mut(actor).pose);
            match step {
                TurtleStep::Forward(_) => self.commit_move(actor, next, false),
                TurtleStep::Turn(_) => self.record_mut(actor).pose = next,
            }
        }
    }

    fn commit_move(&mut self, actor: &ActorId, next: Pose, forced: bool) {
        let record = self.record_mut(actor);
        let old = record.pose;
        record.pose = next;
        let trail = record.pen.pen_down.then(|| record.pen.attributes());

        if forced {
            return;
        }
        if let Some(attrs) = trail {
            if let Some(layer) = self.pen_layer() {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.draw_segment(layer, &attrs, old.x, old.y, next.x, next.y);
                    renderer.request_redraw();
                }
            }
        }
        dispatch(
            &mut self.link,
            &MotionCommand::MoveTo {
                actor: actor.clone(),
                x: next.x,
                y: next.y,
                old_x: old.x,
                old_y: old.y,
            },
        );
    }

    // Pen.

    pub fn pen_down(&mut self, actor: &ActorId) {
        let record = self.record_mut(actor);
        record.pen.pen_down = true;
        let (attrs, pose) = (record.pen.attributes(), record.pose);
        if let Some(layer) = self.pen_layer() {
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.draw_point(layer, &attrs, pose.x, pose.y);
                renderer.request_redraw();
            }
        }
        dispatch(&mut self.link, &MotionCommand::PenDown { actor: actor.clone() });
    }

    pub fn pen_up(&mut self, actor: &ActorId) {
        self.record_mut(actor).pen.pen_down = false;
        dispatch(&mut self.link, &MotionCommand::PenUp { actor: actor.clone() });
    }

    pub fn toggle_pen(&mut self, actor: &ActorId) {
        let pen = &mut self.record_mut(actor).pen;
        pen.pen_down = !pen.pen_down;
        dispatch(&mut self.link, &MotionCommand::PenToggle { actor: actor.clone() });
    }

    fn pen_layer(&mut self) -> Option<LayerId> {
        if self.pen_layer.is_none() {
            let renderer = self.renderer.as_mut()?;
            let layer = renderer.create_layer()?;
            if renderer.create_drawable_on_layer(layer).is_none() {
                warn!(?layer, "pen layer has no drawable");
            }
            self.pen_layer = Some(layer);
        }
        self.pen_layer
    }

    /// Erases the preview and restarts the device connection.
    pub fn clear(&mut self) {
        if let Some(layer) = self.pen_layer() {
            if let Some(renderer) = self.renderer.as_mut() {
                renderer.clear_layer(layer);
                renderer.request_redraw();
            }
        }
        if self.link.reconnect().is_none() {
            debug!("clear: no device to reconnect to");
        }
    }

    /// Project stop: halt the plotter, then drop the connection.
    pub fn stop_all(&mut self) {
        dispatch(&mut self.link, &MotionCommand::Stop);
        self.link.disconnect();
    }

    // Devices.

    /// Folds a directory fetch into the extension, then connects to
    /// `connect_index` when one was requested.
    pub fn apply_directory(
        &mut self,
        result: Result<Vec<DeviceEntry>, DiscoveryError>,
        connect_index: Option<f64>,
    ) {
        match result {
            Ok(entries) => {
                info!(count = entries.len(), "device directory refreshed");
                self.directory.replace(entries);
                if let Some(index) = connect_index {
                    self.connect_to_index(index);
                }
            }
            Err(e) => {
                warn!(error = %e, "device directory refresh failed");
                if connect_index.is_some() {
                    self.selected_device = NO_DEVICE.to_string();
                }
            }
        }
    }

    pub fn connect_to_index(&mut self, index: f64) -> Option<ConnectionId> {
        let entry = match self.directory.resolve_by_index(index) {
            Ok(entry) => entry.clone(),
            Err(e) => {
                warn!(error = %e, "cannot select device");
                self.selected_device = NO_DEVICE.to_string();
                return None;
            }
        };
        Some(self.select(entry))
    }

    pub fn connect_by_name(&mut self, name: &str) -> Option<ConnectionId> {
        let entry = match self.directory.resolve_by_name(name) {
            Ok(entry) => entry.clone(),
            Err(e) => {
                warn!(error = %e, "cannot select device");
                self.selected_device = NO_DEVICE.to_string();
                return None;
            }
        };
        Some(self.select(entry))
    }

    fn select(&mut self, entry: DeviceEntry) -> ConnectionId {
        info!(name = %entry.name, address = %entry.address, "device selected");
        self.selected_device = entry.name;
        self.link.connect(&entry.address)
    }

    pub fn disconnect(&mut self) {
        self.link.disconnect();
    }

    // Transport plumbing, forwarded to the link.

    pub fn handle_transport_event(&mut self, id: ConnectionId, event: TransportEvent, now: Instant) {
        self.link.handle_event(id, event, now);
    }

    pub fn tick(&mut self, now: Instant) -> bool {
        self.link.tick(now)
    }

    pub fn next_retry_due(&self) -> Option<Instant> {
        self.link.next_retry_due()
    }

    pub fn close_link(&mut self) -> bool {
        self.link.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::parse_device_list;
    use crate::link::{LinkState, RETRY_DELAY};
    use crate::testing::{DrawCall, FakeConnector, FakeWire, RecordingRenderer};
    use serde_json::json;

    type TestExt = PlottyExtension<RecordingRenderer, FakeConnector>;

    fn extension(wire: &FakeWire) -> TestExt {
        PlottyExtension::new(
            DeviceLink::new(wire.connector(), 8766),
            Some(RecordingRenderer::default()),
        )
    }

    fn two_plotters() -> Result<Vec<DeviceEntry>, DiscoveryError> {
        parse_device_list(r#"{"PlotterA":"10.0.0.5","PlotterB":"10.0.0.6"}"#)
    }

    fn open_link(ext: &mut TestExt) {
        let id = ext.link().connection_id().unwrap();
        ext.handle_transport_event(id, TransportEvent::Opened, Instant::now());
        assert_eq!(ext.link().state(), LinkState::Open);
    }

    fn run(ext: &mut TestExt, opcode: Opcode, actor: &ActorId, args: BlockArgs) -> BlockOutput {
        ext.execute(opcode, actor, &args)
    }

    #[test]
    fn select_second_device_and_send_a_move() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let sprite = ActorId::new("sprite1");

        let out = run(&mut ext, Opcode::ConnectToPlotty, &sprite, BlockArgs::new().with("INDEX", 2.0));
        assert_eq!(out, BlockOutput::RefreshDirectory { connect_index: Some(2.0) });
        ext.apply_directory(two_plotters(), Some(2.0));

        assert_eq!(ext.selected_device(), "PlotterB");
        assert_eq!(wire.opened_urls(), vec!["ws://10.0.0.6:8766".to_string()]);
        open_link(&mut ext);

        ext.pen_mut(&sprite).pen_down = true;
        let before = ext.actor(&sprite).unwrap().pose;
        run(&mut ext, Opcode::MoveSteps, &sprite, BlockArgs::new().with("STEPS", 10.0));

        let sent = wire.sent_json();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["type"], "goToXY");
        assert_eq!(sent[0]["target"], "sprite1");
        assert_eq!(sent[0]["oldX"], json!(before.x));
        assert_eq!(sent[0]["oldY"], json!(before.y));
        assert!((sent[0]["x"].as_f64().unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn reporters_show_device_and_status() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let sprite = ActorId::new("s");
        let report = |ext: &mut TestExt, op| match run(ext, op, &sprite, BlockArgs::new()) {
            BlockOutput::Report(text) => text,
            other => panic!("expected report, got {other:?}"),
        };

        assert_eq!(report(&mut ext, Opcode::GetDeviceName), "None");
        assert_eq!(report(&mut ext, Opcode::GetConnectionStatus), "Not Connected");

        ext.apply_directory(two_plotters(), Some(1.0));
        assert_eq!(report(&mut ext, Opcode::GetDeviceName), "PlotterA");
        assert_eq!(report(&mut ext, Opcode::GetConnectionStatus), "Connecting");
        open_link(&mut ext);
        assert_eq!(report(&mut ext, Opcode::GetConnectionStatus), "Connected");

        run(&mut ext, Opcode::DisconnectFromPlotty, &sprite, BlockArgs::new());
        assert_eq!(report(&mut ext, Opcode::GetConnectionStatus), "Not Connected");
    }

    #[test]
    fn out_of_range_index_resets_selection() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        ext.apply_directory(two_plotters(), Some(1.0));
        assert_eq!(ext.selected_device(), "PlotterA");

        ext.apply_directory(two_plotters(), Some(3.0));
        assert_eq!(ext.selected_device(), "None");
        assert_eq!(ext.directory().len(), 2);
        assert_eq!(wire.opened_urls().len(), 1);
    }

    #[test]
    fn failed_refresh_keeps_entries_and_resets_selection() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        ext.apply_directory(two_plotters(), Some(2.0));
        ext.apply_directory(Err(DiscoveryError::NotAMapping), Some(1.0));
        assert_eq!(ext.selected_device(), "None");
        assert_eq!(ext.directory().len(), 2);
    }

    #[test]
    fn connect_by_name_uses_cached_directory() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let sprite = ActorId::new("s");
        run(&mut ext, Opcode::ConnectToPlottyNamed, &sprite, BlockArgs::new().with("DEVICE", "PlotterA"));
        assert_eq!(ext.selected_device(), "None");
        assert!(wire.opened_urls().is_empty());

        ext.apply_directory(two_plotters(), None);
        run(&mut ext, Opcode::ConnectToPlottyNamed, &sprite, BlockArgs::new().with("DEVICE", "PlotterA"));
        assert_eq!(ext.selected_device(), "PlotterA");
        assert_eq!(wire.opened_urls(), vec!["ws://10.0.0.5:8766".to_string()]);
    }

    #[test]
    fn nothing_is_sent_before_the_link_opens() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let sprite = ActorId::new("s");
        ext.apply_directory(two_plotters(), Some(1.0));
        run(&mut ext, Opcode::PenDown, &sprite, BlockArgs::new());
        run(&mut ext, Opcode::MoveSteps, &sprite, BlockArgs::new().with("STEPS", 5.0));
        assert!(wire.log().sent.is_empty());
        // The preview still follows the turtle.
        assert_eq!(ext.renderer().unwrap().segments().len(), 1);
    }

    #[test]
    fn pen_blocks_emit_their_wire_messages() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let sprite = ActorId::new("s");
        ext.apply_directory(two_plotters(), Some(1.0));
        open_link(&mut ext);

        run(&mut ext, Opcode::PenDown, &sprite, BlockArgs::new());
        run(&mut ext, Opcode::TogglePen, &sprite, BlockArgs::new());
        assert!(!ext.actor(&sprite).unwrap().pen.pen_down);
        run(&mut ext, Opcode::PenUp, &sprite, BlockArgs::new());

        let types: Vec<_> = wire.sent_json().iter().map(|m| m["type"].clone()).collect();
        assert_eq!(types, vec![json!("penDown"), json!("penToggle"), json!("penUp")]);
        let calls = &ext.renderer().unwrap().calls;
        assert!(calls.iter().any(|c| matches!(c, DrawCall::Point { at: (x, y), .. } if *x == 0.0 && *y == 0.0)));
    }

    #[test]
    fn pen_up_moves_are_sent_but_not_drawn() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let sprite = ActorId::new("s");
        ext.apply_directory(two_plotters(), Some(1.0));
        open_link(&mut ext);

        run(&mut ext, Opcode::GoToXy, &sprite, BlockArgs::new().with("X", 30.0).with("Y", "-20"));
        assert!(ext.renderer().unwrap().segments().is_empty());
        let sent = wire.sent_json();
        assert_eq!(
            sent,
            vec![json!({"type": "goToXY", "target": "s", "x": 30.0, "y": -20.0, "oldX": 0.0, "oldY": 0.0})]
        );
    }

    #[test]
    fn forced_moves_update_position_silently() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let sprite = ActorId::new("s");
        ext.apply_directory(two_plotters(), Some(1.0));
        open_link(&mut ext);
        ext.pen_mut(&sprite).pen_down = true;

        ext.actor_moved(&sprite, 50.0, 60.0, true);
        assert!(wire.log().sent.is_empty());
        assert!(ext.renderer().unwrap().segments().is_empty());

        ext.actor_moved(&sprite, 55.0, 60.0, false);
        assert_eq!(ext.renderer().unwrap().segments(), vec![((50.0, 60.0), (55.0, 60.0))]);
        assert_eq!(wire.sent_json()[0]["oldX"], json!(50.0));
    }

    #[test]
    fn turns_do_not_move_or_send() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let sprite = ActorId::new("s");
        ext.apply_directory(two_plotters(), Some(1.0));
        open_link(&mut ext);

        run(&mut ext, Opcode::TurnLeft, &sprite, BlockArgs::new().with("DEGREES", 90.0));
        run(&mut ext, Opcode::TurnRight, &sprite, BlockArgs::new().with("DEGREES", 45.0));
        assert_eq!(ext.actor(&sprite).unwrap().pose.heading, 45.0);
        assert!(wire.log().sent.is_empty());
    }

    #[test]
    fn draw_square_sends_four_moves_and_returns_home() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let sprite = ActorId::new("s");
        ext.apply_directory(two_plotters(), Some(1.0));
        open_link(&mut ext);
        ext.pen_mut(&sprite).pen_down = true;

        run(
            &mut ext,
            Opcode::DrawShape,
            &sprite,
            BlockArgs::new().with("SHAPE", "square").with("SIZE", 40.0),
        );
        assert_eq!(wire.sent_json().len(), 4);
        assert_eq!(ext.renderer().unwrap().segments().len(), 4);
        let pose = ext.actor(&sprite).unwrap().pose;
        assert!(pose.distance_to(&Pose::default()) < 1e-9);

        run(&mut ext, Opcode::DrawShape, &sprite, BlockArgs::new().with("SHAPE", "blob"));
        assert_eq!(wire.sent_json().len(), 4);
    }

    #[test]
    fn clones_inherit_pen_and_destroy_forgets() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let parent = ActorId::new("parent");
        let child = ActorId::new("child");

        run(&mut ext, Opcode::SetPenSizeTo, &parent, BlockArgs::new().with("SIZE", 7.0));
        run(&mut ext, Opcode::PenDown, &parent, BlockArgs::new());
        ext.actor_created(&child, Some(&parent));
        assert_eq!(ext.actor(&child), ext.actor(&parent));

        run(&mut ext, Opcode::ChangePenSizeBy, &child, BlockArgs::new().with("SIZE", 3.0));
        assert_eq!(ext.actor(&child).unwrap().pen.diameter(), 10.0);
        assert_eq!(ext.actor(&parent).unwrap().pen.diameter(), 7.0);

        ext.actor_destroyed(&child);
        assert!(ext.actor(&child).is_none());

        let fresh = ActorId::new("fresh");
        ext.actor_created(&fresh, None);
        assert_eq!(ext.actor(&fresh), Some(&ActorRecord::default()));
    }

    #[test]
    fn color_param_blocks_update_the_pen() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let sprite = ActorId::new("s");
        run(
            &mut ext,
            Opcode::SetPenColorParamTo,
            &sprite,
            BlockArgs::new().with("COLOR_PARAM", "transparency").with("VALUE", 25.0),
        );
        run(
            &mut ext,
            Opcode::ChangePenColorParamBy,
            &sprite,
            BlockArgs::new().with("COLOR_PARAM", "color").with("VALUE", 40.0),
        );
        run(
            &mut ext,
            Opcode::SetPenColorParamTo,
            &sprite,
            BlockArgs::new().with("COLOR_PARAM", "sparkle").with("VALUE", 1.0),
        );
        let pen = &ext.actor(&sprite).unwrap().pen;
        assert_eq!(pen.transparency(), 25.0);
        assert!((pen.color() - 5.66).abs() < 1e-9);
        assert!((pen.rgba()[3] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn legacy_blocks_route_to_the_shade_model() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let sprite = ActorId::new("s");
        run(&mut ext, Opcode::SetPenShadeToNumber, &sprite, BlockArgs::new().with("SHADE", 250.0));
        assert_eq!(ext.actor(&sprite).unwrap().pen.shade(), 50.0);
        run(&mut ext, Opcode::ChangePenShadeBy, &sprite, BlockArgs::new().with("SHADE", 20.0));
        assert_eq!(ext.actor(&sprite).unwrap().pen.shade(), 70.0);
        run(&mut ext, Opcode::SetPenHueToNumber, &sprite, BlockArgs::new().with("HUE", 100.0));
        assert_eq!(ext.actor(&sprite).unwrap().pen.transparency(), 0.0);
    }

    #[test]
    fn clear_wipes_preview_and_reconnects() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        let sprite = ActorId::new("s");
        ext.apply_directory(two_plotters(), Some(2.0));
        open_link(&mut ext);

        run(&mut ext, Opcode::Clear, &sprite, BlockArgs::new());
        let calls = &ext.renderer().unwrap().calls;
        assert!(calls.contains(&DrawCall::Clear(LayerId(1))));
        assert_eq!(wire.opened_urls().len(), 2);
        assert_eq!(wire.closed().len(), 1);
        assert_eq!(ext.link().state(), LinkState::Connecting);
    }

    #[test]
    fn stop_all_halts_then_disconnects() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        ext.apply_directory(two_plotters(), Some(1.0));
        open_link(&mut ext);

        ext.stop_all();
        assert_eq!(wire.sent_json(), vec![json!({"type": "stop"})]);
        assert_eq!(ext.connection_status(), ConnectionStatus::NotConnected);
        assert!(ext.next_retry_due().is_none());
    }

    #[test]
    fn errors_retry_through_tick() {
        let wire = FakeWire::default();
        let mut ext = extension(&wire);
        ext.apply_directory(two_plotters(), Some(1.0));
        let id = ext.link().connection_id().unwrap();
        let t0 = Instant::now();
        ext.handle_transport_event(id, TransportEvent::Error("refused".into()), t0);
        assert_eq!(ext.next_retry_due(), Some(t0 + RETRY_DELAY));
        assert!(ext.tick(t0 + RETRY_DELAY));
        assert_eq!(wire.opened_urls().len(), 2);
    }

    #[test]
    fn headless_extension_still_tracks_and_sends() {
        let wire = FakeWire::default();
        let mut ext: TestExt = PlottyExtension::new(DeviceLink::new(wire.connector(), 8766), None);
        let sprite = ActorId::new("s");
        ext.apply_directory(two_plotters(), Some(1.0));
        open_link(&mut ext);
        ext.pen_down(&sprite);
        ext.move_steps(&sprite, 3.0);
        ext.clear();
        assert_eq!(wire.sent_json().len(), 2);
    }
}
