use crate::host_api::{DrawableId, LayerId, PenAttributes, Renderer};
use crate::link::{Connector, Transport, TransportError};
use crate::protocol::ConnectionId;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
pub(crate) struct WireLog {
    pub opened: Vec<(ConnectionId, String)>,
    pub sent: Vec<(ConnectionId, String)>,
    pub closed: Vec<ConnectionId>,
}

/// Shared record of everything fake transports were asked to do.
#[derive(Default, Clone)]
pub(crate) struct FakeWire {
    log: Arc<Mutex<WireLog>>,
}

impl FakeWire {
    pub fn connector(&self) -> FakeConnector {
        FakeConnector { wire: self.clone() }
    }

    pub fn log(&self) -> MutexGuard<'_, WireLog> {
        self.log.lock().unwrap()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.log().opened.iter().map(|(_, url)| url.clone()).collect()
    }

    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.log()
            .sent
            .iter()
            .map(|(_, text)| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn closed(&self) -> Vec<ConnectionId> {
        self.log().closed.clone()
    }
}

pub(crate) struct FakeConnector {
    wire: FakeWire,
}

impl Connector for FakeConnector {
    type Transport = FakeTransport;

    fn open(&mut self, url: &str, id: ConnectionId) -> FakeTransport {
        self.wire.log().opened.push((id, url.to_string()));
        FakeTransport {
            id,
            wire: self.wire.clone(),
        }
    }
}

pub(crate) struct FakeTransport {
    id: ConnectionId,
    wire: FakeWire,
}

impl Transport for FakeTransport {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.wire.log().sent.push((self.id, text));
        Ok(())
    }

    fn close(&mut self) {
        self.wire.log().closed.push(self.id);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DrawCall {
    CreateLayer(LayerId),
    CreateDrawable(LayerId),
    Segment {
        from: (f64, f64),
        to: (f64, f64),
        attrs: PenAttributes,
    },
    Point {
        at: (f64, f64),
        attrs: PenAttributes,
    },
    Clear(LayerId),
    Redraw,
}

#[derive(Default)]
pub(crate) struct RecordingRenderer {
    pub calls: Vec<DrawCall>,
}

impl RecordingRenderer {
    pub fn segments(&self) -> Vec<((f64, f64), (f64, f64))> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DrawCall::Segment { from, to, .. } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }
}

impl Renderer for RecordingRenderer {
    fn create_layer(&mut self) -> Option<LayerId> {
        let layer = LayerId(1);
        self.calls.push(DrawCall::CreateLayer(layer));
        Some(layer)
    }

    fn create_drawable_on_layer(&mut self, layer: LayerId) -> Option<DrawableId> {
        self.calls.push(DrawCall::CreateDrawable(layer));
        Some(DrawableId(1))
    }

    fn draw_segment(
        &mut self,
        _layer: LayerId,
        attrs: &PenAttributes,
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
    ) {
        self.calls.push(DrawCall::Segment {
            from: (x0, y0),
            to: (x1, y1),
            attrs: *attrs,
        });
    }

    fn draw_point(&mut self, _layer: LayerId, attrs: &PenAttributes, x: f64, y: f64) {
        self.calls.push(DrawCall::Point {
            at: (x, y),
            attrs: *attrs,
        });
    }

    fn clear_layer(&mut self, layer: LayerId) {
        self.calls.push(DrawCall::Clear(layer));
    }

    fn request_redraw(&mut self) {
        self.calls.push(DrawCall::Redraw);
    }
}
