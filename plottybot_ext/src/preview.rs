//! Headless preview renderer that records pen marks and writes them out as SVG.

use crate::host_api::{DrawableId, LayerId, PenAttributes, Renderer};
use std::fmt::Write as _;

pub const STAGE_WIDTH: f64 = 480.0;
pub const STAGE_HEIGHT: f64 = 360.0;

#[derive(Debug, Clone, PartialEq)]
enum Mark {
    Segment {
        attrs: PenAttributes,
        from: (f64, f64),
        to: (f64, f64),
    },
    Point {
        attrs: PenAttributes,
        at: (f64, f64),
    },
}

#[derive(Debug, Default)]
pub struct SvgPreview {
    layers: Vec<Vec<Mark>>,
    drawables: u32,
    redraws: u64,
}

impl SvgPreview {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    pub fn redraws(&self) -> u64 {
        self.redraws
    }

    fn layer_mut(&mut self, layer: LayerId) -> Option<&mut Vec<Mark>> {
        self.layers.get_mut(layer.0 as usize)
    }

    /// Stage coordinates have the origin in the middle and +Y up.
    fn to_view(x: f64, y: f64) -> (f64, f64) {
        (x + STAGE_WIDTH / 2.0, STAGE_HEIGHT / 2.0 - y)
    }

    pub fn to_svg(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{STAGE_WIDTH}" height="{STAGE_HEIGHT}" viewBox="0 0 {STAGE_WIDTH} {STAGE_HEIGHT}">"#
        );
        for (index, marks) in self.layers.iter().enumerate() {
            let _ = writeln!(out, r#"  <g id="pen-layer-{index}" stroke-linecap="round">"#);
            for mark in marks {
                match mark {
                    Mark::Segment { attrs, from, to } => {
                        let (x0, y0) = Self::to_view(from.0, from.1);
                        let (x1, y1) = Self::to_view(to.0, to.1);
                        let _ = writeln!(
                            out,
                            r#"    <line x1="{x0:.2}" y1="{y0:.2}" x2="{x1:.2}" y2="{y1:.2}" stroke="{}" stroke-opacity="{:.3}" stroke-width="{}"/>"#,
                            css_rgb(attrs),
                            attrs.color4f[3],
                            attrs.diameter
                        );
                    }
                    Mark::Point { attrs, at } => {
                        let (cx, cy) = Self::to_view(at.0, at.1);
                        let _ = writeln!(
                            out,
                            r#"    <circle cx="{cx:.2}" cy="{cy:.2}" r="{}" fill="{}" fill-opacity="{:.3}"/>"#,
                            attrs.diameter / 2.0,
                            css_rgb(attrs),
                            attrs.color4f[3]
                        );
                    }
                }
            }
            out.push_str("  </g>\n");
        }
        out.push_str("</svg>\n");
        out
    }
}

fn css_rgb(attrs: &PenAttributes) -> String {
    let channel = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!(
        "rgb({},{},{})",
        channel(attrs.color4f[0]),
        channel(attrs.color4f[1]),
        channel(attrs.color4f[2])
    )
}

impl Renderer for SvgPreview {
    fn create_layer(&mut self) -> Option<LayerId> {
        let id = u32::try_from(self.layers.len()).ok()?;
        self.layers.push(Vec::new());
        Some(LayerId(id))
    }

    fn create_drawable_on_layer(&mut self, layer: LayerId) -> Option<DrawableId> {
        self.layers.get(layer.0 as usize)?;
        self.drawables += 1;
        Some(DrawableId(self.drawables))
    }

    fn draw_segment(
        &mut self,
        layer: LayerId,
        attrs: &PenAttributes,
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
    ) {
        if let Some(marks) = self.layer_mut(layer) {
            marks.push(Mark::Segment {
                attrs: *attrs,
                from: (x0, y0),
                to: (x1, y1),
            });
        }
    }

    fn draw_point(&mut self, layer: LayerId, attrs: &PenAttributes, x: f64, y: f64) {
        if let Some(marks) = self.layer_mut(layer) {
            marks.push(Mark::Point {
                attrs: *attrs,
                at: (x, y),
            });
        }
    }

    fn clear_layer(&mut self, layer: LayerId) {
        if let Some(marks) = self.layer_mut(layer) {
            marks.clear();
        }
    }

    fn request_redraw(&mut self) {
        self.redraws += 1;
    }
}
