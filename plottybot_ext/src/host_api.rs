/// Handle to a rendering layer owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawableId(pub u32);

/// What the renderer needs to stroke a pen mark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenAttributes {
    /// RGBA, each channel in `0.0..=1.0`.
    pub color4f: [f64; 4],
    pub diameter: f64,
}

/// Host renderer capability used for the on-screen preview.
pub trait Renderer {
    fn create_layer(&mut self) -> Option<LayerId>;
    fn create_drawable_on_layer(&mut self, layer: LayerId) -> Option<DrawableId>;
    fn draw_segment(
        &mut self,
        layer: LayerId,
        attrs: &PenAttributes,
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
    );
    fn draw_point(&mut self, layer: LayerId, attrs: &PenAttributes, x: f64, y: f64);
    fn clear_layer(&mut self, layer: LayerId);
    fn request_redraw(&mut self);
}
