//! Turtle pose math. Heading 0 points up (+Y), positive turns are clockwise.

/// Sprites start facing right, as in the host.
pub const DEFAULT_HEADING: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Unbounded; see [`Pose::display_heading`].
    pub heading: f64,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            heading: DEFAULT_HEADING,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDirection {
    Left,
    Right,
}

impl TurnDirection {
    fn sign(self) -> f64 {
        match self {
            TurnDirection::Left => -1.0,
            TurnDirection::Right => 1.0,
        }
    }
}

pub fn step_delta(distance: f64, heading: f64) -> (f64, f64) {
    let radians = (90.0 - heading).to_radians();
    (distance * radians.cos(), distance * radians.sin())
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }

    pub fn forward(&self, distance: f64) -> Pose {
        let (dx, dy) = step_delta(distance, self.heading);
        Pose {
            x: self.x + dx,
            y: self.y + dy,
            heading: self.heading,
        }
    }

    pub fn turned(&self, degrees: f64, direction: TurnDirection) -> Pose {
        Pose {
            heading: self.heading + direction.sign() * degrees,
            ..*self
        }
    }

    /// Heading folded into `(-180, 180]` for rendering rotation.
    pub fn display_heading(&self) -> f64 {
        let wrapped = (self.heading % 360.0 + 360.0) % 360.0;
        if wrapped > 180.0 {
            wrapped - 360.0
        } else {
            wrapped
        }
    }

    pub fn distance_to(&self, other: &Pose) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}
