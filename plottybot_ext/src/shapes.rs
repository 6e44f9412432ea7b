//! Decorative shapes as plain move/turn sequences.

use crate::turtle::{Pose, TurnDirection};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TurtleStep {
    Forward(f64),
    /// Degrees, positive is clockwise.
    Turn(f64),
}

impl TurtleStep {
    pub fn apply(self, pose: &Pose) -> Pose {
        match self {
            TurtleStep::Forward(d) => pose.forward(d),
            TurtleStep::Turn(deg) if deg >= 0.0 => pose.turned(deg, TurnDirection::Right),
            TurtleStep::Turn(deg) => pose.turned(-deg, TurnDirection::Left),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Square,
    Circle,
    Star,
    Spiral,
    Heart,
    ClassicHeart,
    Flower,
    Hexagon,
    Wave,
}

impl Shape {
    pub const ALL: [Shape; 9] = [
        Shape::Square,
        Shape::Circle,
        Shape::Star,
        Shape::Spiral,
        Shape::Heart,
        Shape::ClassicHeart,
        Shape::Flower,
        Shape::Hexagon,
        Shape::Wave,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Shape::Square => "square",
            Shape::Circle => "circle",
            Shape::Star => "star",
            Shape::Spiral => "spiral",
            Shape::Heart => "heart",
            Shape::ClassicHeart => "classic heart",
            Shape::Flower => "flower",
            Shape::Hexagon => "hexagon",
            Shape::Wave => "wave",
        }
    }

    pub fn steps(self, size: f64) -> Vec<TurtleStep> {
        match self {
            Shape::Square => polygon(4, size),
            Shape::Hexagon => polygon(6, size),
            Shape::Star => star(size),
            Shape::Circle => circle(size),
            Shape::Spiral => spiral(size),
            Shape::Heart => heart(size),
            Shape::ClassicHeart => classic_heart(size),
            Shape::Flower => flower(size),
            Shape::Wave => wave(size),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown shape: {0}")]
pub struct UnknownShape(pub String);

impl FromStr for Shape {
    type Err = UnknownShape;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .flat_map(|c| c.to_lowercase())
            .collect();
        Shape::ALL
            .into_iter()
            .find(|shape| shape.as_str().replace(' ', "") == key)
            .ok_or_else(|| UnknownShape(s.to_string()))
    }
}

/// Runs `steps` from `start` and returns every intermediate pose, `start` excluded.
pub fn trace(start: Pose, steps: &[TurtleStep]) -> Vec<Pose> {
    let mut pose = start;
    steps
        .iter()
        .map(|step| {
            pose = step.apply(&pose);
            pose
        })
        .collect()
}

fn polygon(sides: usize, size: f64) -> Vec<TurtleStep> {
    let exterior = 360.0 / sides as f64;
    (0..sides)
        .flat_map(|_| [TurtleStep::Forward(size), TurtleStep::Turn(exterior)])
        .collect()
}

fn star(size: f64) -> Vec<TurtleStep> {
    (0..5)
        .flat_map(|_| [TurtleStep::Forward(size), TurtleStep::Turn(144.0)])
        .collect()
}

fn circle(size: f64) -> Vec<TurtleStep> {
    let mut out = Vec::new();
    arc(&mut out, size / 2.0, 360.0, 36);
    out
}

fn spiral(size: f64) -> Vec<TurtleStep> {
    const TURNS: usize = 48;
    (1..=TURNS)
        .flat_map(|i| {
            [
                TurtleStep::Forward(size * i as f64 / TURNS as f64),
                TurtleStep::Turn(30.0),
            ]
        })
        .collect()
}

/// Square rotated onto its tip with a half circle on each upper side.
fn heart(size: f64) -> Vec<TurtleStep> {
    let mut out = vec![TurtleStep::Turn(-45.0), TurtleStep::Forward(size)];
    arc(&mut out, size / 2.0, 180.0, 18);
    out.push(TurtleStep::Turn(-90.0));
    arc(&mut out, size / 2.0, 180.0, 18);
    out.push(TurtleStep::Forward(size));
    out.push(TurtleStep::Turn(-225.0));
    out
}

fn classic_heart(size: f64) -> Vec<TurtleStep> {
    let radius = size * 0.5;
    let mut out = vec![TurtleStep::Turn(-140.0), TurtleStep::Forward(size)];
    arc(&mut out, radius, 200.0, 20);
    out.push(TurtleStep::Turn(-120.0));
    arc(&mut out, radius, 200.0, 20);
    out.push(TurtleStep::Forward(size));
    out.push(TurtleStep::Turn(-140.0));
    out
}

fn flower(size: f64) -> Vec<TurtleStep> {
    let mut out = Vec::new();
    for _ in 0..6 {
        arc(&mut out, size, 60.0, 6);
        out.push(TurtleStep::Turn(120.0));
        arc(&mut out, size, 60.0, 6);
        out.push(TurtleStep::Turn(120.0));
        out.push(TurtleStep::Turn(60.0));
    }
    out
}

fn wave(size: f64) -> Vec<TurtleStep> {
    let mut out = vec![TurtleStep::Turn(-90.0)];
    for i in 0..4 {
        let sweep = if i % 2 == 0 { 180.0 } else { -180.0 };
        arc(&mut out, size / 2.0, sweep, 9);
    }
    out.push(TurtleStep::Turn(90.0));
    out
}

/// Arc as a polygon inscribed in a circle of `radius`; heading changes by `sweep`
/// (negative sweeps turn left) and the endpoints lie exactly on the circle.
fn arc(out: &mut Vec<TurtleStep>, radius: f64, sweep: f64, segments: usize) {
    let step = sweep / segments as f64;
    let chord = 2.0 * radius * (step.abs().to_radians() / 2.0).sin();
    out.push(TurtleStep::Turn(step / 2.0));
    for i in 0..segments {
        out.push(TurtleStep::Forward(chord));
        let turn = if i + 1 == segments { step / 2.0 } else { step };
        out.push(TurtleStep::Turn(turn));
    }
}
