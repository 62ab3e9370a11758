//! Decoding of device telemetry lines
//!
//! The sensor prints one frame per line: gyro x/y/z followed by accel x/y/z,
//! separated by whitespace. Only the accelerometer triple is needed to drive
//! the orientation display, the full frame is available through
//! [`parse_reading`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of the first token that feeds a [`Sample`]
const SAMPLE_OFFSET: usize = 3;

/// Tokens in a complete frame
const FRAME_TOKENS: usize = 6;

/// One decoded three-axis reading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    /// X axis
    pub x: f32,
    /// Y axis
    pub y: f32,
    /// Z axis
    pub z: f32,
}

impl Sample {
    /// Create a sample
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x={:.5} y={:.5} z={:.5}", self.x, self.y, self.z)
    }
}

/// A complete IMU frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Reading {
    /// Gyroscope x/y/z
    pub gyro: [f32; 3],
    /// Accelerometer axes
    pub accel: Sample,
}

/// Receives every sample the session decodes
///
/// The controller only holds a weak reference, so an observer can go away
/// at any time; notifications are then dropped.
pub trait SampleObserver: Send + Sync {
    /// Called once per successfully parsed device line
    fn on_sample(&self, sample: &Sample);

    /// Called after [`on_sample`](Self::on_sample) when the line also
    /// carried a complete numeric frame
    fn on_reading(&self, _reading: &Reading) {}
}

fn tokens(line: &str) -> Vec<&str> {
    line.split_whitespace().map(str::trim).collect()
}

fn parse_triple(tokens: &[&str]) -> Option<[f32; 3]> {
    Some([
        tokens.first()?.parse().ok()?,
        tokens.get(1)?.parse().ok()?,
        tokens.get(2)?.parse().ok()?,
    ])
}

/// Parse the sample carried by a device line.
///
/// Needs at least six tokens; tokens 3, 4 and 5 become x, y and z. Anything
/// else yields `None`.
pub fn parse_sample(line: &str) -> Option<Sample> {
    let tokens = tokens(line);
    if tokens.len() < FRAME_TOKENS {
        return None;
    }

    let [x, y, z] = parse_triple(&tokens[SAMPLE_OFFSET..])?;
    Some(Sample { x, y, z })
}

/// Parse every value of a device line, gyro included
pub fn parse_reading(line: &str) -> Option<Reading> {
    let tokens = tokens(line);
    if tokens.len() < FRAME_TOKENS {
        return None;
    }

    let gyro = parse_triple(&tokens[..SAMPLE_OFFSET])?;
    let [x, y, z] = parse_triple(&tokens[SAMPLE_OFFSET..])?;
    Some(Reading {
        gyro,
        accel: Sample { x, y, z },
    })
}
