use derive_new::new;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Direction of a slope between two matched peaks, normalized per minute.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlopeType {
    Up,
    Down,
    None,
}

/// Polarity of a detected extremum.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeakType {
    Min,
    Max,
}

/// Convergence is read as a bullish divergence when detected on minimums;
/// divergence as bearish when detected on maximums.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceType {
    Convergence,
    Divergence,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize, Deserialize)]
pub enum DivergenceClass {
    A,
    B,
    C,
}

/// A straight segment between two indexes of a value stream.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub start_index: usize,
    pub end_index: usize,
}

impl Line {
    /// The same segment with `start_index <= end_index`.
    pub fn normalized(self) -> Line {
        if self.start_index > self.end_index {
            Line::new(self.end_index, self.start_index)
        } else {
            self
        }
    }
}

/// A detected slope disagreement between two peak series.  The endpoints
/// are the most recent matched peak index on each side.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub divergence_type: DivergenceType,
    pub class: DivergenceClass,
    pub index1: usize,
    pub index2: usize,
}

/// Rendering hint for a derived series, using the wire codes of the
/// charting frontend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphType {
    Line = 1,
    Histogram = 2,
    Candles = 3,
    Bars = 4,
    Dotted = 5,
    DotDashed = 6,
    Dashed = 7,
    PeakUp = 10,
    PeakDown = 11,
}

impl GraphType {
    pub fn code(self) -> u8 {
        self as u8
    }
}
