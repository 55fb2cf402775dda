//! Domain models - detections, count lines, signal states and geometry
//!
//! This module contains the canonical data types used throughout the system:
//! - `Detection` / `Frame` - detector output after validation
//! - `CountLine` - an approach tripwire with optional direction filter
//! - `SignalState` - GREEN / AMBER / RED signal head state
//! - `geometry` - centroid and segment intersection primitives

pub mod geometry;
pub mod types;

pub use geometry::{segments_intersect, BoundingBox, Point};
pub use types::{ClassCounts, CountLine, Detection, Direction, Frame, SignalState, TrackId};
