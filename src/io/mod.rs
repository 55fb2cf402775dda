//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `detections` - JSONL detection source (file or stdin) feeding frames
//! - `egress` - Tick records (JSONL) and session summary output

pub mod detections;
pub mod egress;

// Re-export commonly used types
pub use detections::{open_detection_input, read_detections, spawn_detection_reader, DetectionInput};
pub use egress::Egress;
