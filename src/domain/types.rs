//! Shared types for the intersection signal engine

use crate::domain::geometry::{BoundingBox, Point};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Newtype wrapper for tracker-assigned identities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TrackId(pub i64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Class label -> count, ordered by label for stable output
pub type ClassCounts = BTreeMap<String, u64>;

/// Directional filter attached to a count line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Parse a configured filter. `Ok(None)` means "no filter".
    pub fn parse(s: &str) -> Result<Option<Self>, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(None),
            "up" => Ok(Some(Direction::Up)),
            "down" => Ok(Some(Direction::Down)),
            "left" => Ok(Some(Direction::Left)),
            "right" => Ok(Some(Direction::Right)),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }

    /// Movement from `from` to `to` agrees with this direction
    #[inline]
    pub fn admits(&self, from: Point, to: Point) -> bool {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        match self {
            Direction::Up => dy < 0.0,
            Direction::Down => dy > 0.0,
            Direction::Left => dx < 0.0,
            Direction::Right => dx > 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

/// A tripwire belonging to one approach. Immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct CountLine {
    pub p1: Point,
    pub p2: Point,
    pub approach: String,
    pub direction: Option<Direction>,
}

/// One detector output after validation
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class: String,
    pub track_id: Option<TrackId>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, class: &str, track_id: Option<i64>) -> Self {
        Self { bbox, class: class.to_string(), track_id: track_id.map(TrackId) }
    }
}

/// One video frame worth of detections
#[derive(Debug, Clone, Default)]
pub struct Frame {
    /// Seconds since stream start, when the source provides it
    pub t: Option<f64>,
    pub detections: Vec<Detection>,
    /// Detections dropped as malformed while parsing
    pub skipped: usize,
}

impl Frame {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { t: None, detections, skipped: 0 }
    }

    pub fn at(mut self, t: f64) -> Self {
        self.t = Some(t);
        self
    }
}

/// Signal head state. Cycles GREEN -> AMBER -> RED -> GREEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalState {
    Green,
    Amber,
    Red,
}

impl SignalState {
    /// The only legal successor
    #[inline]
    pub fn next(self) -> Self {
        match self {
            SignalState::Green => SignalState::Amber,
            SignalState::Amber => SignalState::Red,
            SignalState::Red => SignalState::Green,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalState::Green => "GREEN",
            SignalState::Amber => "AMBER",
            SignalState::Red => "RED",
        }
    }
}

/// Class index -> label table for detectors that report raw indices
#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    names: HashMap<u32, String>,
}

impl LabelTable {
    pub fn new(names: HashMap<u32, String>) -> Self {
        Self { names }
    }

    /// Label for a raw index; the decimal index when the table has no entry
    pub fn resolve(&self, index: u32) -> String {
        self.names.get(&index).cloned().unwrap_or_else(|| index.to_string())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Detector class as reported on the wire: label string or raw index
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ClassValue {
    #[default]
    None,
    Name(String),
    Index(u32),
}

fn deserialize_class<'de, D>(deserializer: D) -> Result<ClassValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct ClassVisitor;

    impl<'de> Visitor<'de> for ClassVisitor {
        type Value = ClassValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a class label string or class index")
        }

        fn visit_str<E>(self, value: &str) -> Result<ClassValue, E>
        where
            E: de::Error,
        {
            Ok(ClassValue::Name(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<ClassValue, E>
        where
            E: de::Error,
        {
            Ok(ClassValue::Name(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<ClassValue, E>
        where
            E: de::Error,
        {
            Ok(u32::try_from(value).map(ClassValue::Index).unwrap_or(ClassValue::None))
        }

        fn visit_i64<E>(self, value: i64) -> Result<ClassValue, E>
        where
            E: de::Error,
        {
            Ok(u32::try_from(value).map(ClassValue::Index).unwrap_or(ClassValue::None))
        }

        fn visit_f64<E>(self, value: f64) -> Result<ClassValue, E>
        where
            E: de::Error,
        {
            // Detectors often emit class indices as floats (e.g. 2.0)
            if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 {
                Ok(ClassValue::Index(value as u32))
            } else {
                Ok(ClassValue::None)
            }
        }

        fn visit_unit<E>(self) -> Result<ClassValue, E>
        where
            E: de::Error,
        {
            Ok(ClassValue::None)
        }
    }

    deserializer.deserialize_any(ClassVisitor)
}

fn deserialize_track_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    })
}

/// Detection as it appears on the wire, before validation
#[derive(Debug, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default, deserialize_with = "deserialize_class")]
    pub cls: ClassValue,
    #[serde(default, deserialize_with = "deserialize_track_id")]
    pub id: Option<i64>,
}

impl RawDetection {
    /// Validate and resolve the class label. `None` for malformed input.
    pub fn into_detection(self, labels: &LabelTable) -> Option<Detection> {
        let bbox = BoundingBox::from_xyxy(self.bbox.as_deref()?)?;
        let class = match self.cls {
            ClassValue::Name(name) if !name.is_empty() => name,
            ClassValue::Index(idx) => labels.resolve(idx),
            _ => return None,
        };
        Some(Detection { bbox, class, track_id: self.id.map(TrackId) })
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    t: Option<f64>,
    #[serde(default)]
    detections: Vec<serde_json::Value>,
}

/// Largest accepted frame timestamp (seconds since stream start, ~31 years)
pub const MAX_FRAME_T_S: f64 = 1.0e9;

/// Parse one JSON line into a frame.
///
/// Only a structurally broken line is an error; individual detections that
/// fail validation are dropped and counted in `Frame::skipped`.
pub fn parse_frame(line: &str, labels: &LabelTable) -> Result<Frame, serde_json::Error> {
    let raw: RawFrame = serde_json::from_str(line)?;
    let total = raw.detections.len();
    let detections: Vec<Detection> = raw
        .detections
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawDetection>(v).ok())
        .filter_map(|d| d.into_detection(labels))
        .collect();
    let skipped = total - detections.len();
    let t = raw.t.filter(|t| t.is_finite() && (0.0..=MAX_FRAME_T_S).contains(t));
    Ok(Frame { t, detections, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse() {
        assert_eq!(Direction::parse("down"), Ok(Some(Direction::Down)));
        assert_eq!(Direction::parse("UP"), Ok(Some(Direction::Up)));
        assert_eq!(Direction::parse("none"), Ok(None));
        assert_eq!(Direction::parse(""), Ok(None));
        assert!(Direction::parse("sideways").is_err());
    }

    #[test]
    fn test_direction_admits() {
        let a = Point::new(10.0, 10.0);
        let below = Point::new(10.0, 50.0);
        let right = Point::new(50.0, 10.0);
        assert!(Direction::Down.admits(a, below));
        assert!(!Direction::Up.admits(a, below));
        assert!(Direction::Right.admits(a, right));
        assert!(!Direction::Left.admits(a, right));
        // No movement on the relevant axis never agrees
        assert!(!Direction::Down.admits(a, right));
    }

    #[test]
    fn test_signal_state_cycle() {
        assert_eq!(SignalState::Green.next(), SignalState::Amber);
        assert_eq!(SignalState::Amber.next(), SignalState::Red);
        assert_eq!(SignalState::Red.next(), SignalState::Green);
    }

    #[test]
    fn test_parse_frame_label_and_index() {
        let labels = LabelTable::new(HashMap::from([(2, "car".to_string())]));
        let line = r#"{"t": 1.5, "detections": [
            {"bbox": [0, 0, 10, 10], "cls": "bus", "id": 4},
            {"bbox": [0, 0, 10, 10], "cls": 2.0, "id": 5.0},
            {"bbox": [0, 0, 10, 10], "cls": 7}
        ]}"#;
        let frame = parse_frame(line, &labels).unwrap();

        assert_eq!(frame.t, Some(1.5));
        assert_eq!(frame.skipped, 0);
        assert_eq!(frame.detections[0].class, "bus");
        assert_eq!(frame.detections[0].track_id, Some(TrackId(4)));
        assert_eq!(frame.detections[1].class, "car");
        assert_eq!(frame.detections[1].track_id, Some(TrackId(5)));
        assert_eq!(frame.detections[2].class, "7");
        assert_eq!(frame.detections[2].track_id, None);
    }

    #[test]
    fn test_parse_frame_skips_malformed_detections() {
        let line = r#"{"detections": [
            {"bbox": [0, 0, 10], "cls": "car", "id": 1},
            {"bbox": [0, 0, 10, 10], "id": 2},
            {"bbox": "oops", "cls": "car"},
            {"cls": "car", "id": 3},
            {"bbox": [0, 0, 10, 10], "cls": "car", "id": 4}
        ]}"#;
        let frame = parse_frame(line, &LabelTable::default()).unwrap();

        assert_eq!(frame.detections.len(), 1);
        assert_eq!(frame.skipped, 4);
        assert_eq!(frame.detections[0].track_id, Some(TrackId(4)));
    }

    #[test]
    fn test_parse_frame_rejects_broken_line() {
        assert!(parse_frame("{not json", &LabelTable::default()).is_err());
        assert!(parse_frame(r#"{"detections": 5}"#, &LabelTable::default()).is_err());
    }

    #[test]
    fn test_parse_empty_frame() {
        let frame = parse_frame("{}", &LabelTable::default()).unwrap();
        assert!(frame.detections.is_empty());
        assert_eq!(frame.t, None);
    }

    #[test]
    fn test_parse_frame_drops_out_of_range_time() {
        let labels = LabelTable::default();
        for line in [r#"{"t": 1e300}"#, r#"{"t": -2.5}"#, r#"{"t": 1000000000.5}"#] {
            let frame = parse_frame(line, &labels).unwrap();
            assert_eq!(frame.t, None, "{line}");
        }
        assert_eq!(parse_frame(r#"{"t": 1e9}"#, &labels).unwrap().t, Some(MAX_FRAME_T_S));
    }
}
