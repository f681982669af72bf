use crate::key::FrameReference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One detected object. Serialized with the fixed batch columns
/// `class_id, class_name, confidence, box_x1, box_y1, box_x2, box_y2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub class_id: i32,
    pub class_name: String,
    pub confidence: f32,
    #[serde(rename = "box_x1")]
    pub x1: f32,
    #[serde(rename = "box_y1")]
    pub y1: f32,
    #[serde(rename = "box_x2")]
    pub x2: f32,
    #[serde(rename = "box_y2")]
    pub y2: f32,
}

impl DetectionRecord {
    pub fn is_valid(&self) -> bool {
        let coords = [self.x1, self.y1, self.x2, self.y2];
        coords.iter().all(|c| c.is_finite())
            && self.x1 <= self.x2
            && self.y1 <= self.y2
            && (0.0..=1.0).contains(&self.confidence)
    }
}

/// All detections produced by one inference call on one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub frame: FrameReference,
    pub created_at: DateTime<Utc>,
    pub detections: Vec<DetectionRecord>,
}

impl DetectionBatch {
    pub fn new(frame: FrameReference, detections: Vec<DetectionRecord>) -> Self {
        Self {
            frame,
            created_at: Utc::now(),
            detections,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.detections.is_empty() {
            return Err("batch has no detections".to_string());
        }
        match self.detections.iter().position(|d| !d.is_valid()) {
            Some(index) => Err(format!(
                "detection {} is out of range: {:?}",
                index, self.detections[index]
            )),
            None => Ok(()),
        }
    }
}
