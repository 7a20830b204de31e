use serde::{Deserialize, Serialize};

use crate::agent_engine::state::Action;
use crate::perception::codec::base64_bytes;

/// One turn's unit of work for the compositor. Crosses the
/// dispatcher/compositor boundary only as copied data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    #[serde(rename = "sequence")]
    pub seq: u64,
    /// Render-sized PNG.
    #[serde(with = "base64_bytes")]
    pub image: Vec<u8>,
    /// Actions from the previous turn.
    pub actions: Vec<Action>,
    pub render_width: u32,
    pub render_height: u32,
}

/// Compositor reply for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderResult {
    #[serde(rename = "sequence")]
    pub seq: u64,
    #[serde(with = "base64_bytes")]
    pub image: Vec<u8>,
}

/// PNG of exactly the render size with heat and markers baked in; what the
/// model sees and what is kept as the turn's visual record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedImage {
    pub seq: u64,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Published { seq: u64 },
    Resolved { seq: u64 },
    TimedOut { seq: u64 },
    Cancelled { seq: u64 },
}

impl JobState {
    pub fn is_outstanding(&self) -> bool {
        matches!(self, JobState::Published { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::NormalizedPoint;

    #[test]
    fn job_wire_shape() {
        let job = RenderJob {
            seq: 4,
            image: vec![1, 2, 3],
            actions: vec![Action::Click { point: NormalizedPoint::new(1, 2).unwrap() }],
            render_width: 512,
            render_height: 288,
        };
        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "sequence": 4,
                "image": "AQID",
                "actions": [{"type": "click", "point": [1, 2]}],
                "renderWidth": 512,
                "renderHeight": 288
            })
        );
        let back: RenderJob = serde_json::from_value(v).unwrap();
        assert_eq!(back, job);
    }
}
