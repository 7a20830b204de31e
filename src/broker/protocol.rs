use serde::{Deserialize, Serialize};

use crate::agent_engine::event_bus::TurnEvent;
use crate::agent_engine::session::SessionStatus;
use crate::broker::job::RenderJob;
use crate::perception::codec::base64_bytes;
use crate::perception::types::CropRegion;

/// Messages a compositor or control client sends over the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    FetchPending,
    SubmitResult {
        #[serde(rename = "sequence")]
        seq: u64,
        #[serde(with = "base64_bytes")]
        image: Vec<u8>,
    },
    Pause,
    Resume,
    SetCrop {
        crop: Option<CropRegion>,
    },
    /// Re-read `crop.json`; answered with `Status`.
    ReloadCrop,
    Status,
    /// Switch this connection to a one-way stream of `Event` frames.
    Subscribe,
}

/// One reply per client message, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Job { job: RenderJob },
    NoJob,
    Accepted,
    Rejected { reason: String },
    Status { status: SessionStatus },
    Event { event: TurnEvent },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shapes() {
        let m = ClientMessage::SubmitResult { seq: 3, image: vec![1, 2, 3] };
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v, serde_json::json!({"type": "submit_result", "sequence": 3, "image": "AQID"}));
        assert_eq!(serde_json::from_value::<ClientMessage>(v).unwrap(), m);

        let m: ClientMessage = serde_json::from_str(r#"{"type":"set_crop","crop":null}"#).unwrap();
        assert_eq!(m, ClientMessage::SetCrop { crop: None });

        let v = serde_json::to_value(ServerMessage::Event { event: TurnEvent::Resumed }).unwrap();
        assert_eq!(v, serde_json::json!({"type": "event", "event": {"event": "resumed"}}));

        let v = serde_json::to_value(ServerMessage::Rejected { reason: "stale".into() }).unwrap();
        assert_eq!(v, serde_json::json!({"type": "rejected", "reason": "stale"}));
    }
}
