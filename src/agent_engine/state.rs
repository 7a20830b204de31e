use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::perception::types::NormalizedPoint;

/// One decided action. Coordinates are always normalized; pixel mapping
/// happens only at the compositor and executor boundaries.
///
/// Wire form follows the action schema
/// `{type, point?, start?, end?, params?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ActionRecord", into = "ActionRecord")]
pub enum Action {
    Click { point: NormalizedPoint },
    RightClick { point: NormalizedPoint },
    DoubleClick { point: NormalizedPoint },
    Drag { start: NormalizedPoint, end: NormalizedPoint },
    Scroll { point: NormalizedPoint, delta: i32 },
    Write { text: String },
    Press { key: String },
}

/// Names accepted from the model, in the order they are advertised.
pub const TOOL_NAMES: [&str; 7] = [
    "click",
    "right_click",
    "double_click",
    "drag",
    "scroll",
    "write",
    "press",
];

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Click { .. } => "click",
            Action::RightClick { .. } => "right_click",
            Action::DoubleClick { .. } => "double_click",
            Action::Drag { .. } => "drag",
            Action::Scroll { .. } => "scroll",
            Action::Write { .. } => "write",
            Action::Press { .. } => "press",
        }
    }

    /// Single-point actions that leave a round heat blob.
    pub fn click_point(&self) -> Option<NormalizedPoint> {
        match self {
            Action::Click { point }
            | Action::RightClick { point }
            | Action::DoubleClick { point }
            | Action::Scroll { point, .. } => Some(*point),
            _ => None,
        }
    }

    /// Canonical call form, e.g. `drag(100, 100, 900, 100)`.
    pub fn canonical(&self) -> String {
        match self {
            Action::Click { point } | Action::RightClick { point } | Action::DoubleClick { point } => {
                format!("{}({}, {})", self.name(), point.x, point.y)
            }
            Action::Drag { start, end } => {
                format!("drag({}, {}, {}, {})", start.x, start.y, end.x, end.y)
            }
            Action::Scroll { point, delta } => format!("scroll({}, {}, {delta})", point.x, point.y),
            Action::Write { text } => format!("write({})", quote(text)),
            Action::Press { key } => format!("press({})", quote(key)),
        }
    }
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\""))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActionRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    point: Option<NormalizedPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start: Option<NormalizedPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end: Option<NormalizedPoint>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, serde_json::Value>,
}

impl TryFrom<ActionRecord> for Action {
    type Error = String;

    fn try_from(r: ActionRecord) -> Result<Self, Self::Error> {
        let point = || r.point.ok_or_else(|| format!("{} requires `point`", r.kind));
        let param_str = |key: &str| {
            r.params
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| format!("{} requires string param `{key}`", r.kind))
        };
        match r.kind.as_str() {
            "click" => Ok(Action::Click { point: point()? }),
            "right_click" => Ok(Action::RightClick { point: point()? }),
            "double_click" => Ok(Action::DoubleClick { point: point()? }),
            "drag" => match (r.start, r.end) {
                (Some(start), Some(end)) => Ok(Action::Drag { start, end }),
                _ => Err("drag requires `start` and `end`".into()),
            },
            "scroll" => {
                let delta = r
                    .params
                    .get("delta")
                    .and_then(|v| v.as_i64())
                    .ok_or("scroll requires integer param `delta`")?;
                let delta = i32::try_from(delta).map_err(|_| format!("scroll delta {delta} out of range"))?;
                Ok(Action::Scroll { point: point()?, delta })
            }
            "write" => Ok(Action::Write { text: param_str("text")? }),
            "press" => Ok(Action::Press { key: param_str("key")? }),
            other => Err(format!("unknown action type `{other}`")),
        }
    }
}

impl From<Action> for ActionRecord {
    fn from(a: Action) -> Self {
        let mut rec = ActionRecord {
            kind: a.name().to_string(),
            point: None,
            start: None,
            end: None,
            params: BTreeMap::new(),
        };
        match a {
            Action::Click { point } | Action::RightClick { point } | Action::DoubleClick { point } => {
                rec.point = Some(point);
            }
            Action::Drag { start, end } => {
                rec.start = Some(start);
                rec.end = Some(end);
            }
            Action::Scroll { point, delta } => {
                rec.point = Some(point);
                rec.params.insert("delta".into(), delta.into());
            }
            Action::Write { text } => {
                rec.params.insert("text".into(), text.into());
            }
            Action::Press { key } => {
                rec.params.insert("key".into(), key.into());
            }
        }
        rec
    }
}

/// Session-level gate. The session starts `Paused` and only an explicit
/// external resume moves it to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Paused,
    Running,
}

/// What one completed turn decided and showed.
#[derive(Debug, Clone)]
pub struct Turn {
    pub number: u64,
    pub seq: u64,
    pub actions: Vec<Action>,
    /// Annotated PNG the model saw.
    pub image: Vec<u8>,
}
