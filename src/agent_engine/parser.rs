//! Model output -> `[Action]`.
//!
//! Two input shapes are accepted: bare call lines (`click(500, 500)`), and a
//! JSON array of action objects. Anything that cannot be turned into an
//! allowed action is reported in `malformed` and otherwise ignored.
use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::agent_engine::state::{Action, TOOL_NAMES};
use crate::errors::HeatloopError;
use crate::perception::types::NormalizedPoint;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub actions: Vec<Action>,
    pub malformed: Vec<String>,
}

impl ParsedOutput {
    /// The malformed entries as a single `ActionParse` error, if there were any.
    pub fn parse_error(&self) -> Option<HeatloopError> {
        if self.malformed.is_empty() {
            None
        } else {
            Some(HeatloopError::ActionParse(self.malformed.join("; ")))
        }
    }
}

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:python|py|json)?[ \t]*\n(.*?)```").unwrap());
static PART_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^PART\s+\d+\s*--\s*(?:Actions?\s*)?").unwrap());
static CALL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*\((.*)\)\s*;?$").unwrap());
static CALL_START_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_]\w*\s*\(").unwrap());
static BARE_ACTION_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^actions?:?$").unwrap());

fn clean_line(line: &str) -> String {
    PART_PREFIX_RE.replace(line.trim(), "").trim().to_string()
}

/// Parse `raw` keeping only tools named in `allowed` (all tools when empty).
pub fn parse_actions(raw: &str, allowed: &[String]) -> ParsedOutput {
    let allowed: HashSet<&str> = if allowed.is_empty() {
        TOOL_NAMES.iter().copied().collect()
    } else {
        allowed.iter().map(String::as_str).collect()
    };

    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
            return parse_json_items(items, &allowed);
        }
    }

    let fenced: Vec<&str> = FENCE_RE
        .captures_iter(raw)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let mut out = ParsedOutput::default();
    let mut seen = HashSet::new();
    let sources = fenced.into_iter().chain(std::iter::once(raw));
    for src in sources {
        for line in src.lines() {
            let cleaned = clean_line(line);
            if cleaned.is_empty() || !seen.insert(cleaned.clone()) {
                continue;
            }
            let Some(caps) = CALL_RE.captures(&cleaned) else {
                if CALL_START_RE.is_match(&cleaned) {
                    out.malformed.push(format!("UnrecognizedCall: '{cleaned}'"));
                }
                continue;
            };
            let name = &caps[1];
            if !TOOL_NAMES.contains(&name) {
                out.malformed.push(format!("UnknownTool: '{name}'"));
                continue;
            }
            if !allowed.contains(name) {
                out.malformed.push(format!("DisallowedTool: '{name}'"));
                continue;
            }
            match build_call(name, &caps[2]) {
                Ok(action) => out.actions.push(action),
                Err(e) => out.malformed.push(format!("{e}: '{cleaned}'")),
            }
        }
    }
    if !out.malformed.is_empty() {
        tracing::warn!(malformed = ?out.malformed, parsed = out.actions.len(), "model output partially malformed");
    }
    out
}

fn parse_json_items(items: Vec<serde_json::Value>, allowed: &HashSet<&str>) -> ParsedOutput {
    let mut out = ParsedOutput::default();
    for item in items {
        match serde_json::from_value::<Action>(item.clone()) {
            Ok(action) if allowed.contains(action.name()) => out.actions.push(action),
            Ok(action) => out.malformed.push(format!("DisallowedTool: '{}'", action.name())),
            Err(e) => out.malformed.push(format!("InvalidAction: {e}: {item}")),
        }
    }
    if !out.malformed.is_empty() {
        tracing::warn!(malformed = ?out.malformed, parsed = out.actions.len(), "action list partially malformed");
    }
    out
}

fn build_call(name: &str, args: &str) -> Result<Action, String> {
    match name {
        "write" => Ok(Action::Write { text: string_arg(args)? }),
        "press" => Ok(Action::Press { key: string_arg(args)? }),
        _ => {
            let nums = int_args(args)?;
            let point = |x: i64, y: i64| {
                NormalizedPoint::new(x, y).ok_or_else(|| format!("OutOfRange ({x}, {y})"))
            };
            match (name, nums.as_slice()) {
                ("click", [x, y]) => Ok(Action::Click { point: point(*x, *y)? }),
                ("right_click", [x, y]) => Ok(Action::RightClick { point: point(*x, *y)? }),
                ("double_click", [x, y]) => Ok(Action::DoubleClick { point: point(*x, *y)? }),
                ("drag", [x1, y1, x2, y2]) => Ok(Action::Drag {
                    start: point(*x1, *y1)?,
                    end: point(*x2, *y2)?,
                }),
                ("scroll", [x, y, delta]) => Ok(Action::Scroll {
                    point: point(*x, *y)?,
                    delta: i32::try_from(*delta).map_err(|_| format!("OutOfRange delta {delta}"))?,
                }),
                _ => Err(format!("WrongArity: {name} takes {} arguments, got {}", arity(name), nums.len())),
            }
        }
    }
}

fn arity(name: &str) -> usize {
    match name {
        "drag" => 4,
        "scroll" => 3,
        "write" | "press" => 1,
        _ => 2,
    }
}

fn int_args(args: &str) -> Result<Vec<i64>, String> {
    if args.trim().is_empty() {
        return Ok(Vec::new());
    }
    args.split(',')
        .map(|a| {
            let a = a.trim();
            // Allow keyword form `x=500`.
            let v = a.rsplit('=').next().unwrap_or(a).trim();
            v.parse::<i64>().map_err(|_| format!("BadArgument '{a}'"))
        })
        .collect()
}

fn string_arg(args: &str) -> Result<String, String> {
    let a = args.trim();
    if a.len() >= 2 && a.starts_with('"') && a.ends_with('"') {
        return serde_json::from_str::<String>(a).map_err(|e| format!("BadString {e}"));
    }
    if a.len() >= 2 && a.starts_with('\'') && a.ends_with('\'') {
        return Ok(a[1..a.len() - 1].replace("\\'", "'"));
    }
    Err(format!("BadString {a}"))
}

/// The model's prose report with action lines removed; carried into the
/// next turn's prompt. Falls back to the trimmed input if nothing is left.
pub fn story_text(raw: &str) -> String {
    let mut prose = Vec::new();
    for line in raw.lines() {
        let stripped = line.trim();
        if BARE_ACTION_WORD_RE.is_match(stripped) || stripped.starts_with("```") {
            continue;
        }
        let cleaned = clean_line(stripped);
        if stripped != cleaned && cleaned.is_empty() {
            continue;
        }
        if CALL_RE.is_match(&cleaned) {
            continue;
        }
        prose.push(if stripped != cleaned { cleaned } else { line.to_string() });
    }
    let text = prose.join("\n").trim_end().to_string();
    if text.trim().is_empty() {
        raw.trim().to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: i64, y: i64) -> NormalizedPoint {
        NormalizedPoint::new(x, y).unwrap()
    }

    fn all() -> Vec<String> {
        TOOL_NAMES.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_bare_calls_after_prose() {
        let raw = "The explorer is open. I will open Documents.\n\n\
                   PART 2 -- Actions\n\
                   double_click(350, 400)\n\
                   drag(100, 100, 900, 100)\n\
                   write(\"hello \\\"you\\\"\")\n\
                   press('enter')\n";
        let out = parse_actions(raw, &all());
        assert!(out.malformed.is_empty(), "{:?}", out.malformed);
        assert_eq!(
            out.actions,
            vec![
                Action::DoubleClick { point: pt(350, 400) },
                Action::Drag { start: pt(100, 100), end: pt(900, 100) },
                Action::Write { text: "hello \"you\"".into() },
                Action::Press { key: "enter".into() },
            ]
        );
    }

    #[test]
    fn fenced_and_raw_copies_are_deduplicated() {
        let raw = "Report.\n```python\nclick(1, 2)\nclick(3, 4)\n```\n";
        let out = parse_actions(raw, &all());
        assert_eq!(out.actions, vec![Action::Click { point: pt(1, 2) }, Action::Click { point: pt(3, 4) }]);
    }

    #[test]
    fn bad_entries_are_reported_not_fatal() {
        let raw = "click(500, 1001)\nclick(5)\nteleport(1, 1)\nclick(1, 1\nright_click(10, 10)";
        let out = parse_actions(raw, &all());
        assert_eq!(out.actions, vec![Action::RightClick { point: pt(10, 10) }]);
        assert_eq!(out.malformed.len(), 4, "{:?}", out.malformed);
        assert!(out.malformed[0].starts_with("OutOfRange"));
        assert!(out.malformed[1].starts_with("WrongArity"));
        assert!(out.malformed[2].starts_with("UnknownTool"));
        assert!(out.malformed[3].starts_with("UnrecognizedCall"));
        assert!(matches!(out.parse_error(), Some(HeatloopError::ActionParse(_))));
    }

    #[test]
    fn allowed_tools_filter() {
        let out = parse_actions("click(1, 1)\ndrag(1, 1, 2, 2)", &["click".to_string()]);
        assert_eq!(out.actions, vec![Action::Click { point: pt(1, 1) }]);
        assert_eq!(out.malformed, vec!["DisallowedTool: 'drag'".to_string()]);
    }

    #[test]
    fn json_action_list() {
        let raw = r#"[{"type":"click","point":[500,500]},{"type":"drag","start":[0,0]}]"#;
        let out = parse_actions(raw, &all());
        assert_eq!(out.actions, vec![Action::Click { point: pt(500, 500) }]);
        assert_eq!(out.malformed.len(), 1);
    }

    #[test]
    fn prose_only_output_is_empty_not_an_error() {
        let out = parse_actions("Nothing to do (yet).", &all());
        assert!(out.actions.is_empty());
        assert!(out.malformed.is_empty());
    }

    #[test]
    fn story_text_drops_action_lines() {
        let raw = "PART 1 -- The desktop is visible.\nI will click the icon.\n\nActions\nclick(1, 2)\n";
        assert_eq!(story_text(raw), "The desktop is visible.\nI will click the icon.");
        assert_eq!(story_text("click(1, 2)"), "click(1, 2)");
    }
}
