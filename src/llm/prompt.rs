use crate::agent_engine::state::TOOL_NAMES;

/// Story carried into the very first turn.
pub const INITIAL_STORY: &str =
    "The screen has just appeared. I will look at what is visible and interact with it.";

/// Story that replaces a run of failed turns.
pub fn recovery_story(turn: u64) -> String {
    format!(
        "Turn {turn}: previous actions failed. Starting fresh.\n\
         I will look at the screenshot and click on the most prominent element."
    )
}

fn tool_signature(name: &str) -> &'static str {
    match name {
        "click" => "click(x, y)",
        "right_click" => "right_click(x, y)",
        "double_click" => "double_click(x, y)",
        "drag" => "drag(x1, y1, x2, y2)",
        "scroll" => "scroll(x, y, delta)",
        "write" => "write(\"text\")",
        "press" => "press(\"key\")",
        _ => "",
    }
}

/// System prompt advertising only `allowed` tools (all when empty).
pub fn system_prompt(allowed: &[String]) -> String {
    let tools: Vec<&str> = TOOL_NAMES
        .iter()
        .filter(|t| allowed.is_empty() || allowed.iter().any(|a| a == *t))
        .map(|t| tool_signature(t))
        .collect();

    format!(
        "You are an agent controlling a computer through its mouse and keyboard.\n\
         Each turn you receive your previous report and a screenshot.\n\
         White marks show where your previous actions landed. Orange glow marks areas \
         you already touched; prefer new targets.\n\n\
         Respond with exactly two parts:\n\n\
         PART 1 -- Updated report (plain text, 2-4 sentences):\n\
         Describe what the screen shows NOW. State your next goal and why.\n\n\
         PART 2 -- Actions (one call per line, last lines of your response):\n\
         Available: {}\n\
         Coordinates are integers 0-1000 on each axis, (0, 0) top-left.\n\n\
         Rules:\n\
         - Function calls MUST be the last lines. Nothing after them.\n\
         - Do not write markdown or code fences.",
        tools.join("   ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_only_allowed_tools() {
        let p = system_prompt(&["click".to_string(), "drag".to_string()]);
        assert!(p.contains("click(x, y)"));
        assert!(p.contains("drag(x1, y1, x2, y2)"));
        assert!(!p.contains("write("));
        assert!(system_prompt(&[]).contains("press(\"key\")"));
    }
}
