//! Routing of planner instructions to the click path or the script path.
//!
//! Direct clicks follow a small grammar, `Click element <id> <description>`,
//! anchored at the start of the instruction. Anything that does not match
//! goes through script synthesis.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{ElementId, IdGrammar};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Click(ElementId),
    Script,
}

static NUMERIC_CLICK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*click\s+element\s+(\d+)\b").expect("valid click regex")
});

static OPAQUE_CLICK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*click\s+element\s+(\S+)").expect("valid click regex")
});

/// Decide how `instruction` will be carried out.
pub fn classify(instruction: &str, grammar: IdGrammar) -> Dispatch {
    let re = match grammar {
        IdGrammar::Numeric => &*NUMERIC_CLICK,
        IdGrammar::Opaque => &*OPAQUE_CLICK,
    };
    let Some(raw) = re.captures(instruction).and_then(|c| c.get(1)) else {
        return Dispatch::Script;
    };
    let id = raw
        .as_str()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | ',' | ':' | '.'));
    if id.is_empty() {
        return Dispatch::Script;
    }
    Dispatch::Click(ElementId::new(id))
}

/// Script text recorded in history for a direct click.
pub fn click_script(id: &ElementId) -> String {
    format!("clickItem({id})")
}
