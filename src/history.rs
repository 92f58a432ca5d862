//! Bounded window of recent steps supplied to both oracles.

use std::collections::VecDeque;

use crate::types::{HISTORY_CAPACITY, StepRecord};

/// The last [`HISTORY_CAPACITY`] step records, oldest first.
#[derive(Debug, Clone, Default)]
pub struct HistoryWindow {
    entries: VecDeque<StepRecord>,
}

impl HistoryWindow {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_CAPACITY + 1),
        }
    }

    /// Append a record, dropping the oldest one once the window is full.
    pub fn append(&mut self, record: StepRecord) {
        if self.entries.len() == HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepRecord> {
        self.entries.iter()
    }

    /// Text fed verbatim into oracle prompts. Empty window renders as "".
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(render_entry)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn render_entry(record: &StepRecord) -> String {
    let mut out = format!("- Step: {}", record.instruction);
    if let Some(script) = record.script.as_deref().filter(|s| !s.is_empty()) {
        out.push_str(&format!("\n  - Script:\n{}", script));
    }
    match record.error.as_deref().filter(|e| !e.is_empty()) {
        Some(error) => out.push_str(&format!("\n  - Status: Failed\n  - Error: {}", error)),
        None => out.push_str("\n  - Status: Success"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n: usize) -> StepRecord {
        StepRecord {
            instruction: format!("step {n}"),
            script: None,
            error: None,
        }
    }

    #[test]
    fn window_never_exceeds_capacity() {
        for n in 0..12 {
            let mut window = HistoryWindow::new();
            for i in 0..n {
                window.append(step(i));
            }
            assert_eq!(window.len(), n.min(HISTORY_CAPACITY));

            let kept: Vec<_> = window.iter().map(|r| r.instruction.clone()).collect();
            let expected: Vec<_> = (n.saturating_sub(HISTORY_CAPACITY)..n)
                .map(|i| format!("step {i}"))
                .collect();
            assert_eq!(kept, expected);
        }
    }

    #[test]
    fn empty_window_renders_empty_string() {
        assert_eq!(HistoryWindow::new().render(), "");
    }

    #[test]
    fn render_lists_scripts_and_status() {
        let mut window = HistoryWindow::new();
        window.append(StepRecord {
            instruction: "Open Notepad".into(),
            script: Some("Start-Process notepad.exe".into()),
            error: None,
        });
        window.append(StepRecord {
            instruction: "Click element 7 OK button".into(),
            script: Some("clickItem(7)".into()),
            error: Some("element 7 not found".into()),
        });

        assert_eq!(
            window.render(),
            "- Step: Open Notepad\n  - Script:\nStart-Process notepad.exe\n  - Status: Success\n\n\
             - Step: Click element 7 OK button\n  - Script:\nclickItem(7)\n  - Status: Failed\n  - Error: element 7 not found"
        );
    }

    #[test]
    fn render_is_a_pure_function_of_contents() {
        let mut window = HistoryWindow::new();
        window.append(step(1));
        let first = window.render();
        assert_eq!(first, window.render());
        assert_eq!(first, window.clone().render());
    }

    #[test]
    fn render_shows_only_the_most_recent_entries() {
        let mut window = HistoryWindow::new();
        for i in 0..7 {
            window.append(step(i));
        }
        let rendered = window.render();
        assert!(!rendered.contains("step 0"));
        assert!(!rendered.contains("step 1\n"));
        assert!(rendered.starts_with("- Step: step 2"));
        assert!(rendered.contains("- Step: step 6"));
    }
}
