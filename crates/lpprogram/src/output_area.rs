//! Outputs collected for a single cell.

use serde_json::Value;

/// nbformat outputs of a cell, in arrival order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputArea {
    outputs: Vec<Value>,
    /// Set by `clear_output(wait=true)`: clear right before the next output lands
    clear_queued: bool,
}

impl OutputArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(outputs: Vec<Value>) -> Self {
        Self {
            outputs,
            clear_queued: false,
        }
    }

    pub fn to_json(&self) -> Vec<Value> {
        self.outputs.clone()
    }

    pub fn outputs(&self) -> &[Value] {
        &self.outputs
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Drop all outputs immediately.
    pub fn clear_output(&mut self) {
        self.outputs.clear();
        self.clear_queued = false;
    }

    /// Apply a kernel `clear_output` request.
    pub fn handle_clear_output(&mut self, wait: bool) {
        if wait {
            self.clear_queued = true;
        } else {
            self.clear_output();
        }
    }

    /// Append an nbformat output. Consecutive stream text on the same stream
    /// is merged into one output.
    pub fn handle_output(&mut self, output: Value) {
        if self.clear_queued {
            self.clear_output();
        }

        if let Some(last) = self.outputs.last_mut() {
            if let Some(text) = mergeable_stream_text(last, &output) {
                last["text"] = Value::String(text);
                return;
            }
        }
        self.outputs.push(output);
    }
}

fn mergeable_stream_text(last: &Value, next: &Value) -> Option<String> {
    let is_stream = |v: &Value| v.get("output_type").and_then(Value::as_str) == Some("stream");
    if !is_stream(last) || !is_stream(next) || last.get("name") != next.get("name") {
        return None;
    }
    let previous = multiline_text(last.get("text")?)?;
    let appended = multiline_text(next.get("text")?)?;
    Some(format!("{previous}{appended}"))
}

/// Stream text is either one string or a list of lines.
fn multiline_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(lines) => lines.iter().map(Value::as_str).collect(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream(name: &str, text: &str) -> Value {
        json!({"output_type": "stream", "name": name, "text": text})
    }

    #[test]
    fn test_consecutive_stream_text_is_merged() {
        let mut area = OutputArea::new();
        area.handle_output(stream("stdout", "a"));
        area.handle_output(stream("stdout", "b"));
        area.handle_output(stream("stderr", "c"));
        assert_eq!(area.outputs(), &[stream("stdout", "ab"), stream("stderr", "c")]);
    }

    #[test]
    fn test_stream_line_lists_are_merged() {
        let mut area = OutputArea::from_json(vec![
            json!({"output_type": "stream", "name": "stdout", "text": ["X = bob\n", "X = liz\n"]}),
        ]);
        area.handle_output(stream("stdout", "true.\n"));
        assert_eq!(area.outputs(), &[stream("stdout", "X = bob\nX = liz\ntrue.\n")]);
    }

    #[test]
    fn test_non_stream_outputs_are_appended() {
        let mut area = OutputArea::new();
        let result = json!({"output_type": "execute_result", "data": {"text/plain": "true"}});
        area.handle_output(stream("stdout", "a"));
        area.handle_output(result.clone());
        area.handle_output(stream("stdout", "b"));
        assert_eq!(area.outputs().len(), 3);
        assert_eq!(area.outputs()[1], result);
    }

    #[test]
    fn test_clear_output_now() {
        let mut area = OutputArea::from_json(vec![stream("stdout", "old")]);
        area.handle_clear_output(false);
        assert!(area.is_empty());
    }

    #[test]
    fn test_clear_output_wait_defers_until_next_output() {
        let mut area = OutputArea::from_json(vec![stream("stdout", "old")]);
        area.handle_clear_output(true);
        assert_eq!(area.outputs().len(), 1);

        area.handle_output(stream("stdout", "new"));
        assert_eq!(area.outputs(), &[stream("stdout", "new")]);
    }
}
