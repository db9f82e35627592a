//! Output/progress sink (§2, §6) — the narrow interface tasks report
//! progress through. Colorization and terminal rendering are the
//! sink's concern, not the core's.

/// Receives progress reports from running tasks.
///
/// `pending` messages are transient (overwritten by the next `pending`
/// or `commit` call on the same line); `commit` messages are durable.
pub trait OutputSink: Send + Sync {
    /// Clear any pending state before a fresh sequence of reports.
    fn reset(&self);

    /// Report a transient, in-progress message.
    fn pending(&self, message: &str);

    /// Report a durable, final message for this unit of work.
    fn commit(&self, message: &str);
}

/// An `OutputSink` that discards everything. Used as a default when the
/// caller does not care about progress reporting (e.g. in tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn reset(&self) {}
    fn pending(&self, _message: &str) {}
    fn commit(&self, _message: &str) {}
}

/// An `OutputSink` that records every call, for tests that assert on
/// reported progress.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<String>>,
}

impl RecordingSink {
    /// New, empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, in call order (`"reset"`, `"pending: ..."`,
    /// `"commit: ..."`).
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl OutputSink for RecordingSink {
    fn reset(&self) {
        self.events.lock().unwrap().push("reset".to_string());
    }

    fn pending(&self, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("pending: {message}"));
    }

    fn commit(&self, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("commit: {message}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_captures_call_order() {
        let sink = RecordingSink::new();
        sink.reset();
        sink.pending("pulling");
        sink.commit("up");
        assert_eq!(
            sink.events(),
            vec![
                "reset".to_string(),
                "pending: pulling".to_string(),
                "commit: up".to_string()
            ]
        );
    }

    #[test]
    fn test_null_sink_does_not_panic() {
        let sink = NullSink;
        sink.reset();
        sink.pending("x");
        sink.commit("y");
    }
}
