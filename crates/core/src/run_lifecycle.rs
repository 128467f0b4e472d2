//! Migration run triggers and the values written to a run row.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// What caused a run to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunTrigger {
    Manual,
    Cron,
    Api,
    /// Restart of a run orphaned by a previous process.
    Resume,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Cron => "cron",
            Self::Api => "api",
            Self::Resume => "resume",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "manual" => Ok(Self::Manual),
            "cron" => Ok(Self::Cron),
            "api" => Ok(Self::Api),
            "resume" => Ok(Self::Resume),
            _ => Err(CoreError::Validation(format!(
                "Invalid run trigger '{s}'. Must be one of: manual, cron, api, resume"
            ))),
        }
    }
}

impl std::fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a stage progress value into a percentage slot.
pub fn clamp_progress(value: i64) -> i16 {
    value.clamp(0, 100) as i16
}

/// First line of an error message, capped for the run row's `error` column.
pub fn summarize_error(message: &str) -> String {
    const MAX_LEN: usize = 500;
    let first = message.lines().next().unwrap_or_default().trim();
    if first.chars().count() <= MAX_LEN {
        first.to_string()
    } else {
        let cut: String = first.chars().take(MAX_LEN).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn trigger_round_trip() {
        for t in [RunTrigger::Manual, RunTrigger::Cron, RunTrigger::Api, RunTrigger::Resume] {
            assert_eq!(RunTrigger::from_str(t.as_str()).unwrap(), t);
        }
        assert_matches!(RunTrigger::from_str("webhook"), Err(CoreError::Validation(_)));
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(clamp_progress(-4), 0);
        assert_eq!(clamp_progress(57), 57);
        assert_eq!(clamp_progress(250), 100);
    }

    #[test]
    fn error_summary_keeps_first_line() {
        assert_eq!(summarize_error("boom\n  at stage x"), "boom");
        let long = "x".repeat(600);
        assert_eq!(summarize_error(&long).len(), 503);
    }
}
