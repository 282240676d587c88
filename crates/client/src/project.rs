//! Project store - the server's latest requirements snapshot and
//! validation findings. Read-only for consumers.

use analyst_protocol::{StateSnapshot, ValidationIssue, ValidationWarning};

#[derive(Debug, Clone, Default)]
pub struct ProjectStore {
    snapshot: Option<StateSnapshot>,
    validation: Option<ValidationWarning>,
}

impl ProjectStore {
    pub fn snapshot(&self) -> Option<&StateSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        self.validation
            .as_ref()
            .map(|v| v.issues.as_slice())
            .unwrap_or_default()
    }

    /// 100 until the server reports otherwise
    pub fn safety_score(&self) -> u32 {
        self.validation.as_ref().map_or(100, |v| v.safety_score)
    }

    pub fn set_snapshot(&mut self, snapshot: StateSnapshot) {
        self.snapshot = Some(snapshot);
    }

    pub fn set_validation(&mut self, warning: ValidationWarning) {
        self.validation = Some(warning);
    }

    pub fn reset(&mut self) {
        self.snapshot = None;
        self.validation = None;
    }
}
