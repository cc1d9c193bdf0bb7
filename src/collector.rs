use crate::helm::worker::JobError;
use crate::traits::ErrorsCollector;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// [`ErrorsCollector`] keeping error messages in memory, grouped by
/// repository id.
#[derive(Debug, Default)]
pub struct MemoryErrorsCollector {
    errors: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryErrorsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages recorded for `repository_id`, oldest first.
    pub fn errors(&self, repository_id: &str) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repository_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> HashMap<String, Vec<String>> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl ErrorsCollector for MemoryErrorsCollector {
    fn append(&self, repository_id: &str, err: JobError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(repository_id.to_string())
            .or_default()
            .push(err.to_string());
    }
}
