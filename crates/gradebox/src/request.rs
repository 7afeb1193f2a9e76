//! Grading request and result model.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// One grading job: a source file and parallel test-case lists.
///
/// `inputs[i]` is a single string carrying the whole case: its
/// space-separated tokens become both the program's argv and (joined by
/// newlines) its standard input. `expecteds[i]` is compared against the
/// trimmed standard output.
#[derive(Debug, Clone, Default)]
pub struct GradingRequest {
    pub source_path: PathBuf,
    pub inputs: Vec<String>,
    pub expecteds: Vec<String>,
}

impl GradingRequest {
    pub fn case_count(&self) -> usize {
        self.inputs.len()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.inputs.len() != self.expecteds.len() {
            return Err(Error::InvalidRequest {
                inputs: self.inputs.len(),
                expecteds: self.expecteds.len(),
            });
        }
        Ok(())
    }
}

/// Per-case observed outputs and verdicts, index-aligned with the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradingResult {
    pub outputs: Vec<String>,
    pub corrects: Vec<bool>,
}

impl GradingResult {
    pub fn all_correct(&self) -> bool {
        self.corrects.iter().all(|&c| c)
    }
}
