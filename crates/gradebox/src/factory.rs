//! Grader selection by tag.
//!
//! A flat tagged enum, not a trait hierarchy: callers pick a
//! [`GraderKind`] at construction time and get one `grade` entry point.

use std::fmt;
use std::str::FromStr;

use crate::error::Result;
use crate::request::{GradingRequest, GradingResult};

/// Available grader implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraderKind {
    /// Compile and run C++ inside a container built from the embedded
    /// rootfs.
    CppContainerized,
}

impl GraderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CppContainerized => "cpp-containerized",
        }
    }
}

impl fmt::Display for GraderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cpp-containerized" => Ok(Self::CppContainerized),
            other => Err(format!("unknown grader kind: {other}")),
        }
    }
}

/// A ready-to-use grader behind one `grade` entry point.
#[cfg(target_os = "linux")]
pub enum Grader {
    Cpp(crate::cpp::CppContainerizedGrader),
}

#[cfg(target_os = "linux")]
impl Grader {
    /// Build a grader backed by a freshly materialized container.
    ///
    /// Grading is impossible without the container, so callers usually
    /// treat a failure here as fatal.
    pub fn new(kind: GraderKind) -> Result<Self> {
        match kind {
            GraderKind::CppContainerized => {
                let container = gradebox_container::Container::with_builtin_rootfs()?;
                Ok(Self::Cpp(crate::cpp::CppContainerizedGrader::new(container)))
            }
        }
    }

    pub fn grade(&mut self, request: &GradingRequest) -> Result<GradingResult> {
        match self {
            Self::Cpp(grader) => grader.grade(request),
        }
    }

    /// Dispose of the grader and its container.
    pub fn shutdown(self) -> Result<()> {
        match self {
            Self::Cpp(grader) => grader.shutdown(),
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub struct Grader {
    _private: (),
}

#[cfg(not(target_os = "linux"))]
impl Grader {
    pub fn new(_kind: GraderKind) -> Result<Self> {
        Err(gradebox_container::Error::Unsupported("containers require Linux").into())
    }

    pub fn grade(&mut self, _request: &GradingRequest) -> Result<GradingResult> {
        Err(gradebox_container::Error::Unsupported("containers require Linux").into())
    }

    pub fn shutdown(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_its_tag() {
        let kind: GraderKind = "cpp-containerized".parse().unwrap();
        assert_eq!(kind, GraderKind::CppContainerized);
        assert_eq!(kind.to_string(), "cpp-containerized");
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert!("python-containerized".parse::<GraderKind>().is_err());
    }
}
