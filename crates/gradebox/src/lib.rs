//! gradebox: containerized grading of student-submitted C++ programs.
//!
//! A grading request names one source file plus parallel lists of test-case
//! inputs and expected outputs. The grader compiles the source inside a
//! [`gradebox_container::Container`], runs the produced binary once per
//! case, and reports the trimmed stdout and a per-case verdict.
//!
//! ```ignore
//! use gradebox::{Grader, GraderKind, GradingRequest};
//!
//! let mut grader = Grader::new(GraderKind::CppContainerized)?;
//! let result = grader.grade(&GradingRequest {
//!     source_path: "sum.cpp".into(),
//!     inputs: vec!["2 3".into(), "10 20".into()],
//!     expecteds: vec!["5".into(), "30".into()],
//! })?;
//! assert_eq!(result.corrects, [true, true]);
//! ```
//!
//! The embedding binary must call `gradebox_container::run_if_init()` before
//! anything else; see that crate's documentation.

pub mod error;
pub mod factory;
pub mod request;

pub use error::Error;
pub use factory::{Grader, GraderKind};
pub use request::{GradingRequest, GradingResult};

#[cfg(target_os = "linux")]
mod cpp;
#[cfg(target_os = "linux")]
pub use cpp::CppContainerizedGrader;
