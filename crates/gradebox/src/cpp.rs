//! Containerized C++ grader.
//!
//! Pipeline per request:
//!
//! 1. Copy the source file into the shared directory (basename preserved).
//! 2. Compile it inside the container with `c++ -Wall -Wpedantic -std=c++17`.
//! 3. Run the produced binary once per test case, comparing trimmed stdout
//!    against the expectation.
//! 4. Remove the compiled binary from the shared directory (best effort).
//!
//! A failed compilation is logged with its diagnostics but is not terminal
//! on its own: the run step reports the missing binary. The shared
//! directory is not wiped between cases, so files a case leaves behind are
//! visible to later cases.

use std::fs;
use std::path::Path;

use tracing::{debug, error, warn};

use gradebox_container::{CONTAINER_SHARED_DIR, Container};

use crate::error::{Error, Result};
use crate::request::{GradingRequest, GradingResult};

const COMPILER: &str = "c++";
const COMPILE_FLAGS: [&str; 3] = ["-Wall", "-Wpedantic", "-std=c++17"];

/// Grades C++ submissions inside an owned container.
///
/// Methods take `&mut self`; one grader serves one request at a time.
pub struct CppContainerizedGrader {
    container: Container,
}

impl CppContainerizedGrader {
    pub fn new(container: Container) -> Self {
        Self { container }
    }

    /// Compile and judge one submission against all its test cases.
    pub fn grade(&mut self, request: &GradingRequest) -> Result<GradingResult> {
        request.validate()?;

        let names = SourceNames::of(&request.source_path)?;
        self.copy_in(&request.source_path, &names)?;
        self.compile(&names)?;

        let outcome = self.run_cases(request, &names);
        self.remove_binary(&names);
        outcome
    }

    /// Consume the grader, disposing of its container.
    pub fn shutdown(mut self) -> Result<()> {
        self.container.prune()?;
        Ok(())
    }

    fn copy_in(&self, source_path: &Path, names: &SourceNames) -> Result<()> {
        let source = fs::read(source_path)
            .map_err(|e| Error::io(format!("reading source {}", source_path.display()), e))?;

        let dest = self.container.host_side_shared_dir().join(&names.basename);
        fs::write(&dest, source)
            .map_err(|e| Error::io(format!("copying source to {}", dest.display()), e))?;

        debug!(source = %source_path.display(), dest = %dest.display(), "source copied in");
        Ok(())
    }

    fn compile(&mut self, names: &SourceNames) -> Result<()> {
        let source = shared_path(&names.basename);
        let binary = shared_path(&names.stem);

        let args = COMPILE_FLAGS
            .into_iter()
            .map(str::to_owned)
            .chain(["-o".to_owned(), binary, source]);
        let output = self.container.command(COMPILER, args)?.combined_output()?;

        if !output.success() {
            // Not terminal on its own; with no binary produced, the first
            // run reports the failure.
            error!(
                status = %output.status,
                diagnostics = %output.stdout_str(),
                source = %names.basename,
                "compiler failed"
            );
        }
        Ok(())
    }

    fn run_cases(&mut self, request: &GradingRequest, names: &SourceNames) -> Result<GradingResult> {
        let mut result = GradingResult::default();

        for (case, (input, expected)) in
            request.inputs.iter().zip(&request.expecteds).enumerate()
        {
            let output = self.run_case(case, names, input)?;
            result.corrects.push(output == *expected);
            result.outputs.push(output);
        }

        Ok(result)
    }

    fn run_case(&mut self, case: usize, names: &SourceNames, input: &str) -> Result<String> {
        let (args, stdin_data) = split_case_input(input);

        let mut command = self.container.command(shared_path(&names.stem), args)?;
        command.stdin(stdin_data.into_bytes());
        let output = command.output()?;

        if !output.success() {
            return Err(Error::Run {
                case,
                status: output.status.to_string(),
                stderr: output.stderr_str(),
            });
        }

        Ok(output.stdout_str().trim().to_owned())
    }

    fn remove_binary(&self, names: &SourceNames) {
        let path = self.container.host_side_shared_dir().join(&names.stem);
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), "failed to remove compiled binary: {e}");
        }
    }
}

/// In-container path of a file in the shared directory.
fn shared_path(name: &str) -> String {
    format!("{CONTAINER_SHARED_DIR}/{name}")
}

/// Basename and extension-less stem of the submitted source file.
struct SourceNames {
    basename: String,
    stem: String,
}

impl SourceNames {
    fn of(path: &Path) -> Result<Self> {
        let basename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::io(
                    format!("source path {} has no usable file name", path.display()),
                    std::io::Error::from(std::io::ErrorKind::InvalidInput),
                )
            })?;

        let stem = match basename.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_owned(),
            _ => basename.clone(),
        };

        Ok(Self { basename, stem })
    }
}

/// One raw case string carries the whole run: space-separated tokens become
/// the program's argv, and the same tokens joined by newlines become its
/// standard input.
fn split_case_input(input: &str) -> (Vec<String>, String) {
    let tokens: Vec<String> = input.split(' ').map(str::to_owned).collect();
    let stdin_data = tokens.join("\n");
    (tokens, stdin_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_input_feeds_argv_and_stdin() {
        let (args, stdin_data) = split_case_input("2 3");
        assert_eq!(args, ["2", "3"]);
        assert_eq!(stdin_data, "2\n3");
    }

    #[test]
    fn single_token_case() {
        let (args, stdin_data) = split_case_input("42");
        assert_eq!(args, ["42"]);
        assert_eq!(stdin_data, "42");
    }

    #[test]
    fn split_is_on_single_spaces() {
        // Two spaces produce an empty token; the raw string is the contract.
        let (args, stdin_data) = split_case_input("a  b");
        assert_eq!(args, ["a", "", "b"]);
        assert_eq!(stdin_data, "a\n\nb");
    }

    #[test]
    fn source_names_strip_one_extension() {
        let names = SourceNames::of(Path::new("/tmp/main.cpp")).unwrap();
        assert_eq!(names.basename, "main.cpp");
        assert_eq!(names.stem, "main");

        let names = SourceNames::of(Path::new("archive.tar.gz")).unwrap();
        assert_eq!(names.stem, "archive.tar");
    }

    #[test]
    fn source_names_keep_spaces_and_odd_names() {
        let names = SourceNames::of(Path::new("/x/my solution (v2).cpp")).unwrap();
        assert_eq!(names.basename, "my solution (v2).cpp");
        assert_eq!(names.stem, "my solution (v2)");

        let names = SourceNames::of(Path::new("noext")).unwrap();
        assert_eq!(names.basename, "noext");
        assert_eq!(names.stem, "noext");

        let names = SourceNames::of(Path::new(".hidden")).unwrap();
        assert_eq!(names.stem, ".hidden");
    }

    #[test]
    fn shared_paths_live_under_the_container_mount() {
        assert_eq!(shared_path("main"), "/mnt/data/main");
    }
}
