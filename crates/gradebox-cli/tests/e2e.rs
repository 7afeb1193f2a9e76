//! End-to-end tests driving the `gradebox` binary.
//!
//! The binary is spawned as a subprocess so its dual personality works
//! exactly as in production: the CLI host creates the container, and the
//! re-executed copy of the same binary (init sentinel in argv[0]) does the
//! namespace and pivot_root work.
//!
//! Tests marked `#[ignore]` need Linux with unprivileged user namespaces
//! and a binary built with the embedded rootfs:
//!
//! ```sh
//! cargo test -p gradebox-cli --features builtin-rootfs -- --include-ignored
//! ```

use std::path::Path;
use std::process::{Command, Output};

const SUM_CPP: &str = r#"
#include <iostream>
int main() {
    int a, b;
    std::cin >> a >> b;
    std::cout << a + b << std::endl;
    return 0;
}
"#;

const ARGC_CPP: &str = r#"
#include <iostream>
int main(int argc, char **) {
    std::cout << argc << std::endl;
    return 0;
}
"#;

const BROKEN_CPP: &str = "int main() { return 0 }\n";

fn gradebox(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gradebox"))
        .args(args)
        .output()
        .expect("failed to spawn gradebox")
}

fn write_source(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path.to_str().unwrap().to_owned()
}

#[test]
fn help_prints_usage() {
    let out = gradebox(&["--help"]);
    assert!(out.status.success());

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("grade"));
    assert!(stdout.contains("exec"));
}

#[test]
fn malformed_case_is_rejected_before_any_container_work() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "sum.cpp", SUM_CPP);

    let out = gradebox(&["grade", "--source", &source, "--case", "no-separator"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("INPUT=EXPECTED"));
}

/// Sum program graded against two passing cases.
#[test]
#[ignore]
fn grades_correct_submission() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "sum.cpp", SUM_CPP);

    let out = gradebox(&[
        "grade", "--source", &source, "--case", "2 3=5", "--case", "10 20=30",
    ]);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        out.status.success(),
        "stdout: {stdout} stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(stdout.contains("case 0: ok"));
    assert!(stdout.contains("case 1: ok"));
}

/// A wrong expectation yields a per-case verdict and a failing exit code.
#[test]
#[ignore]
fn wrong_answer_is_reported_per_case() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "sum.cpp", SUM_CPP);

    let out = gradebox(&["grade", "--source", &source, "--case", "1 1=3"]);
    assert_eq!(out.status.code(), Some(1));

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("case 0: wrong"));
    assert!(stdout.contains("\"2\""), "observed output should be 2: {stdout}");
}

/// Case tokens are argv *and* stdin: a program counting argc sees the
/// program name plus three tokens.
#[test]
#[ignore]
fn case_tokens_reach_argv() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "argc.cpp", ARGC_CPP);

    let out = gradebox(&["grade", "--source", &source, "--case", "a b c=4"]);
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(String::from_utf8_lossy(&out.stdout).contains("case 0: ok"));
}

/// A source that does not compile fails grading as a whole.
#[test]
#[ignore]
fn compile_failure_fails_grading() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path(), "broken.cpp", BROKEN_CPP);

    let out = gradebox(&["grade", "--source", &source, "--case", "1 1=2"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("grading failed"));
}

/// The container sees the embedded userland, not the host filesystem.
#[test]
#[ignore]
fn container_root_is_the_embedded_userland() {
    let out = gradebox(&["exec", "ls", "/"]);
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let listing = String::from_utf8_lossy(&out.stdout);
    assert!(listing.contains("proc"));
    assert!(listing.contains("mnt"));
    assert!(listing.contains("usr"));
}

/// Writes outside the shared directory land in the container's rootfs,
/// which is pruned with it; nothing appears on the host.
#[test]
#[ignore]
fn files_created_inside_stay_inside() {
    let out = gradebox(&["exec", "sh", "-c", "echo breakout > /leaked.txt"]);
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(!Path::new("/leaked.txt").exists());
}

/// The single-identity UID map makes the sandboxed process root inside.
#[test]
#[ignore]
fn sandboxed_process_is_root_in_its_namespace() {
    let out = gradebox(&["exec", "id", "-u"]);
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "0");
}
