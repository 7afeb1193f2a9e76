//! Host binary for containerized grading.
//!
//! The binary has two personalities keyed on `argv[0]`: re-executed with
//! the init sentinel it becomes a container's in-namespace init; invoked
//! normally it is this CLI. The init check runs before argument parsing,
//! logging, or anything that could spawn a thread.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use gradebox::{Grader, GraderKind, GradingRequest};

#[derive(Parser)]
#[command(name = "gradebox")]
#[command(version, about = "Compile and judge untrusted C++ submissions in a container")]
struct Cli {
    /// Log filter, e.g. "debug" or "gradebox_container=trace"
    #[arg(long, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a C++ source file against test cases
    Grade {
        /// Path to the source file
        #[arg(short, long)]
        source: PathBuf,

        /// Test case "INPUT=EXPECTED"; repeatable. The input's
        /// space-separated tokens become both argv and stdin lines.
        #[arg(short = 'c', long = "case", value_name = "INPUT=EXPECTED")]
        cases: Vec<String>,
    },

    /// Run a command inside a fresh container with stdio passed through
    Exec {
        command: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> ExitCode {
    // Must stay the first statement: selects the container-init personality
    // on argv[0] and assumes a still single-threaded process.
    gradebox_container::run_if_init();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Grade { source, cases } => run_grade(source, &cases),
        Commands::Exec { command, args } => run_exec(command, args),
    }
}

fn run_grade(source: PathBuf, cases: &[String]) -> ExitCode {
    let request = match build_request(source, cases) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("gradebox: {e:#}");
            return ExitCode::from(2);
        }
    };

    let outcome = (|| -> anyhow::Result<_> {
        let mut grader =
            Grader::new(GraderKind::CppContainerized).context("setting up the grader")?;
        let result = grader.grade(&request).context("grading failed")?;
        grader.shutdown().context("disposing of the container")?;
        Ok(result)
    })();

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            eprintln!("gradebox: {e:#}");
            return ExitCode::from(2);
        }
    };

    for (case, (output, correct)) in result.outputs.iter().zip(&result.corrects).enumerate() {
        let verdict = if *correct { "ok" } else { "wrong" };
        println!(
            "case {case}: {verdict} (output {output:?}, expected {:?})",
            request.expecteds[case]
        );
    }

    if result.all_correct() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn build_request(source: PathBuf, cases: &[String]) -> anyhow::Result<GradingRequest> {
    let mut inputs = Vec::with_capacity(cases.len());
    let mut expecteds = Vec::with_capacity(cases.len());

    for case in cases {
        let (input, expected) = case
            .split_once('=')
            .with_context(|| format!("case {case:?} must look like \"INPUT=EXPECTED\""))?;
        inputs.push(input.to_owned());
        expecteds.push(expected.to_owned());
    }

    Ok(GradingRequest {
        source_path: source,
        inputs,
        expecteds,
    })
}

#[cfg(target_os = "linux")]
fn run_exec(command: String, args: Vec<String>) -> ExitCode {
    use gradebox_container::Container;

    let outcome = (|| -> anyhow::Result<_> {
        let mut container = Container::with_builtin_rootfs().context("materializing container")?;
        let status = container.command(command, args)?.status()?;
        container.prune().context("pruning container")?;
        Ok(status)
    })();

    match outcome {
        Ok(status) => {
            let code = status
                .code()
                .or_else(|| status.signal().map(|s| 128 + s))
                .unwrap_or(1);
            ExitCode::from(code.clamp(0, 255) as u8)
        }
        Err(e) => {
            eprintln!("gradebox: {e:#}");
            ExitCode::from(2)
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn run_exec(_command: String, _args: Vec<String>) -> ExitCode {
    eprintln!("gradebox: containers require Linux");
    ExitCode::from(2)
}
