//! This crate implements the judging core: given a compiled contestant
//! executable, a task definition and a single test case, it runs the
//! contestant under enforced resource limits, observes how it terminated,
//! and compares its output against a reference using one of three
//! comparison strategies, producing a score, a result classification and a
//! human-readable message.
//!
//! Compilation, task/test-case configuration, persistence of results and UI
//! presentation are out of scope: this crate only consumes the `Task` and
//! `Settings` traits (see `settings`) that model those external
//! collaborators.

#[macro_use]
extern crate error_chain;

pub mod cancellation;
pub mod comparators;
mod orchestrator;
mod runner;
pub mod settings;
pub mod special_judge;

use std::path::PathBuf;

pub use cancellation::CancellationToken;
pub use orchestrator::judge;
pub use settings::{Settings, Task};

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        Sandbox(sandbox::Error, sandbox::ErrorKind);
    }

    foreign_links {
        Io(::std::io::Error);
    }

    errors {
        InvalidTestJob(reason: String) {
            description("invalid test job configuration")
            display("invalid test job configuration: {}", reason)
        }

        SandboxFailure(reason: String) {
            description("the sandbox layer reported an internal error while supervising a child")
            display("sandbox failure: {}", reason)
        }
    }
}

/// The two shapes a test case's judgment can take.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskType {
    /// Run the contestant's program and compare what it produces.
    Traditional,

    /// Skip execution entirely; compare a pre-submitted answer file.
    AnswersOnly,
}

/// The three output comparison strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonMode {
    /// Exact, token-by-token comparison (see `comparators::line_by_line`).
    LineByLine,

    /// Bounded real-number comparison (see `comparators::real_number`).
    RealNumber,

    /// Delegates to an external judge binary (see `special_judge`).
    SpecialJudge,
}

/// Everything the judging core needs to know about one test case. Immutable
/// for the duration of one judgment.
#[derive(Clone, Debug)]
pub struct TestJob {
    /// Absolute path to the contestant binary.
    pub executable_path: PathBuf,

    /// Absolute, writable, pre-existing path, unique per concurrent job.
    pub working_directory: PathBuf,

    /// Absolute path to the standard input for this test case.
    pub input_file: PathBuf,

    /// Absolute path to the expected (reference) output.
    pub reference_output_file: PathBuf,

    /// The contestant's pre-submitted output. Only read for `AnswersOnly`
    /// tasks.
    pub answer_file: Option<PathBuf>,

    /// Whether to execute the contestant or just compare a submitted answer.
    pub task_type: TaskType,

    /// Which comparator decides correctness.
    pub comparison_mode: ComparisonMode,

    /// If `true`, the contestant reads from its standard input; otherwise it
    /// reads `input_filename` from its working directory.
    pub uses_stdin: bool,

    /// If `true`, the contestant writes to its standard output; otherwise it
    /// writes `output_filename` to its working directory.
    pub uses_stdout: bool,

    /// Name the contestant expects its input file under, when not using
    /// stdin.
    pub input_filename: String,

    /// Name the contestant is expected to write its output under, when not
    /// using stdout.
    pub output_filename: String,

    /// Time limit, in milliseconds, measured against user-mode CPU time.
    pub time_limit_ms: u64,

    /// Memory limit, in mebibytes. A negative value disables memory
    /// enforcement entirely.
    pub memory_limit_mib: i64,

    /// The score awarded for a fully correct answer.
    pub full_score: i64,

    /// Number of decimal digits tolerated by the `RealNumber` comparator
    /// (`epsilon = 10^-real_precision`).
    pub real_precision: u32,

    /// Path to the special judge binary, relative to `Settings::data_path`.
    pub special_judge_path: String,

    /// Wall-clock time limit, in milliseconds, for the special judge.
    pub special_judge_time_limit_ms: u64,

    /// Fractional slack used by the rejudge policy.
    pub extra_time_ratio: f64,

    /// Whether the orchestrator is running in "rejudge mode": when `false`
    /// and a borderline timeout is observed, the case is TLE'd with a hint
    /// to re-invoke in rejudge mode instead of being retried inline.
    pub check_rejudge_mode: bool,

    /// Environment variables passed to the contestant's process.
    pub environment: Vec<(String, String)>,
}

impl Default for TestJob {
    fn default() -> TestJob {
        TestJob {
            executable_path: PathBuf::new(),
            working_directory: PathBuf::new(),
            input_file: PathBuf::new(),
            reference_output_file: PathBuf::new(),
            answer_file: None,
            task_type: TaskType::Traditional,
            comparison_mode: ComparisonMode::LineByLine,
            uses_stdin: true,
            uses_stdout: true,
            input_filename: String::new(),
            output_filename: String::new(),
            time_limit_ms: 1000,
            memory_limit_mib: -1,
            full_score: 100,
            real_precision: 6,
            special_judge_path: String::new(),
            special_judge_time_limit_ms: 5000,
            extra_time_ratio: 0.0,
            check_rejudge_mode: false,
            environment: Vec::new(),
        }
    }
}

/// Classification of a judgment's outcome. Judgment-domain outcomes are
/// never represented as `Err` — they live here, inside `Ok(JudgeResult)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultKind {
    /// Output matches; within limits.
    CorrectAnswer,

    /// Special judge awarded `0 < score < full_score`.
    PartlyCorrect,

    /// Output mismatch.
    WrongAnswer,

    /// Wall-clock cap tripped, or user-time exceeded the limit after a
    /// rejudge.
    TimeLimitExceeded,

    /// Peak resident set size exceeded the configured cap.
    MemoryLimitExceeded,

    /// The contestant exited with a non-zero code.
    RunTimeError,

    /// The contestant's process failed to start at all.
    CannotStartProgram,

    /// A required file was missing, unreadable, or could not be staged.
    FileError,

    /// The special judge crashed, was missing, or produced an invalid score
    /// file.
    InvalidSpecialJudge,

    /// The special judge's wall-clock cap tripped.
    SpecialJudgeTimeLimitExceeded,

    /// The special judge exited with a non-zero code.
    SpecialJudgeRunTimeError,
}

/// The outcome of judging one `TestJob`.
#[derive(Clone, Debug)]
pub struct JudgeResult {
    /// What happened.
    pub result: ResultKind,

    /// Score in `[0, full_score]`. Always `0` unless `result` is
    /// `CorrectAnswer` or `PartlyCorrect`.
    pub score: i64,

    /// User-mode CPU time consumed, in milliseconds, or `-1` if not
    /// measured / invalidated.
    pub time_used_ms: i64,

    /// Peak resident set size, in bytes, or `-1` if not measured /
    /// invalidated.
    pub memory_used_bytes: i64,

    /// Human-readable explanation. May be empty.
    pub message: String,

    /// Hint to the caller that this job is a good candidate for a rejudge
    /// pass under the borderline-timeout rejudge policy.
    pub needs_rejudge: bool,
}

impl JudgeResult {
    /// Build a terminal result with no score and no measurements — the
    /// shape every non-executing failure (`FileError`, `CannotStartProgram`,
    /// ...) takes.
    pub fn terminal<S: Into<String>>(result: ResultKind, message: S) -> JudgeResult {
        JudgeResult {
            result,
            score: 0,
            time_used_ms: -1,
            memory_used_bytes: -1,
            message: message.into(),
            needs_rejudge: false,
        }
    }

    /// Shorthand for `ResultKind::FileError`.
    pub fn file_error<S: Into<String>>(message: S) -> JudgeResult {
        JudgeResult::terminal(ResultKind::FileError, message)
    }
}
