//! External collaborator interfaces.
//!
//! `Task` and `Settings` model the surrounding task/test-case configuration
//! and application settings that this crate deliberately does not persist or
//! own. They exist purely so that a caller's concrete task/settings model
//! can be adapted into a [`crate::TestJob`] and a data root without this
//! crate depending on that model's representation.

use std::path::Path;

use crate::{ComparisonMode, TaskType};

/// A single test-case/task's configuration, as seen by the judging core.
///
/// Implemented by whatever task model the surrounding application already
/// has; this crate never constructs one itself, only reads from it while
/// assembling a `TestJob`.
pub trait Task {
    /// Whether this task executes the contestant or only compares a
    /// pre-submitted answer.
    fn task_type(&self) -> TaskType;

    /// Which comparator decides correctness for this task.
    fn comparison_mode(&self) -> ComparisonMode;

    /// Whether the contestant reads from standard input.
    fn uses_stdin(&self) -> bool;

    /// Whether the contestant writes to standard output.
    fn uses_stdout(&self) -> bool;

    /// File name the contestant expects its input under, when not using
    /// stdin.
    fn input_file_name(&self) -> &str;

    /// File name the contestant is expected to produce, when not using
    /// stdout.
    fn output_file_name(&self) -> &str;

    /// Path to the special judge binary, relative to `Settings::data_path`.
    fn special_judge_path(&self) -> &str;

    /// Number of decimal digits tolerated by the `RealNumber` comparator.
    fn real_precision(&self) -> u32;
}

/// Application-wide settings the judging core consumes.
pub trait Settings {
    /// Root directory under which special-judge binaries live. Read-only,
    /// shared across concurrent judgments.
    fn data_path(&self) -> &Path;
}
