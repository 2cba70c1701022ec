//! Special-Judge Invoker.
//!
//! Spawns the external judge binary with six positional arguments and reads
//! back its verdict through a small score/message file protocol. This is a
//! sub-process runner in its own right, separate from [`crate::runner`]:
//! it only enforces a wall-clock cap (no memory limit, no CPU-time
//! tracking) and classifies outcomes against the `_score`/`_message`
//! contract instead of comparing output streams.

use std::fs;
use std::time::Duration;

use sandbox::{ProcessBuilder, ProcessExitStatus};

use crate::cancellation::CancellationToken;
use crate::settings::Settings;
use crate::{ResultKind, TestJob};

/// Interval between polls of the special judge's exit status.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Run the special judge configured for `job` against `contestant_output`,
/// returning the verdict it produces. Returns `None` if cancellation was
/// observed before a verdict was reached.
pub fn invoke(
    job: &TestJob,
    contestant_output: &std::path::Path,
    settings: &dyn Settings,
    cancel: &CancellationToken,
) -> crate::Result<Option<(ResultKind, i64, String)>> {
    let judge_path = settings.data_path().join(&job.special_judge_path);
    let score_path = job.working_directory.join("_score");
    let message_path = job.working_directory.join("_message");

    log::trace!("invoking special judge {:?}", judge_path);

    let mut builder = ProcessBuilder::new(&judge_path);
    builder.working_dir = Some(job.working_directory.clone());
    builder.limits.real_time_limit = Some(Duration::from_millis(job.special_judge_time_limit_ms));

    let args = [
        job.input_file.to_string_lossy().into_owned(),
        contestant_output.to_string_lossy().into_owned(),
        job.reference_output_file.to_string_lossy().into_owned(),
        job.full_score.to_string(),
        score_path.to_string_lossy().into_owned(),
        message_path.to_string_lossy().into_owned(),
    ];
    for arg in &args {
        if builder.add_arg(arg.clone()).is_err() {
            return Ok(Some((
                ResultKind::InvalidSpecialJudge,
                0,
                "Invalid special judge argument".to_string(),
            )));
        }
    }

    let mut process = match builder.start() {
        Ok(p) => p,
        Err(_) => return Ok(Some((ResultKind::InvalidSpecialJudge, 0, String::new()))),
    };

    loop {
        if cancel.is_cancelled() {
            process.kill();
            process.wait_for_exit()?;
            return Ok(None);
        }

        match process.exit_status() {
            ProcessExitStatus::NotExited => {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
            status => {
                process.wait_for_exit()?;
                return Ok(Some(classify(status, &score_path, &message_path)?));
            }
        }
    }
}

fn classify(
    status: ProcessExitStatus,
    score_path: &std::path::Path,
    message_path: &std::path::Path,
) -> crate::Result<(ResultKind, i64, String)> {
    let verdict = match status {
        ProcessExitStatus::Normal(0) => read_verdict(score_path, message_path),
        ProcessExitStatus::Normal(_) | ProcessExitStatus::KilledBySignal(_) => {
            (ResultKind::SpecialJudgeRunTimeError, 0, String::new())
        }
        ProcessExitStatus::RealTimeLimitExceeded => {
            (ResultKind::SpecialJudgeTimeLimitExceeded, 0, String::new())
        }
        ProcessExitStatus::CpuTimeLimitExceeded | ProcessExitStatus::MemoryLimitExceeded => {
            (ResultKind::SpecialJudgeRunTimeError, 0, String::new())
        }
        ProcessExitStatus::SandboxError { message } => {
            return Err(crate::ErrorKind::SandboxFailure(message).into())
        }
        ProcessExitStatus::NotExited => unreachable!("handled by the caller's poll loop"),
    };

    let _ = fs::remove_file(score_path);
    let _ = fs::remove_file(message_path);
    Ok(verdict)
}

/// Read back the `_score`/`_message` protocol the special judge wrote.
fn read_verdict(
    score_path: &std::path::Path,
    message_path: &std::path::Path,
) -> (ResultKind, i64, String) {
    let score = match fs::read_to_string(score_path) {
        Ok(contents) => match contents.trim().parse::<i64>() {
            Ok(value) if value >= 0 => value,
            _ => return (ResultKind::InvalidSpecialJudge, 0, String::new()),
        },
        Err(_) => return (ResultKind::InvalidSpecialJudge, 0, String::new()),
    };

    let message = fs::read_to_string(message_path).unwrap_or_else(|_| {
        log::warn!("special judge did not write a _message file");
        String::new()
    });

    // The score-to-result mapping needs `full_score`, which this module
    // doesn't have; the orchestrator remaps this placeholder `CorrectAnswer`
    // against the job's `full_score` before using it.
    (ResultKind::CorrectAnswer, score, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn read_verdict_rejects_negative_score() {
        let dir = tempdir().unwrap();
        let score_path = dir.path().join("_score");
        let message_path = dir.path().join("_message");
        let mut f = fs::File::create(&score_path).unwrap();
        write!(f, "-5").unwrap();

        let (result, score, _) = read_verdict(&score_path, &message_path);
        assert_eq!(result, ResultKind::InvalidSpecialJudge);
        assert_eq!(score, 0);
    }

    #[test]
    fn read_verdict_reads_message() {
        let dir = tempdir().unwrap();
        let score_path = dir.path().join("_score");
        let message_path = dir.path().join("_message");
        fs::write(&score_path, "50").unwrap();
        fs::write(&message_path, "halfway").unwrap();

        let (_, score, message) = read_verdict(&score_path, &message_path);
        assert_eq!(score, 50);
        assert_eq!(message, "halfway");
    }

    #[test]
    fn read_verdict_missing_file_is_invalid() {
        let dir = tempdir().unwrap();
        let score_path = dir.path().join("_score");
        let message_path = dir.path().join("_message");

        let (result, _, _) = read_verdict(&score_path, &message_path);
        assert_eq!(result, ResultKind::InvalidSpecialJudge);
    }
}
