//! Top-level judging pipeline: stages input, runs the contestant, compares
//! its output, and applies the borderline-timeout rejudge policy before
//! unstaging whatever temporary files the run produced.

use std::fs;
use std::path::{Path, PathBuf};

use crate::cancellation::CancellationToken;
use crate::comparators::{compare_line_by_line, compare_real_numbers};
use crate::runner::{self, RunOutcome};
use crate::settings::Settings;
use crate::special_judge;
use crate::{ComparisonMode, JudgeResult, ResultKind, TaskType, TestJob};

/// Upper bound on rerun attempts while chasing a borderline timeout down to
/// its true minimum time.
const MAX_REJUDGE_ATTEMPTS: u32 = 10;

/// Judge one test case. Returns `Ok(None)` if `cancel` was observed before a
/// verdict was reached.
pub fn judge(
    job: &TestJob,
    settings: &dyn Settings,
    cancel: CancellationToken,
) -> crate::Result<Option<JudgeResult>> {
    match job.task_type {
        TaskType::Traditional => judge_traditional(job, settings, &cancel),
        TaskType::AnswersOnly => judge_answers_only(job, settings, &cancel),
    }
}

fn judge_traditional(
    job: &TestJob,
    settings: &dyn Settings,
    cancel: &CancellationToken,
) -> crate::Result<Option<JudgeResult>> {
    if !job.input_file.exists() {
        return Ok(Some(JudgeResult::file_error(
            "Cannot find standard input file",
        )));
    }

    let staged_input = if !job.uses_stdin {
        let dest = job.working_directory.join(&job.input_filename);
        if fs::copy(&job.input_file, &dest).is_err() {
            return Ok(Some(JudgeResult::file_error(
                "Cannot copy standard input file",
            )));
        }
        Some(dest)
    } else {
        None
    };

    let outcome = match runner::run(job, cancel)? {
        Some(outcome) => outcome,
        None => return Ok(None),
    };

    let (mut result, mut score, mut time_used_ms, mut memory_used_bytes, mut message) =
        match outcome {
            RunOutcome::Ran {
                time_used_ms,
                memory_used_bytes,
            } => (
                ResultKind::CorrectAnswer,
                0i64,
                time_used_ms,
                memory_used_bytes,
                String::new(),
            ),
            RunOutcome::RunTimeError { message } => {
                unstage(job, &staged_input);
                return Ok(Some(JudgeResult {
                    result: ResultKind::RunTimeError,
                    score: 0,
                    time_used_ms: -1,
                    memory_used_bytes: -1,
                    message,
                    needs_rejudge: false,
                }));
            }
            RunOutcome::TimeLimitExceeded => {
                unstage(job, &staged_input);
                return Ok(Some(JudgeResult::terminal(ResultKind::TimeLimitExceeded, "")));
            }
            RunOutcome::MemoryLimitExceeded => {
                unstage(job, &staged_input);
                return Ok(Some(JudgeResult::terminal(
                    ResultKind::MemoryLimitExceeded,
                    "",
                )));
            }
            RunOutcome::CannotStartProgram => {
                unstage(job, &staged_input);
                return Ok(Some(JudgeResult::terminal(
                    ResultKind::CannotStartProgram,
                    "",
                )));
            }
        };

    let output_path = output_path_for(job);
    match judge_output(job, &output_path, settings, cancel)? {
        Some((k, s, m)) => {
            result = k;
            score = s;
            message = m;
        }
        None => return Ok(None),
    }

    let mut needs_rejudge = false;

    if time_used_ms > job.time_limit_ms as i64 {
        let borderline = score > 0 && is_borderline(job, time_used_ms);

        if job.check_rejudge_mode && borderline {
            log::debug!(
                "borderline timeout ({} ms over {} ms limit), entering rejudge loop",
                time_used_ms,
                job.time_limit_ms
            );
            let mut min_time_used = time_used_ms;
            let mut min_memory_used = memory_used_bytes;
            let mut converged = true;

            for _ in 0..MAX_REJUDGE_ATTEMPTS {
                let rerun = match runner::run(job, cancel)? {
                    Some(outcome) => outcome,
                    None => return Ok(None),
                };
                let (re_time, re_memory) = match rerun {
                    RunOutcome::Ran {
                        time_used_ms,
                        memory_used_bytes,
                    } => (time_used_ms, memory_used_bytes),
                    _ => {
                        converged = false;
                        break;
                    }
                };

                if re_time < min_time_used {
                    min_time_used = re_time;
                    min_memory_used = re_memory;
                    match judge_output(job, &output_path, settings, cancel)? {
                        Some((k, s, m)) => {
                            result = k;
                            score = s;
                            message = m;
                        }
                        None => return Ok(None),
                    }
                    if min_time_used <= job.time_limit_ms as i64 {
                        break;
                    }
                }
            }

            time_used_ms = min_time_used;
            memory_used_bytes = min_memory_used;

            if !converged || time_used_ms > job.time_limit_ms as i64 {
                score = 0;
                result = ResultKind::TimeLimitExceeded;
                message = String::new();
            }
        } else {
            if !job.check_rejudge_mode && borderline {
                needs_rejudge = true;
            }
            score = 0;
            result = ResultKind::TimeLimitExceeded;
            message = String::new();
        }
    }

    unstage(job, &staged_input);

    Ok(Some(JudgeResult {
        result,
        score,
        time_used_ms,
        memory_used_bytes,
        message,
        needs_rejudge,
    }))
}

fn judge_answers_only(
    job: &TestJob,
    settings: &dyn Settings,
    cancel: &CancellationToken,
) -> crate::Result<Option<JudgeResult>> {
    let answer_file = match &job.answer_file {
        Some(path) => path.clone(),
        None => return Ok(Some(JudgeResult::file_error("No answer submitted"))),
    };

    match judge_output(job, &answer_file, settings, cancel)? {
        Some((result, score, message)) => Ok(Some(JudgeResult {
            result,
            score,
            time_used_ms: -1,
            memory_used_bytes: -1,
            message,
            needs_rejudge: false,
        })),
        None => Ok(None),
    }
}

/// Borderline: close enough to the limit that a rerun might come back
/// under it. Mirrors the two independent slack computations the original
/// used — either one being satisfied is enough.
fn is_borderline(job: &TestJob, time_used_ms: i64) -> bool {
    let time_limit = job.time_limit_ms as f64;
    let ratio = job.extra_time_ratio;
    let time_used = time_used_ms as f64;
    time_used <= time_limit * (1.0 + ratio) || time_used <= time_limit + 1000.0 * ratio
}

fn output_path_for(job: &TestJob) -> PathBuf {
    if job.uses_stdout {
        job.working_directory.join("_tmpout")
    } else {
        job.working_directory.join(&job.output_filename)
    }
}

fn judge_output(
    job: &TestJob,
    output_path: &Path,
    settings: &dyn Settings,
    cancel: &CancellationToken,
) -> crate::Result<Option<(ResultKind, i64, String)>> {
    log::debug!("dispatching to {:?} comparator", job.comparison_mode);
    match job.comparison_mode {
        ComparisonMode::LineByLine => Ok(compare_line_by_line(
            output_path,
            &job.reference_output_file,
            job.full_score,
            cancel,
        )),
        ComparisonMode::RealNumber => Ok(compare_real_numbers(
            output_path,
            &job.reference_output_file,
            job.full_score,
            job.real_precision,
            cancel,
        )),
        ComparisonMode::SpecialJudge => {
            let verdict = special_judge::invoke(job, output_path, settings, cancel)?;
            Ok(verdict.map(|(kind, score, message)| {
                remap_special_judge_score(kind, score, job.full_score, message)
            }))
        }
    }
}

/// `special_judge::invoke` can't see `full_score`, so it hands back its
/// score under a `CorrectAnswer` placeholder; this turns that placeholder
/// into the final verdict.
fn remap_special_judge_score(
    kind: ResultKind,
    score: i64,
    full_score: i64,
    message: String,
) -> (ResultKind, i64, String) {
    if kind != ResultKind::CorrectAnswer {
        return (kind, 0, message);
    }
    if score == 0 {
        (ResultKind::WrongAnswer, 0, message)
    } else if score < full_score {
        (ResultKind::PartlyCorrect, score, message)
    } else {
        (ResultKind::CorrectAnswer, score, message)
    }
}

fn unstage(job: &TestJob, staged_input: &Option<PathBuf>) {
    if let Some(path) = staged_input {
        let _ = fs::remove_file(path);
    }
    if job.uses_stdout {
        let _ = fs::remove_file(job.working_directory.join("_tmpout"));
    } else {
        let _ = fs::remove_file(job.working_directory.join(&job.output_filename));
    }
    let _ = fs::remove_file(job.working_directory.join("_tmperr"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TaskType;
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct NoSpecialJudgeSettings {
        data_path: PathBuf,
    }

    impl Settings for NoSpecialJudgeSettings {
        fn data_path(&self) -> &Path {
            &self.data_path
        }
    }

    fn base_job(wd: &Path) -> TestJob {
        TestJob {
            working_directory: wd.to_path_buf(),
            time_limit_ms: 1000,
            ..TestJob::default()
        }
    }

    #[test]
    fn missing_input_is_file_error() {
        let dir = tempdir().unwrap();
        let settings = NoSpecialJudgeSettings {
            data_path: dir.path().to_path_buf(),
        };
        let job = base_job(dir.path());
        let cancel = CancellationToken::new();

        let result = judge(&job, &settings, cancel).unwrap().unwrap();
        assert_eq!(result.result, ResultKind::FileError);
    }

    #[test]
    fn answers_only_without_answer_file_is_file_error() {
        let dir = tempdir().unwrap();
        let settings = NoSpecialJudgeSettings {
            data_path: dir.path().to_path_buf(),
        };
        let mut job = base_job(dir.path());
        job.task_type = TaskType::AnswersOnly;
        job.answer_file = None;
        let cancel = CancellationToken::new();

        let result = judge(&job, &settings, cancel).unwrap().unwrap();
        assert_eq!(result.result, ResultKind::FileError);
    }

    #[test]
    fn answers_only_compares_submitted_answer() {
        let dir = tempdir().unwrap();
        let reference = dir.path().join("reference.txt");
        let answer = dir.path().join("answer.txt");
        fs::write(&reference, "42\n").unwrap();
        fs::write(&answer, "42\n").unwrap();

        let settings = NoSpecialJudgeSettings {
            data_path: dir.path().to_path_buf(),
        };
        let mut job = base_job(dir.path());
        job.task_type = TaskType::AnswersOnly;
        job.comparison_mode = ComparisonMode::LineByLine;
        job.reference_output_file = reference;
        job.answer_file = Some(answer);
        job.full_score = 100;
        let cancel = CancellationToken::new();

        let result = judge(&job, &settings, cancel).unwrap().unwrap();
        assert_eq!(result.result, ResultKind::CorrectAnswer);
        assert_eq!(result.score, 100);
    }

    #[test]
    fn borderline_slack_accepts_small_overrun() {
        let job = TestJob {
            time_limit_ms: 1000,
            extra_time_ratio: 0.5,
            ..TestJob::default()
        };
        assert!(is_borderline(&job, 1400));
        assert!(!is_borderline(&job, 5000));
    }

    #[test]
    fn special_judge_remap_splits_score_ranges() {
        assert_eq!(
            remap_special_judge_score(ResultKind::CorrectAnswer, 0, 100, String::new()).0,
            ResultKind::WrongAnswer
        );
        assert_eq!(
            remap_special_judge_score(ResultKind::CorrectAnswer, 50, 100, String::new()).0,
            ResultKind::PartlyCorrect
        );
        assert_eq!(
            remap_special_judge_score(ResultKind::CorrectAnswer, 100, 100, String::new()).0,
            ResultKind::CorrectAnswer
        );
        assert_eq!(
            remap_special_judge_score(ResultKind::InvalidSpecialJudge, 0, 100, String::new()).0,
            ResultKind::InvalidSpecialJudge
        );
    }
}
