//! Output comparators.
//!
//! `LineByLine` and `RealNumber` are implemented here; `SpecialJudge`
//! delegates to [`crate::special_judge`] since it needs the data root and a
//! sub-process of its own. All three never mutate the contestant's output or
//! the reference output.
//!
//! Cancellation is threaded through every iteration: a comparator returns
//! `None` the moment the stop flag is observed, recording no verdict.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::cancellation::CancellationToken;
use crate::ResultKind;

/// Maximum number of characters collected per token in `LineByLine` mode.
/// Two long lines whose first 10 bytes match compare equal for that step,
/// with the next step resuming mid-line. This is a known quirk of the
/// original comparator (see the module docs in `lib.rs`), preserved rather
/// than "fixed", since scoring histories depend on it.
const TOKEN_CAP: usize = 10;

/// A file read token-by-token per `LineByLine`'s rules.
struct LineTokenStream {
    reader: BufReader<File>,
    pending_crlf: bool,
}

impl LineTokenStream {
    fn open(path: &Path) -> std::io::Result<LineTokenStream> {
        Ok(LineTokenStream {
            reader: BufReader::new(File::open(path)?),
            pending_crlf: false,
        })
    }

    /// Read the next token. A lone `\n` ends the token; a `\r` ends it and
    /// sets a one-shot flag that swallows an immediately-following `\n`. EOF
    /// also ends the token; the returned `bool` records whether EOF was hit
    /// while looking for this token's terminator.
    fn read_token(&mut self) -> std::io::Result<(Vec<u8>, bool)> {
        let mut token = Vec::with_capacity(TOKEN_CAP);
        let mut hit_eof = false;
        let mut byte = [0u8; 1];

        while token.len() < TOKEN_CAP {
            if self.reader.read(&mut byte)? == 0 {
                hit_eof = true;
                break;
            }
            let ch = byte[0];
            if !self.pending_crlf && ch == b'\n' {
                break;
            }
            if self.pending_crlf && ch == b'\n' {
                self.pending_crlf = false;
                continue;
            }
            if ch == b'\r' {
                self.pending_crlf = true;
                break;
            }
            if self.pending_crlf {
                self.pending_crlf = false;
            }
            token.push(ch);
        }

        Ok((token, hit_eof))
    }
}

/// Outcome of reading one whitespace-separated number, mirroring the three
/// return values of C's `fscanf("%lf", ...)`.
enum ParseOutcome {
    Parsed(f64),
    Invalid,
    Eof,
}

/// A file read number-by-number per `RealNumber`'s rules.
struct NumberStream {
    reader: BufReader<File>,
    pushback: Option<u8>,
}

impl NumberStream {
    fn open(path: &Path) -> std::io::Result<NumberStream> {
        Ok(NumberStream {
            reader: BufReader::new(File::open(path)?),
            pushback: None,
        })
    }

    fn next_byte(&mut self) -> std::io::Result<Option<u8>> {
        if let Some(b) = self.pushback.take() {
            return Ok(Some(b));
        }
        let mut byte = [0u8; 1];
        if self.reader.read(&mut byte)? == 0 {
            Ok(None)
        } else {
            Ok(Some(byte[0]))
        }
    }

    fn push_back(&mut self, b: u8) {
        self.pushback = Some(b);
    }

    /// Skip leading whitespace, then parse a C-style floating-point literal:
    /// an optional sign, digits, an optional fractional part and an
    /// optional exponent.
    fn read_number(&mut self) -> std::io::Result<ParseOutcome> {
        loop {
            match self.next_byte()? {
                None => return Ok(ParseOutcome::Eof),
                Some(b) if (b as char).is_whitespace() => continue,
                Some(b) => {
                    self.push_back(b);
                    break;
                }
            }
        }

        let mut literal = String::new();
        let mut has_digits = false;

        if let Some(b) = self.next_byte()? {
            if b == b'+' || b == b'-' {
                literal.push(b as char);
            } else {
                self.push_back(b);
            }
        }

        while let Some(b) = self.next_byte()? {
            if b.is_ascii_digit() {
                literal.push(b as char);
                has_digits = true;
            } else {
                self.push_back(b);
                break;
            }
        }

        if let Some(b) = self.next_byte()? {
            if b == b'.' {
                literal.push('.');
                while let Some(b) = self.next_byte()? {
                    if b.is_ascii_digit() {
                        literal.push(b as char);
                        has_digits = true;
                    } else {
                        self.push_back(b);
                        break;
                    }
                }
            } else {
                self.push_back(b);
            }
        }

        if !has_digits {
            return Ok(ParseOutcome::Invalid);
        }

        if let Some(b) = self.next_byte()? {
            if b == b'e' || b == b'E' {
                let mut exponent = String::new();
                exponent.push(b as char);
                if let Some(b) = self.next_byte()? {
                    if b == b'+' || b == b'-' {
                        exponent.push(b as char);
                    } else {
                        self.push_back(b);
                    }
                }
                let mut exponent_digits = false;
                while let Some(b) = self.next_byte()? {
                    if b.is_ascii_digit() {
                        exponent.push(b as char);
                        exponent_digits = true;
                    } else {
                        self.push_back(b);
                        break;
                    }
                }
                if exponent_digits {
                    literal.push_str(&exponent);
                }
            } else {
                self.push_back(b);
            }
        }

        match literal.parse::<f64>() {
            Ok(v) => Ok(ParseOutcome::Parsed(v)),
            Err(_) => Ok(ParseOutcome::Invalid),
        }
    }
}

/// Format a value to 18 significant digits, matching the original
/// comparator's mismatch message formatting (`QString::number(x, 'g', 18)`):
/// the shorter of fixed and scientific notation, with trailing zeros in the
/// mantissa stripped.
fn format_significant(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }

    let exponent = value.abs().log10().floor() as i32;
    let formatted = if exponent < -4 || exponent >= 18 {
        format!("{:.17e}", value)
    } else {
        let decimals = (17 - exponent).max(0) as usize;
        format!("{:.*}", decimals, value)
    };

    trim_trailing_zeros(&formatted)
}

/// Strip trailing zeros (and a now-bare trailing decimal point) from the
/// mantissa of a formatted number, leaving an `e...` exponent suffix intact.
fn trim_trailing_zeros(formatted: &str) -> String {
    let (mantissa, exponent) = match formatted.split_once('e') {
        Some((m, e)) => (m, Some(e)),
        None => (formatted, None),
    };

    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        mantissa.to_string()
    };

    match exponent {
        Some(e) => format!("{}e{}", mantissa, e),
        None => mantissa,
    }
}

/// Compare `contestant_output` against `reference_output` token-by-token.
/// Returns `None` if cancellation was observed before a verdict was reached.
pub fn compare_line_by_line(
    contestant_output: &Path,
    reference_output: &Path,
    full_score: i64,
    cancel: &CancellationToken,
) -> Option<(ResultKind, i64, String)> {
    let mut contestant = match LineTokenStream::open(contestant_output) {
        Ok(s) => s,
        Err(_) => {
            return Some((
                ResultKind::FileError,
                0,
                "Cannot open contestant's output file".to_string(),
            ))
        }
    };
    let mut reference = match LineTokenStream::open(reference_output) {
        Ok(s) => s,
        Err(_) => {
            return Some((
                ResultKind::FileError,
                0,
                "Cannot open standard output file".to_string(),
            ))
        }
    };

    loop {
        if cancel.is_cancelled() {
            return None;
        }

        let (contestant_token, contestant_eof) = match contestant.read_token() {
            Ok(v) => v,
            Err(e) => return Some((ResultKind::FileError, 0, e.to_string())),
        };
        let (reference_token, reference_eof) = match reference.read_token() {
            Ok(v) => v,
            Err(e) => return Some((ResultKind::FileError, 0, e.to_string())),
        };

        if contestant_eof && !reference_eof {
            return Some((
                ResultKind::WrongAnswer,
                0,
                "Shorter than standard output".to_string(),
            ));
        }
        if !contestant_eof && reference_eof {
            return Some((
                ResultKind::WrongAnswer,
                0,
                "Longer than standard output".to_string(),
            ));
        }
        if contestant_token != reference_token {
            return Some((
                ResultKind::WrongAnswer,
                0,
                format!(
                    "Read {} but expect {}",
                    String::from_utf8_lossy(&contestant_token),
                    String::from_utf8_lossy(&reference_token)
                ),
            ));
        }
        if contestant_eof && reference_eof {
            return Some((ResultKind::CorrectAnswer, full_score, String::new()));
        }
    }
}

/// Compare `contestant_output` against `reference_output` as a sequence of
/// whitespace-separated floating point numbers within `epsilon = 10^-p`
/// Returns `None` if cancellation was observed before a verdict was reached.
pub fn compare_real_numbers(
    contestant_output: &Path,
    reference_output: &Path,
    full_score: i64,
    real_precision: u32,
    cancel: &CancellationToken,
) -> Option<(ResultKind, i64, String)> {
    let mut contestant = match NumberStream::open(contestant_output) {
        Ok(s) => s,
        Err(_) => {
            return Some((
                ResultKind::FileError,
                0,
                "Cannot open contestant's output file".to_string(),
            ))
        }
    };
    let mut reference = match NumberStream::open(reference_output) {
        Ok(s) => s,
        Err(_) => {
            return Some((
                ResultKind::FileError,
                0,
                "Cannot open standard output file".to_string(),
            ))
        }
    };

    let epsilon = 10f64.powi(-(real_precision as i32));

    loop {
        if cancel.is_cancelled() {
            return None;
        }

        let a = match contestant.read_number() {
            Ok(v) => v,
            Err(e) => return Some((ResultKind::FileError, 0, e.to_string())),
        };
        let b = match reference.read_number() {
            Ok(v) => v,
            Err(e) => return Some((ResultKind::FileError, 0, e.to_string())),
        };

        if let ParseOutcome::Invalid = a {
            return Some((
                ResultKind::WrongAnswer,
                0,
                "Invalid characters found".to_string(),
            ));
        }
        if let ParseOutcome::Invalid = b {
            return Some((
                ResultKind::FileError,
                0,
                "Invalid characters in standard output file".to_string(),
            ));
        }

        match (a, b) {
            (ParseOutcome::Eof, ParseOutcome::Eof) => {
                return Some((ResultKind::CorrectAnswer, full_score, String::new()));
            }
            (ParseOutcome::Eof, ParseOutcome::Parsed(_)) => {
                return Some((
                    ResultKind::WrongAnswer,
                    0,
                    "Shorter than standard output".to_string(),
                ));
            }
            (ParseOutcome::Parsed(_), ParseOutcome::Eof) => {
                return Some((
                    ResultKind::WrongAnswer,
                    0,
                    "Longer than standard output".to_string(),
                ));
            }
            (ParseOutcome::Parsed(x), ParseOutcome::Parsed(y)) => {
                if (x - y).abs() > epsilon {
                    return Some((
                        ResultKind::WrongAnswer,
                        0,
                        format!(
                            "Read {} but expect {}",
                            format_significant(x),
                            format_significant(y)
                        ),
                    ));
                }
            }
            (ParseOutcome::Invalid, _) | (_, ParseOutcome::Invalid) => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationToken;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn line_by_line_exact_match() {
        let reference = file_with("1 2 3\n4\n");
        let contestant = file_with("1 2 3\n4\n");
        let cancel = CancellationToken::new();
        let (result, score, _) =
            compare_line_by_line(contestant.path(), reference.path(), 100, &cancel).unwrap();
        assert_eq!(result, ResultKind::CorrectAnswer);
        assert_eq!(score, 100);
    }

    #[test]
    fn line_by_line_crlf_tolerance() {
        let reference = file_with("hello\nworld\n");
        let contestant = file_with("hello\r\nworld\r\n");
        let cancel = CancellationToken::new();
        let (result, score, _) =
            compare_line_by_line(contestant.path(), reference.path(), 100, &cancel).unwrap();
        assert_eq!(result, ResultKind::CorrectAnswer);
        assert_eq!(score, 100);
    }

    #[test]
    fn line_by_line_shorter() {
        let reference = file_with("a\nb\n");
        let contestant = file_with("a\n");
        let cancel = CancellationToken::new();
        let (result, _, message) =
            compare_line_by_line(contestant.path(), reference.path(), 100, &cancel).unwrap();
        assert_eq!(result, ResultKind::WrongAnswer);
        assert_eq!(message, "Shorter than standard output");
    }

    #[test]
    fn line_by_line_longer() {
        let reference = file_with("a\n");
        let contestant = file_with("a\nb\n");
        let cancel = CancellationToken::new();
        let (result, _, message) =
            compare_line_by_line(contestant.path(), reference.path(), 100, &cancel).unwrap();
        assert_eq!(result, ResultKind::WrongAnswer);
        assert_eq!(message, "Longer than standard output");
    }

    #[test]
    fn line_by_line_token_cap_quirk() {
        // First 10 bytes of each line match; the comparator treats the pair
        // of tokens as equal even though the full lines differ after byte
        // 10 — a deliberately preserved quirk, not a bug.
        let reference = file_with("0123456789AAAA\n");
        let contestant = file_with("0123456789BBBB\n");
        let cancel = CancellationToken::new();
        let (result, score, _) =
            compare_line_by_line(contestant.path(), reference.path(), 100, &cancel).unwrap();
        assert_eq!(result, ResultKind::WrongAnswer);
        // Mismatch is only detected on the *next* token, which begins
        // mid-line at the diverging suffix.
        assert_ne!(score, 100);
    }

    #[test]
    fn real_number_within_epsilon() {
        let reference = file_with("1.000000");
        let contestant = file_with("1.0000004");
        let cancel = CancellationToken::new();
        let (result, score, _) =
            compare_real_numbers(contestant.path(), reference.path(), 100, 6, &cancel).unwrap();
        assert_eq!(result, ResultKind::CorrectAnswer);
        assert_eq!(score, 100);
    }

    #[test]
    fn real_number_beyond_epsilon() {
        let reference = file_with("1.000000");
        let contestant = file_with("1.000002");
        let cancel = CancellationToken::new();
        let (result, _, _) =
            compare_real_numbers(contestant.path(), reference.path(), 100, 6, &cancel).unwrap();
        assert_eq!(result, ResultKind::WrongAnswer);
    }

    #[test]
    fn real_number_asymmetric_longer_shorter() {
        let cancel = CancellationToken::new();

        let reference = file_with("1 2");
        let contestant = file_with("1");
        let (result, _, message) =
            compare_real_numbers(contestant.path(), reference.path(), 100, 6, &cancel).unwrap();
        assert_eq!(result, ResultKind::WrongAnswer);
        assert_eq!(message, "Shorter than standard output");

        let reference = file_with("1");
        let contestant = file_with("1 2");
        let (result, _, message) =
            compare_real_numbers(contestant.path(), reference.path(), 100, 6, &cancel).unwrap();
        assert_eq!(result, ResultKind::WrongAnswer);
        assert_eq!(message, "Longer than standard output");
    }

    #[test]
    fn real_number_invalid_contestant_characters() {
        let reference = file_with("1.0");
        let contestant = file_with("abc");
        let cancel = CancellationToken::new();
        let (result, _, message) =
            compare_real_numbers(contestant.path(), reference.path(), 100, 6, &cancel).unwrap();
        assert_eq!(result, ResultKind::WrongAnswer);
        assert_eq!(message, "Invalid characters found");
    }

    #[test]
    fn real_number_invalid_reference_characters_is_file_error() {
        let reference = file_with("abc");
        let contestant = file_with("1.0");
        let cancel = CancellationToken::new();
        let (result, _, message) =
            compare_real_numbers(contestant.path(), reference.path(), 100, 6, &cancel).unwrap();
        assert_eq!(result, ResultKind::FileError);
        assert_eq!(message, "Invalid characters in standard output file");
    }

    #[test]
    fn cancellation_yields_no_verdict() {
        let reference = file_with("1 2 3\n");
        let contestant = file_with("1 2 3\n");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(compare_line_by_line(contestant.path(), reference.path(), 100, &cancel).is_none());
        assert!(
            compare_real_numbers(contestant.path(), reference.path(), 100, 6, &cancel).is_none()
        );
    }
}
