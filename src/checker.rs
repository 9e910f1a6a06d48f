//! Checker protocol
//!
//! Checkers are testlib.h programs run as `<checker> <input> <output> <answer>`.
//! Their exit code carries the verdict and their stderr carries the message,
//! which the judger redirects to the `.log` file.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use tracing::warn;

use crate::core::Verdict;

/// Bytes of the checker log shown when a test fails
pub const DEFAULT_LOG_PREVIEW: usize = 256;

/// testlib.h exit codes
/// Reference: https://github.com/MikeMirzayanov/testlib
pub mod testlib_exit_codes {
    pub const OK: i32 = 0; // _ok
    pub const WRONG_ANSWER: i32 = 1; // _wa
    pub const PRESENTATION_ERROR: i32 = 2; // _pe
    pub const FAIL: i32 = 3; // _fail (checker bug or internal error)
    pub const DIRT: i32 = 4; // _dirt (extra output in user file)
    pub const POINTS: i32 = 5; // _points
    pub const UNEXPECTED_EOF: i32 = 8; // _unexpected_eof
}

/// Convert a checker exit code to a verdict
pub fn checker_verdict(exit_code: i32) -> Verdict {
    use self::testlib_exit_codes::*;

    match exit_code {
        OK => Verdict::Accepted,
        WRONG_ANSWER | PRESENTATION_ERROR | DIRT | UNEXPECTED_EOF => Verdict::WrongAnswer,
        FAIL => Verdict::CheckerError,
        // No partial scoring in a stress test
        POINTS => Verdict::WrongAnswer,
        _ => {
            warn!("Unknown checker exit code: {}", exit_code);
            Verdict::WrongAnswer
        }
    }
}

/// Read at most `limit` bytes of the checker log, appending "..." if the log
/// is longer. A missing log reads as empty.
pub fn read_log_preview(path: &Path, limit: usize) -> io::Result<String> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(e),
    };

    let mut buf = Vec::with_capacity(limit + 1);
    file.take(limit as u64 + 1).read_to_end(&mut buf)?;

    let truncated = buf.len() > limit;
    buf.truncate(limit);
    let mut preview = String::from_utf8_lossy(&buf).into_owned();
    if truncated {
        preview.push_str("...");
    }
    Ok(preview)
}
