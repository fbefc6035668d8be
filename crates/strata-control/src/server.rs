//! Request loop over a line-oriented byte stream.

use std::io::{self, BufRead, Write};

use crate::protocol::{handle, Request, Response};
use crate::EmulatorControl;

/// Counters reported when the input stream ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeStats {
    pub requests: u64,
    pub malformed: u64,
}

/// Answer one JSON request per input line until EOF. Blank lines are skipped;
/// a line that does not parse gets an `error` response and the loop goes on.
pub fn serve<C, R, W>(control: &mut C, input: R, mut output: W) -> io::Result<ServeStats>
where
    C: EmulatorControl + ?Sized,
    R: BufRead,
    W: Write,
{
    let mut stats = ServeStats::default();
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.requests += 1;
        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                tracing::debug!(?request, "control request");
                handle(control, request)
            }
            Err(err) => {
                stats.malformed += 1;
                tracing::warn!(%err, "malformed control request");
                Response::Error {
                    message: format!("malformed request: {err}"),
                }
            }
        };
        serde_json::to_writer(&mut output, &response)?;
        output.write_all(b"\n")?;
        output.flush()?;
    }
    Ok(stats)
}
