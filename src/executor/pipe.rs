//! Streaming of child-process output into the log.
//!
//! Customization scripts and package transactions can run for minutes, so
//! their stdout/stderr is forwarded line by line while the child runs
//! instead of being buffered until exit.

use std::io::{BufRead, BufReader, Read};

/// Which pipe a line came from.
#[derive(Clone, Copy)]
pub(super) enum StreamType {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Extracts a human-readable message from a thread panic payload.
pub(super) fn panic_message(err: &(dyn std::any::Any + Send)) -> &str {
    err.downcast_ref::<&str>()
        .copied()
        .or_else(|| err.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

/// Reads a pipe to EOF, logging each line as it arrives.
///
/// stdout goes to INFO and stderr to WARN. Invalid UTF-8 is converted
/// lossily. A read error stops the reader but does not fail the command;
/// success is decided by the exit status alone.
pub(super) fn read_pipe_to_log<R: Read>(pipe: Option<R>, stream_type: StreamType) {
    let Some(pipe) = pipe else {
        tracing::error!(stream = %stream_type, "pipe was not captured, no output will be logged");
        return;
    };

    let mut reader = BufReader::new(pipe);
    let mut line_buf = Vec::new();

    loop {
        line_buf.clear();
        match reader.read_until(b'\n', &mut line_buf) {
            Ok(0) => break,
            Ok(_) => {
                let content = line_buf.strip_suffix(b"\n").unwrap_or(&line_buf);
                log_line(content, stream_type);
            }
            Err(e) => {
                tracing::error!(stream = %stream_type, error = %e, "I/O error, stopping read");
                break;
            }
        }
    }
}

/// Converts one raw line to text, dropping a trailing CR.
fn decode_line(line: &[u8]) -> String {
    String::from_utf8_lossy(line).trim_end_matches('\r').to_string()
}

fn log_line(line: &[u8], stream_type: StreamType) {
    let text = decode_line(line);
    match stream_type {
        StreamType::Stdout => tracing::info!(stream = %stream_type, "{}", text),
        StreamType::Stderr => tracing::warn!(stream = %stream_type, "{}", text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn decode_line_trims_carriage_return() {
        assert_eq!(decode_line(b"installing pkg\r"), "installing pkg");
    }

    #[test]
    fn decode_line_is_lossy() {
        assert_eq!(decode_line(&[0x66, 0xff, 0x6f]), "f\u{fffd}o");
    }

    #[test]
    fn read_pipe_handles_missing_trailing_newline() {
        read_pipe_to_log(Some(Cursor::new(b"a\nb".to_vec())), StreamType::Stdout);
    }

    #[test]
    fn read_pipe_accepts_none() {
        read_pipe_to_log::<Cursor<Vec<u8>>>(None, StreamType::Stderr);
    }

    #[test]
    fn panic_message_variants() {
        let s: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*s), "static");
        let owned: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*owned), "owned");
        let other: Box<dyn std::any::Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(&*other), "unknown panic");
    }
}
