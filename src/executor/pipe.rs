//! Forwarding of child process output to the log.

use std::any::Any;
use std::io::{BufRead, BufReader, Read};

use strum::Display;
use tracing::{error, info, warn};

/// Which pipe of the child a forwarder reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub(super) enum OutputStream {
    Stdout,
    Stderr,
}

/// Text carried by a reader thread's panic payload.
pub(super) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Logs every line a child writes, tagged with the command name.
///
/// stdout lines go to INFO and stderr lines to WARN, so long `emerge` and
/// kernel builds show progress while a phase runs. Invalid UTF-8 is replaced
/// lossily. A read error ends forwarding; the exit status alone decides
/// whether the command succeeded.
pub(super) struct LineForwarder {
    command: String,
    stream: OutputStream,
}

impl LineForwarder {
    pub(super) fn new(command: &str, stream: OutputStream) -> Self {
        Self {
            command: command.to_string(),
            stream,
        }
    }

    /// Forwards `pipe` until EOF and returns the number of lines logged.
    pub(super) fn forward<R: Read>(&self, pipe: Option<R>) -> usize {
        let Some(pipe) = pipe else {
            error!(command = %self.command, "child {} was not captured", self.stream);
            return 0;
        };

        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        let mut lines = 0;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    self.emit(&buf);
                    lines += 1;
                }
                Err(e) => {
                    error!(
                        command = %self.command,
                        stream = %self.stream,
                        "read failed, dropping remaining output: {}",
                        e
                    );
                    break;
                }
            }
        }
        lines
    }

    fn emit(&self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches(['\n', '\r']);
        match self.stream {
            OutputStream::Stdout => info!(command = %self.command, "{}", line),
            OutputStream::Stderr => warn!(command = %self.command, "{}", line),
        }
    }
}
