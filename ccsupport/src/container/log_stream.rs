//! Log streaming from chaincode stdout/stderr to the broker's tracing system.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;

/// Log level for subprocess output streams.
#[derive(Debug, Clone, Copy)]
enum LogLevel {
    Debug,
    Warn,
}

/// Owns the reader tasks that forward a chaincode's output.
///
/// stdout lines are logged at debug, stderr lines at warn, both tagged with
/// the chaincode key. The tasks end when the pipes close.
pub(super) struct LogStreamHandler {
    stdout_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl LogStreamHandler {
    pub(super) fn new(stdout: Option<ChildStdout>, stderr: Option<ChildStderr>, chaincode: &str) -> Self {
        Self {
            stdout_task: stdout
                .map(|pipe| Self::spawn_reader(pipe, chaincode.to_string(), LogLevel::Debug)),
            stderr_task: stderr
                .map(|pipe| Self::spawn_reader(pipe, chaincode.to_string(), LogLevel::Warn)),
        }
    }

    /// Strips ANSI escape codes from a line.
    ///
    /// Chaincode logs may carry color codes from their own formatter.
    fn strip_ansi_codes(text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut chars = text.chars();

        while let Some(c) = chars.next() {
            if c == '\x1b' {
                if chars.next() == Some('[') {
                    for next_char in chars.by_ref() {
                        if next_char == 'm' {
                            break;
                        }
                    }
                }
            } else {
                result.push(c);
            }
        }

        result
    }

    fn spawn_reader<R>(pipe: R, chaincode: String, level: LogLevel) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = Self::strip_ansi_codes(&line);
                        match level {
                            LogLevel::Debug => {
                                tracing::debug!(target: "chaincode:stdout", chaincode = %chaincode, "{}", line);
                            }
                            LogLevel::Warn => {
                                tracing::warn!(target: "chaincode:stderr", chaincode = %chaincode, "{}", line);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(chaincode = %chaincode, "Failed to read chaincode output: {}", e);
                        break;
                    }
                }
            }
            tracing::trace!(chaincode = %chaincode, level = ?level, "Output pipe closed");
        })
    }

    /// Wait for both readers to drain. Call after the process exited.
    pub(super) async fn shutdown(mut self) {
        for task in [self.stdout_task.take(), self.stderr_task.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = task.await {
                tracing::warn!("chaincode output reader failed: {}", e);
            }
        }
    }
}

impl Drop for LogStreamHandler {
    fn drop(&mut self) {
        for task in [self.stdout_task.take(), self.stderr_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_codes() {
        let colored = "\x1b[32mINFO\x1b[0m chaincode started";
        assert_eq!(
            LogStreamHandler::strip_ansi_codes(colored),
            "INFO chaincode started"
        );
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(LogStreamHandler::strip_ansi_codes("ready"), "ready");
    }
}
