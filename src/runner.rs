//! External command execution with a time limit

use reconcile::{CommandOutput, CommandRunner};
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs commands on this host, killing any that outlive the timeout
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &str, args: &[&str]) -> io::Result<CommandOutput> {
        log::debug!("Running: {} {}", cmd, args.join(" "));

        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Pipes are drained concurrently; a full pipe would stall the child
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                log::warn!("{} killed after {:?}", cmd, self.timeout);
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("{cmd} did not finish within {:?}", self.timeout),
                ));
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(CommandOutput {
            stdout: collect(stdout),
            stderr: collect(stderr),
            success: status.success(),
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Scripted runner for tests: canned output per command line, every call recorded
#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct ScriptedRunner {
        responses: Mutex<HashMap<String, io::Result<CommandOutput>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        fn set(&self, line: &str, response: io::Result<CommandOutput>) {
            self.responses
                .lock()
                .unwrap()
                .insert(line.to_string(), response);
        }

        /// Succeed with `stdout` when `line` is run
        pub fn respond(&self, line: &str, stdout: &str) {
            self.set(
                line,
                Ok(CommandOutput {
                    stdout: stdout.as_bytes().to_vec(),
                    stderr: Vec::new(),
                    success: true,
                }),
            );
        }

        /// Exit non-zero with `stderr` when `line` is run
        pub fn fail(&self, line: &str, stderr: &str) {
            self.set(
                line,
                Ok(CommandOutput {
                    stdout: Vec::new(),
                    stderr: stderr.as_bytes().to_vec(),
                    success: false,
                }),
            );
        }

        /// Fail to run at all with `kind`
        pub fn error(&self, line: &str, kind: io::ErrorKind) {
            self.set(line, Err(io::Error::from(kind)));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, cmd: &str, args: &[&str]) -> io::Result<CommandOutput> {
            let line = std::iter::once(cmd)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().unwrap().push(line.clone());
            match self.responses.lock().unwrap().get(&line) {
                Some(Ok(output)) => Ok(output.clone()),
                Some(Err(e)) => Err(io::Error::from(e.kind())),
                None => Ok(CommandOutput {
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    success: true,
                }),
            }
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
    }
}
