use super::arguments::{LaunchError, LaunchSpec};
use crate::process::{command, kill_tree};
use async_channel::Sender;
use std::io::{BufRead, Read};
use std::process::{Child, ExitStatus, Stdio};

/// A running agent process.
///
/// Both output pipes feed one line channel, in arrival order per pipe.
/// Dropping the handle kills the process tree.
pub struct AgentProcess {
    child: Child,
    generation: u64,
}

impl AgentProcess {
    pub fn spawn(
        spec: &LaunchSpec,
        generation: u64,
        lines: Sender<String>,
    ) -> Result<Self, LaunchError> {
        let mut child = command(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let spawned = spawn_reader("botagent-agent-stdout", stdout, lines.clone())
            .and_then(|()| spawn_reader("botagent-agent-stderr", stderr, lines));
        if let Err(e) = spawned {
            let _ = kill_tree(&mut child);
            return Err(e.into());
        }

        Ok(Self { child, generation })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Exit status, if the process has exited.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Kill the process tree and reap it.
    pub fn kill(&mut self) -> anyhow::Result<()> {
        kill_tree(&mut self.child)
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        if let Err(e) = kill_tree(&mut self.child) {
            log::warn!("Failed to kill agent PID {}: {:#}", self.child.id(), e);
        }
    }
}

fn spawn_reader(
    name: &str,
    pipe: Option<impl Read + Send + 'static>,
    lines: Sender<String>,
) -> std::io::Result<()> {
    let Some(pipe) = pipe else {
        return Ok(());
    };
    std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let mut reader = std::io::BufReader::new(pipe);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                if lines.send_blocking(decode_line(&buf)).is_err() {
                    break;
                }
            }
        })?;
    Ok(())
}

/// Lossy decode of one raw output line, without its line ending.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
