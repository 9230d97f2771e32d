use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::io::Read;
use std::process::{Child, Stdio};
use std::time::{Duration, Instant};

/// Create a [`std::process::Command`] that does **not** flash a console
/// window on Windows and, on Unix, starts its own process group so the whole
/// tree can be killed at once.
pub fn command(program: impl AsRef<OsStr>) -> std::process::Command {
    #![allow(unused_mut)]
    let mut cmd = std::process::Command::new(program);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd
}

/// Kill a child and everything it spawned, then reap it.
///
/// Safe to call on a process that already exited.
pub fn kill_tree(child: &mut Child) -> Result<()> {
    if child.try_wait().context("failed to query process state")?.is_some() {
        return Ok(());
    }

    let pid = child.id();

    #[cfg(windows)]
    {
        let status = command("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = status {
            log::warn!("taskkill for PID {} failed: {}", pid, e);
        }
    }

    #[cfg(unix)]
    {
        // Negative pid targets the process group created in `command`
        let rc = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
        if rc != 0 {
            log::debug!(
                "killpg({}) failed: {}",
                pid,
                std::io::Error::last_os_error()
            );
        }
    }

    if child.try_wait().ok().flatten().is_none() {
        let _ = child.kill();
    }
    child.wait().context("failed to reap killed process")?;
    Ok(())
}

/// Run a command to completion and return its standard output.
///
/// The process is killed if it has not exited within `timeout`.
pub fn probe_output(cmd: &mut std::process::Command, timeout: Duration) -> Result<String> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to spawn probe process")?;

    let mut stdout = child.stdout.take().context("probe stdout not captured")?;
    let reader = std::thread::Builder::new()
        .name("botagent-probe-stdout".into())
        .spawn(move || {
            let mut out = String::new();
            let _ = stdout.read_to_string(&mut out);
            out
        })
        .context("failed to spawn probe reader thread")?;

    let start = Instant::now();
    loop {
        match child.try_wait().context("failed to wait on probe process")? {
            Some(_) => break,
            None => {
                if start.elapsed() > timeout {
                    let _ = kill_tree(&mut child);
                    let _ = reader.join();
                    anyhow::bail!("probe timed out after {}s", timeout.as_secs());
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }

    reader
        .join()
        .map_err(|_| anyhow::anyhow!("probe reader thread panicked"))
}
