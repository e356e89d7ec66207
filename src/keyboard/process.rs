use anyhow::{Context, Result};
use std::{
    ffi::OsStr,
    process::{Child, Command, Stdio},
    thread,
    time::Duration,
};
use sysinfo::{ProcessesToUpdate, System};

use super::KeyboardError;
use crate::{log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;

/// Launch attempts before giving up: the first try plus one retry.
const LAUNCH_ATTEMPTS: u32 = 2;

/// The on-screen keyboard program as seen from the outside.
pub trait KeyboardProcess {
    fn is_running(&mut self) -> bool;

    /// Starts the program without waiting for it to appear.
    fn spawn(&mut self) -> Result<()>;

    /// Stops the program. Returns whether anything was stopped.
    fn close(&mut self) -> Result<bool>;
}

/// Makes sure the keyboard is up, launching it if needed. A failed launch is
/// retried once, loudly, then reported as [`KeyboardError::Launch`].
pub fn ensure_running(process: &mut dyn KeyboardProcess, wait: Duration) -> Result<()> {
    if process.is_running() {
        return Ok(());
    }

    let mut last_failure = String::from("process not detected after launch");
    for attempt in 1..=LAUNCH_ATTEMPTS {
        if attempt > 1 {
            log_warn!("keyboard launch attempt {attempt}/{LAUNCH_ATTEMPTS}");
        } else {
            log_info!("launching on-screen keyboard");
        }

        match process.spawn() {
            Ok(()) => {
                thread::sleep(wait);
                if process.is_running() {
                    log_info!("on-screen keyboard running");
                    return Ok(());
                }
                last_failure = String::from("process not detected after launch");
            }
            Err(err) => last_failure = format!("{err:#}"),
        }
    }

    log_error!("on-screen keyboard failed to start: {last_failure}");
    Err(KeyboardError::Launch(last_failure).into())
}

/// The real program, found through the system process table.
pub struct SystemKeyboardProcess {
    program: String,
    process_name: String,
    system: System,
    child: Option<Child>,
}

impl SystemKeyboardProcess {
    pub fn new(program: impl Into<String>, process_name: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            process_name: process_name.into(),
            system: System::new(),
            child: None,
        }
    }

    fn matches(&self, name: &OsStr) -> bool {
        name.to_string_lossy()
            .eq_ignore_ascii_case(&self.process_name)
    }
}

impl KeyboardProcess for SystemKeyboardProcess {
    fn is_running(&mut self) -> bool {
        self.system.refresh_processes(ProcessesToUpdate::All);
        self.system.processes().values().any(|process| {
            let name: &OsStr = process.name().as_ref();
            self.matches(name)
        })
    }

    fn spawn(&mut self) -> Result<()> {
        let child = Command::new(&self.program)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;
        self.child = Some(child);
        Ok(())
    }

    fn close(&mut self) -> Result<bool> {
        if let Some(mut child) = self.child.take() {
            child.kill().context("failed to stop on-screen keyboard")?;
            let _ = child.wait();
            log_info!("on-screen keyboard closed");
            return Ok(true);
        }

        self.system.refresh_processes(ProcessesToUpdate::All);
        let mut closed = false;
        for process in self.system.processes().values() {
            let name: &OsStr = process.name().as_ref();
            if self.matches(name) {
                closed |= process.kill();
            }
        }
        if closed {
            log_info!("on-screen keyboard closed");
        }
        Ok(closed)
    }
}
