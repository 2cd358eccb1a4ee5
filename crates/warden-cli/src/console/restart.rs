use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Marker file left in the working directory by an interrupted restart.
pub const RESTART_FLAG: &str = "tmp_restart";

/// Remove a stale restart marker from `dir`. Returns whether one existed.
pub fn clear_restart_flag(dir: &Path) -> std::io::Result<bool> {
    let flag = dir.join(RESTART_FLAG);
    match std::fs::remove_file(&flag) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// How to launch an identical copy of this process.
#[derive(Debug, Clone)]
pub struct Relaunch {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl Relaunch {
    pub fn current() -> std::io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: std::env::args().skip(1).collect(),
            cwd: std::env::current_dir()?,
        })
    }

    /// Start the copy, sharing this process's terminal.
    pub fn spawn(&self) -> std::io::Result<u32> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;
        Ok(child.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_flag_is_removed_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RESTART_FLAG), "").unwrap();

        assert!(clear_restart_flag(dir.path()).unwrap());
        assert!(!dir.path().join(RESTART_FLAG).exists());
        assert!(!clear_restart_flag(dir.path()).unwrap());
    }

    #[test]
    fn test_current_keeps_arguments() {
        let relaunch = Relaunch::current().unwrap();
        assert!(relaunch.program.is_absolute());
        assert_eq!(relaunch.args, std::env::args().skip(1).collect::<Vec<_>>());
    }
}
