//! Stopping a bake from outside the process.
//!
//! The bake polls for a stop file once per frame; when it shows up the
//! cancel token is set and the bake ends after the frame in progress, with
//! the cursor pointing at the last written frame.

use std::io;
use std::path::{Path, PathBuf};

use smoke3d::CancelToken;

pub struct StopFile {
    path: PathBuf,
    token: CancelToken,
}

impl StopFile {
    /// Watch `path`, removing a stop file left over from an earlier run.
    pub fn arm(path: PathBuf, token: CancelToken) -> io::Result<Self> {
        match std::fs::remove_file(&path) {
            Ok(()) => log::info!("removed stale stop file {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        log::debug!("touch {} to stop the bake", path.display());
        Ok(Self { path, token })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cancel the bake if the stop file exists.
    pub fn poll(&self) {
        if !self.token.is_cancelled() && self.path.exists() {
            log::info!("found {}, stopping after this frame", self.path.display());
            self.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("smoke-bake-{}-{}", tag, std::process::id()))
    }

    #[test]
    fn test_stop_file_cancels_token() {
        let path = temp_path("stop");
        let token = CancelToken::new();
        let stop = StopFile::arm(path.clone(), token.clone()).unwrap();
        stop.poll();
        assert!(!token.is_cancelled());

        std::fs::write(&path, b"").unwrap();
        stop.poll();
        assert!(token.is_cancelled());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_arm_clears_stale_stop_file() {
        let path = temp_path("stale");
        std::fs::write(&path, b"").unwrap();
        let token = CancelToken::new();
        let stop = StopFile::arm(path.clone(), token.clone()).unwrap();
        assert!(!path.exists());
        stop.poll();
        assert!(!token.is_cancelled());
    }
}
