//! Whole-sequence baking into a snapshot cache.
//!
//! Data and noise are baked in separate passes, each with its own cursor
//! file in the cache root. A cursor remembers the last frame that was fully
//! written, so a cancelled bake picks up at the next frame. Cancellation is
//! checked between frames only; a frame in progress always completes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{BakeError, SimError};
use crate::snapshot::{FileSnapshotStore, SnapshotFormat};
use crate::stepper::FrameInputs;
use crate::store::GridSet;
use crate::SmokeSimulation;

/// Shared flag that asks a running bake to stop after the current frame.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation before resuming.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Progress of one bake pass, persisted as JSON.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakeCursor {
    pub last_completed_frame: Option<u32>,
}

impl BakeCursor {
    /// Read a cursor; a missing file means nothing was baked yet.
    pub fn load(path: &Path) -> Result<Self, BakeError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path).map_err(|e| cursor_error(path, e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| cursor_error(path, e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), BakeError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| cursor_error(path, e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| cursor_error(path, e.to_string()))?;
        fs::write(path, json).map_err(|e| cursor_error(path, e.to_string()))
    }
}

fn cursor_error(path: &Path, message: String) -> BakeError {
    BakeError::Cursor {
        path: path.to_path_buf(),
        message,
    }
}

/// How a bake pass ended.
#[derive(Clone, Debug, PartialEq)]
pub enum BakeOutcome {
    Completed { frames: u32, elapsed: Duration },
    /// Stopped by the cancel token; the cursor points at the last written frame
    Cancelled { last_completed_frame: Option<u32> },
}

/// Drives a simulation over a frame range and writes every frame.
#[derive(Clone, Debug)]
pub struct Baker {
    store: FileSnapshotStore,
    format: SnapshotFormat,
    cancel: CancelToken,
}

impl Baker {
    pub fn new(store: FileSnapshotStore, format: SnapshotFormat) -> Self {
        Self {
            store,
            format,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &FileSnapshotStore {
        &self.store
    }

    pub fn cursor_path(&self, set: GridSet) -> PathBuf {
        self.store
            .root()
            .join(format!("cursor_{}.json", set.dir_name()))
    }

    pub fn cursor(&self, set: GridSet) -> Result<BakeCursor, BakeError> {
        BakeCursor::load(&self.cursor_path(set))
    }

    /// Simulate and write base frames `start..=end`, resuming after the
    /// cursor when it lies inside the range.
    pub fn bake_data<F>(
        &self,
        sim: &mut SmokeSimulation,
        start: u32,
        end: u32,
        mut inputs_for: F,
    ) -> Result<BakeOutcome, BakeError>
    where
        F: FnMut(u32) -> FrameInputs,
    {
        let first = self.resume_point(sim, GridSet::Data, start, end)?;
        let began = Instant::now();
        for frame in first..=end {
            if self.cancel.is_cancelled() {
                return self.cancelled(GridSet::Data);
            }
            let inputs = inputs_for(frame);
            sim.advance_base_frame(&inputs)
                .map_err(|source| BakeError::Frame { frame, source })?;
            self.finish_frame(sim, GridSet::Data, frame)?;
        }
        Ok(self.completed(GridSet::Data, first, end, began))
    }

    /// Synthesize noise for frames `start..=end` on top of the data cache.
    pub fn bake_noise<F>(
        &self,
        sim: &mut SmokeSimulation,
        start: u32,
        end: u32,
        mut inputs_for: F,
    ) -> Result<BakeOutcome, BakeError>
    where
        F: FnMut(u32) -> FrameInputs,
    {
        let first = self.resume_point(sim, GridSet::Noise, start, end)?;
        let began = Instant::now();
        for frame in first..=end {
            if self.cancel.is_cancelled() {
                return self.cancelled(GridSet::Noise);
            }
            sim.load_snapshot(&self.store, GridSet::Data, frame, self.format)
                .map_err(|e| frame_error(frame, e.into()))?;
            sim.set_frame(frame);
            let inputs = inputs_for(frame);
            sim.advance_noise_frame(&inputs)
                .map_err(|source| BakeError::Frame { frame, source })?;
            self.finish_frame(sim, GridSet::Noise, frame)?;
        }
        Ok(self.completed(GridSet::Noise, first, end, began))
    }

    /// Delete the data cache and its cursor.
    pub fn free_data(&self) -> Result<(), BakeError> {
        self.free(GridSet::Data)
    }

    /// Delete the noise cache and its cursor.
    pub fn free_noise(&self) -> Result<(), BakeError> {
        self.free(GridSet::Noise)
    }

    fn free(&self, set: GridSet) -> Result<(), BakeError> {
        self.store
            .clear(set)
            .map_err(|e| cursor_error(&self.store.set_dir(set), e.to_string()))?;
        let path = self.cursor_path(set);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| cursor_error(&path, e.to_string()))?;
        }
        log::info!("freed {} cache in {}", set.dir_name(), self.store.root().display());
        Ok(())
    }

    /// First frame to bake, with `sim` restored to the frame before it.
    fn resume_point(
        &self,
        sim: &mut SmokeSimulation,
        set: GridSet,
        start: u32,
        end: u32,
    ) -> Result<u32, BakeError> {
        if start == 0 || start > end {
            return Err(BakeError::InvalidRange { start, end });
        }
        let cursor = self.cursor(set)?;
        match cursor.last_completed_frame {
            Some(last) if last >= start && last <= end => {
                sim.load_snapshot(&self.store, set, last, self.format)
                    .map_err(|e| frame_error(last, e.into()))?;
                sim.set_frame(last);
                log::info!("resuming {} bake after frame {}", set.dir_name(), last);
                Ok(last + 1)
            }
            _ => {
                sim.set_frame(start - 1);
                Ok(start)
            }
        }
    }

    fn finish_frame(&self, sim: &SmokeSimulation, set: GridSet, frame: u32) -> Result<(), BakeError> {
        sim.save_snapshot(&self.store, set, self.format)
            .map_err(|e| frame_error(frame, e.into()))?;
        BakeCursor {
            last_completed_frame: Some(frame),
        }
        .save(&self.cursor_path(set))?;
        log::debug!("{} frame {} written", set.dir_name(), frame);
        Ok(())
    }

    fn cancelled(&self, set: GridSet) -> Result<BakeOutcome, BakeError> {
        let cursor = self.cursor(set)?;
        log::warn!(
            "{} bake cancelled after frame {:?}",
            set.dir_name(),
            cursor.last_completed_frame
        );
        Ok(BakeOutcome::Cancelled {
            last_completed_frame: cursor.last_completed_frame,
        })
    }

    fn completed(&self, set: GridSet, first: u32, end: u32, began: Instant) -> BakeOutcome {
        let frames = (end + 1).saturating_sub(first);
        let elapsed = began.elapsed();
        log::info!(
            "{} bake of {} frames finished in {:.2?}",
            set.dir_name(),
            frames,
            elapsed
        );
        BakeOutcome::Completed { frames, elapsed }
    }
}

fn frame_error(frame: u32, source: SimError) -> BakeError {
    BakeError::Frame { frame, source }
}
