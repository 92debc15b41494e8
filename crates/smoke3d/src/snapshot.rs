//! Grid snapshots on disk.
//!
//! One file per grid and frame: `<root>/<set>/<name>_<frame:04>.<ext>`.
//! Writes go to a temporary sibling that is renamed into place, so a crash
//! never leaves a half-written snapshot under the final name. Loads read and
//! check every grid of the set before touching the simulation.

use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::store::{GridAccess, GridRole, GridSet};

/// Encoding of snapshot files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotFormat {
    Json,
    JsonGz,
    /// Fixed header followed by native-endian `f32` values
    #[default]
    Raw,
}

impl SnapshotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Json => "json",
            SnapshotFormat::JsonGz => "json.gz",
            SnapshotFormat::Raw => "raw",
        }
    }
}

impl FromStr for SnapshotFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(SnapshotFormat::Json),
            "json.gz" | "json_gz" | "gz" => Ok(SnapshotFormat::JsonGz),
            "raw" => Ok(SnapshotFormat::Raw),
            other => Err(format!("unknown snapshot format '{}'", other)),
        }
    }
}

impl fmt::Display for SnapshotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Persists grid sets frame by frame.
pub trait SnapshotIo {
    /// Write every grid of `table` for `frame`.
    fn save(
        &self,
        set: GridSet,
        frame: u32,
        format: SnapshotFormat,
        grids: &dyn GridAccess,
        table: &[(&'static str, GridRole)],
    ) -> Result<(), SnapshotError>;

    /// Read every grid of `table` for `frame`. On error `grids` is unchanged.
    fn load(
        &self,
        set: GridSet,
        frame: u32,
        format: SnapshotFormat,
        grids: &mut dyn GridAccess,
        table: &[(&'static str, GridRole)],
    ) -> Result<(), SnapshotError>;
}

#[derive(Serialize, Deserialize)]
struct JsonGrid {
    name: String,
    frame: u32,
    values: Vec<f32>,
}

const RAW_MAGIC: [u8; 4] = *b"SMK1";

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct RawHeader {
    magic: [u8; 4],
    frame: u32,
    len: u64,
}

const RAW_HEADER_SIZE: usize = std::mem::size_of::<RawHeader>();

/// Snapshot files under one cache directory.
#[derive(Clone, Debug)]
pub struct FileSnapshotStore {
    root: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn set_dir(&self, set: GridSet) -> PathBuf {
        self.root.join(set.dir_name())
    }

    pub fn path(&self, set: GridSet, name: &str, frame: u32, format: SnapshotFormat) -> PathBuf {
        self.set_dir(set)
            .join(format!("{}_{:04}.{}", name, frame, format.extension()))
    }

    /// True when every grid of `table` exists for `frame`.
    pub fn has_frame(
        &self,
        set: GridSet,
        frame: u32,
        format: SnapshotFormat,
        table: &[(&'static str, GridRole)],
    ) -> bool {
        table
            .iter()
            .all(|(name, _)| self.path(set, name, frame, format).is_file())
    }

    /// Delete every file of one set.
    pub fn clear(&self, set: GridSet) -> Result<(), SnapshotError> {
        let dir = self.set_dir(set);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|source| SnapshotError::Io { path: dir, source })?;
        }
        Ok(())
    }

    fn encode(&self, path: &Path, name: &str, frame: u32, values: Vec<f32>, format: SnapshotFormat) -> Result<Vec<u8>, SnapshotError> {
        let codec = |message: String| SnapshotError::Codec {
            path: path.to_path_buf(),
            message,
        };
        match format {
            SnapshotFormat::Json | SnapshotFormat::JsonGz => {
                let grid = JsonGrid {
                    name: name.to_string(),
                    frame,
                    values,
                };
                let json = serde_json::to_vec(&grid).map_err(|e| codec(e.to_string()))?;
                if format == SnapshotFormat::Json {
                    return Ok(json);
                }
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&json).map_err(|e| codec(e.to_string()))?;
                encoder.finish().map_err(|e| codec(e.to_string()))
            }
            SnapshotFormat::Raw => {
                let header = RawHeader {
                    magic: RAW_MAGIC,
                    frame,
                    len: values.len() as u64,
                };
                let mut bytes = Vec::with_capacity(RAW_HEADER_SIZE + values.len() * 4);
                bytes.extend_from_slice(bytemuck::bytes_of(&header));
                bytes.extend_from_slice(bytemuck::cast_slice(&values));
                Ok(bytes)
            }
        }
    }

    fn decode(&self, path: &Path, bytes: &[u8], frame: u32, format: SnapshotFormat) -> Result<Vec<f32>, SnapshotError> {
        let codec = |message: String| SnapshotError::Codec {
            path: path.to_path_buf(),
            message,
        };
        let (file_frame, values) = match format {
            SnapshotFormat::Json | SnapshotFormat::JsonGz => {
                let mut unpacked = Vec::new();
                let json = if format == SnapshotFormat::JsonGz {
                    GzDecoder::new(bytes)
                        .read_to_end(&mut unpacked)
                        .map_err(|e| codec(e.to_string()))?;
                    unpacked.as_slice()
                } else {
                    bytes
                };
                let grid: JsonGrid = serde_json::from_slice(json).map_err(|e| codec(e.to_string()))?;
                (grid.frame, grid.values)
            }
            SnapshotFormat::Raw => {
                if bytes.len() < RAW_HEADER_SIZE {
                    return Err(codec(format!("truncated header ({} bytes)", bytes.len())));
                }
                let header: RawHeader = bytemuck::pod_read_unaligned(&bytes[..RAW_HEADER_SIZE]);
                if header.magic != RAW_MAGIC {
                    return Err(codec("not a raw smoke grid".to_string()));
                }
                let payload = &bytes[RAW_HEADER_SIZE..];
                if payload.len() as u64 != header.len * 4 {
                    return Err(codec(format!(
                        "header promises {} values, payload holds {} bytes",
                        header.len,
                        payload.len()
                    )));
                }
                let values = payload
                    .chunks_exact(4)
                    .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                (header.frame, values)
            }
        };
        if file_frame != frame {
            return Err(codec(format!("file holds frame {}, expected {}", file_frame, frame)));
        }
        Ok(values)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    let io_err = |source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

impl SnapshotIo for FileSnapshotStore {
    fn save(
        &self,
        set: GridSet,
        frame: u32,
        format: SnapshotFormat,
        grids: &dyn GridAccess,
        table: &[(&'static str, GridRole)],
    ) -> Result<(), SnapshotError> {
        for &(name, role) in table {
            let values = grids
                .export(role)
                .ok_or_else(|| SnapshotError::UnknownGrid(name.to_string()))?;
            let path = self.path(set, name, frame, format);
            let bytes = self.encode(&path, name, frame, values, format)?;
            write_atomic(&path, &bytes)?;
        }
        log::debug!("saved {} grids of {} frame {}", table.len(), set.dir_name(), frame);
        Ok(())
    }

    fn load(
        &self,
        set: GridSet,
        frame: u32,
        format: SnapshotFormat,
        grids: &mut dyn GridAccess,
        table: &[(&'static str, GridRole)],
    ) -> Result<(), SnapshotError> {
        // Read and check everything first
        let mut loaded = Vec::with_capacity(table.len());
        for &(name, role) in table {
            let path = self.path(set, name, frame, format);
            if !path.is_file() {
                return Err(SnapshotError::MissingGrid {
                    frame,
                    name: name.to_string(),
                });
            }
            let bytes = fs::read(&path).map_err(|source| SnapshotError::Io {
                path: path.clone(),
                source,
            })?;
            let values = self.decode(&path, &bytes, frame, format)?;
            let expected = grids
                .expected_len(role)
                .ok_or_else(|| SnapshotError::UnknownGrid(name.to_string()))?;
            if values.len() != expected {
                return Err(SnapshotError::ShapeMismatch {
                    name: name.to_string(),
                    got: values.len(),
                    expected,
                });
            }
            loaded.push((name, role, values));
        }

        for (name, role, values) in loaded {
            grids.import(name, role, &values)?;
        }
        log::debug!("loaded {} grids of {} frame {}", table.len(), set.dir_name(), frame);
        Ok(())
    }
}
