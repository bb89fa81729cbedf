use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum StatError {
    #[error("usage: {0}")]
    Usage(String),
    #[error("cannot read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("cannot map {path}: {source}")]
    Map { path: PathBuf, source: io::Error },
    #[error("shared result block: {0}")]
    SharedMemory(io::Error),
    #[error("process-shared lock setup failed in {call}: errno {errno}")]
    LockSetup { call: &'static str, errno: i32 },
    #[error("failed to spawn worker: {0}")]
    Spawn(io::Error),
    #[error("worker for slice {index} panicked")]
    WorkerPanicked { index: usize },
    #[error("cannot partition empty input")]
    EmptyInput,
    #[error("worker count must be at least 1")]
    NoWorkers,
}

impl StatError {
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            StatError::Usage(_) | StatError::Io { .. } | StatError::Map { .. } => 2,
            StatError::EmptyInput | StatError::NoWorkers => 2,
            StatError::SharedMemory(_)
            | StatError::LockSetup { .. }
            | StatError::Spawn(_)
            | StatError::WorkerPanicked { .. } => 1,
        }
    }
}
