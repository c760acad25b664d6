// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Error taxonomy for the node-side spool

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpoolError {
    /// The spool directory can no longer be written. Fatal for the writer:
    /// sampling acceptance stops until an operator intervenes.
    #[error("write fault on {path}: {source}")]
    WriteFault {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A frame or payload failed validation
    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The writer context has stopped (shutdown or an earlier write fault)
    #[error("spool writer is not accepting samples: {0}")]
    Unavailable(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("state encoding error: {0}")]
    State(#[from] serde_json::Error),
}

impl SpoolError {
    pub fn write_fault(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SpoolError::WriteFault {
            path: path.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SpoolError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_write_fault(&self) -> bool {
        matches!(self, SpoolError::WriteFault { .. })
    }
}

pub type SpoolResult<T> = std::result::Result<T, SpoolError>;
