// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{path::PathBuf, time::Duration};

use snafu::Snafu;
use strum_macros::{Display, EnumString, IntoStaticStr};

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of [`Error`] used by retry policies and by callers
/// deciding how to present a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotLinked,
    BadInput,
    Auth,
    DataCorruption,
    NotFound,
    Path,
    Capacity,
    Connection,
    RateLimited,
    Contract,
    Api,
    Io,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("No access token available, the client is not linked"))]
    NotLinked {
        #[snafu(implicit)]
        loc: snafu::Location,
    },

    #[snafu(display("Bad input: {message}"))]
    BadInput {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Authentication failed: {message}"))]
    Auth {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Content hash mismatch for {path}: expected {expected}, got {actual}"))]
    DataCorruption {
        path:     String,
        expected: String,
        actual:   String,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    #[snafu(display("Server rejected upload to {path}: content hash does not match the data"))]
    UploadCorrupted {
        path: String,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("Upload offset mismatch, server expects offset {correct_offset}"))]
    IncorrectOffset {
        correct_offset: u64,
        #[snafu(implicit)]
        loc:            snafu::Location,
    },

    #[snafu(display("Nothing found at {path}"))]
    NotFound {
        path: String,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("Cannot operate on {path}: {message}"))]
    Path {
        path:    String,
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Too many operations in flight: {message}"))]
    TooManyOperations {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Network error: {source}"))]
    Network {
        source: reqwest::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Connection lost: {message}"))]
    Disconnected {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Rate limited by server, retry after {retry_after:?}"))]
    RateLimited {
        retry_after: Option<Duration>,
        #[snafu(implicit)]
        loc:         snafu::Location,
    },

    #[snafu(display("Invalid argument: {message}"))]
    InvalidArgument {
        message: String,
        #[snafu(implicit)]
        loc:     snafu::Location,
    },

    #[snafu(display("Final chunk of {size} bytes exceeds the chunk size of {limit} bytes"))]
    ChunkTooLarge {
        size:  u64,
        limit: u64,
        #[snafu(implicit)]
        loc:   snafu::Location,
    },

    #[snafu(display("API error on {endpoint} (HTTP {status}): {summary}"))]
    Api {
        endpoint: String,
        status:   u16,
        summary:  String,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    #[snafu(display("Invalid JSON exchanged with {endpoint}: {source}"))]
    Json {
        endpoint: String,
        source:   serde_json::Error,
        #[snafu(implicit)]
        loc:      snafu::Location,
    },

    #[snafu(display("Failed to do file operation on {}", path.display()))]
    FileIo {
        source: std::io::Error,
        path:   PathBuf,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

impl Error {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotLinked { .. } => ErrorKind::NotLinked,
            Self::BadInput { .. } => ErrorKind::BadInput,
            Self::Auth { .. } => ErrorKind::Auth,
            // An offset mismatch is repaired by re-sending from the corrected
            // offset, so it shares the transfer retry budget with hash failures.
            Self::DataCorruption { .. }
            | Self::UploadCorrupted { .. }
            | Self::IncorrectOffset { .. } => ErrorKind::DataCorruption,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Path { .. } => ErrorKind::Path,
            Self::TooManyOperations { .. } => ErrorKind::Capacity,
            Self::Network { .. } | Self::Disconnected { .. } => ErrorKind::Connection,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::InvalidArgument { .. } | Self::ChunkTooLarge { .. } => ErrorKind::Contract,
            Self::Api { .. } | Self::Json { .. } => ErrorKind::Api,
            Self::FileIo { .. } => ErrorKind::Io,
        }
    }

    /// Server supplied message, if the failure carries one.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::BadInput { message, .. }
            | Self::Auth { message, .. }
            | Self::Path { message, .. }
            | Self::TooManyOperations { message, .. }
            | Self::Disconnected { message, .. } => Some(message),
            Self::Api { summary, .. } => Some(summary),
            _ => None,
        }
    }

    /// Remote path the failure refers to, when known.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::DataCorruption { path, .. }
            | Self::UploadCorrupted { path, .. }
            | Self::NotFound { path, .. }
            | Self::Path { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Whether a metadata lookup should treat this failure as "nothing there".
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFound | ErrorKind::Path)
    }
}
