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

//! Chunked uploads and verified downloads.

mod download;
mod upload;

pub(crate) use download::download_file;
pub(crate) use upload::{UploadOptions, upload_file};

use crate::types::ProgressSink;

/// Size of the pieces a download body is written and hashed in.
pub const DOWNLOAD_CHUNK_SIZE: usize = 8 * 1024;

fn report(progress: Option<&dyn ProgressSink>, completed: u64) {
    if let Some(progress) = progress {
        progress.set_completed(completed);
    }
}

/// Mark a transfer complete: the sink's declared total, or `size` when it
/// declares none.
fn report_done(progress: Option<&dyn ProgressSink>, size: u64) {
    if let Some(progress) = progress {
        let total = progress.total();
        progress.set_completed(if total == 0 { size } else { total });
    }
}
