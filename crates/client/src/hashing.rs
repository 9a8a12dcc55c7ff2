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

//! Content hashing for transfer integrity checks.
//!
//! The digest is SHA-256 over the concatenated SHA-256 digests of consecutive
//! 4 MiB blocks, hex encoded. Bytes are hashed as they pass through, never
//! after full reassembly.

use sha2::{Digest, Sha256};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

pub const HASH_BLOCK_SIZE: usize = 4 * 1024 * 1024;

/// Incremental content hasher.
#[derive(Clone, Default)]
pub struct ContentHasher {
    overall:   Sha256,
    block:     Sha256,
    block_len: usize,
}

impl ContentHasher {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = (HASH_BLOCK_SIZE - self.block_len).min(data.len());
            let (head, tail) = data.split_at(take);
            self.block.update(head);
            self.block_len += take;
            data = tail;

            if self.block_len == HASH_BLOCK_SIZE {
                self.close_block();
            }
        }
    }

    fn close_block(&mut self) {
        let digest = self.block.finalize_reset();
        self.overall.update(digest);
        self.block_len = 0;
    }

    /// Lowercase hex digest of everything fed so far.
    #[must_use]
    pub fn finalize(mut self) -> String {
        if self.block_len > 0 {
            self.close_block();
        }
        format!("{:x}", self.overall.finalize())
    }
}

/// One-shot digest of an in-memory payload.
#[must_use]
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Writer that hashes every chunk before it reaches the inner writer.
pub struct HashingWriter<W: AsyncWrite + Unpin> {
    inner:    BufWriter<W>,
    hasher:   ContentHasher,
    position: u64,
}

impl<W: AsyncWrite + Unpin> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner:    BufWriter::with_capacity(512 * 1024, inner),
            hasher:   ContentHasher::new(),
            position: 0,
        }
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.hasher.update(chunk);
        self.inner.write_all(chunk).await?;
        self.position += chunk.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub const fn position(&self) -> u64 { self.position }

    /// Flush the inner writer and return it with the final digest.
    pub async fn finish(mut self) -> std::io::Result<(W, String)> {
        self.inner.flush().await?;
        Ok((self.inner.into_inner(), self.hasher.finalize()))
    }
}
