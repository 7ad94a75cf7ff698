// Copyright 2023 Meta Platforms, Inc. and affiliates.
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! String-keyed pending-patch multimap (C9): locations that must receive a
//! value once a forward-referenced symbol (almost always a question id) is
//! later registered.

use std::collections::HashMap;

use log::warn;

use crate::ifr::chunked_buffer::ChunkedBuffer;
use crate::ifr::chunked_buffer::PatchAddr;
use crate::ifr::error::BuilderError;
use crate::ifr::error::Result;
use crate::ifr::error::SourceLoc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Assigned,
}

#[derive(Debug, Clone)]
struct Entry {
    patch_addr: PatchAddr,
    width: usize,
    at: SourceLoc,
    message: String,
    state: State,
}

#[derive(Default)]
pub struct PendingTable {
    by_key: HashMap<String, Vec<Entry>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        key: impl Into<String>,
        patch_addr: PatchAddr,
        width: usize,
        at: SourceLoc,
        message: impl Into<String>,
    ) {
        self.by_key.entry(key.into()).or_default().push(Entry {
            patch_addr,
            width,
            at,
            message: message.into(),
            state: State::Pending,
        });
    }

    /// Patch every still-`Pending` entry keyed by `key` with `value`,
    /// transitioning each to `Assigned`. Returns how many entries were
    /// resolved.
    pub fn resolve(&mut self, buffer: &mut ChunkedBuffer, key: &str, value: &[u8]) -> usize {
        let mut resolved = 0;
        if let Some(entries) = self.by_key.get_mut(key) {
            for entry in entries.iter_mut() {
                if entry.state == State::Pending {
                    buffer.patch(entry.patch_addr, value, entry.width);
                    entry.state = State::Assigned;
                    resolved += 1;
                }
            }
        }
        resolved
    }

    /// Hard error for any entry still `Pending` at end-of-parse.
    pub fn check_all_resolved(&self) -> Result<()> {
        for (key, entries) in &self.by_key {
            for entry in entries {
                if entry.state == State::Pending {
                    return Err(BuilderError::PendingUnassigned {
                        at: entry.at.clone(),
                        key: key.clone(),
                        message: entry.message.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.by_key
            .values()
            .flatten()
            .filter(|e| e.state == State::Pending)
            .count()
    }

    pub fn warn_unresolved(&self) {
        for (key, entries) in &self.by_key {
            for entry in entries {
                if entry.state == State::Pending {
                    warn!("{}: pending reference to {key:?} never resolved: {}", entry.at, entry.message);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLoc {
        SourceLoc { file: "t.vfr".into(), line: 1 }
    }

    #[test]
    fn resolve_patches_matching_pending_entries() {
        let mut buf = ChunkedBuffer::new(64);
        let addr = buf.reserve(2).unwrap();
        let mut table = PendingTable::new();
        table.add("Q1", addr, 2, loc(), "question id for Q1");

        let n = table.resolve(&mut buf, "Q1", &0x10u16.to_le_bytes());
        assert_eq!(n, 1);
        assert_eq!(buf.read(addr, 2), &[0x10, 0x00]);
        assert!(table.check_all_resolved().is_ok());
    }

    #[test]
    fn unresolved_entry_is_reported_as_error() {
        let mut buf = ChunkedBuffer::new(64);
        let addr = buf.reserve(2).unwrap();
        let mut table = PendingTable::new();
        table.add("Q2", addr, 2, loc(), "question id for Q2");
        let _ = &mut buf;
        assert!(table.check_all_resolved().is_err());
    }
}
