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

//! Default-store registry (C8). The per-question synthesis scan itself
//! lives in [`crate::ifr::postprocess`], which needs the chunk buffer and
//! record log alongside this registry's `default_id` set.

use crate::ifr::error::BuilderError;
use crate::ifr::error::Result;
use crate::ifr::error::SourceLoc;

#[derive(Debug, Clone)]
pub struct DefaultStoreRecord {
    pub ref_name: String,
    pub name_string_id: u16,
    pub default_id: u16,
}

#[derive(Default)]
pub struct DefaultStoreDB {
    stores: Vec<DefaultStoreRecord>,
}

impl DefaultStoreDB {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        ref_name: &str,
        name_string_id: u16,
        default_id: u16,
        at: SourceLoc,
    ) -> Result<()> {
        if self.stores.iter().any(|s| s.ref_name == ref_name) {
            return Err(BuilderError::Redefined {
                at,
                what: "default-store",
                name: ref_name.to_string(),
            });
        }
        self.stores.push(DefaultStoreRecord {
            ref_name: ref_name.to_string(),
            name_string_id,
            default_id,
        });
        Ok(())
    }

    /// Every `default_id` active in the compiled form, sorted ascending.
    pub fn active_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.stores.iter().map(|s| s.default_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn count(&self) -> usize {
        self.stores.len()
    }

    pub fn lookup(&self, ref_name: &str) -> Option<&DefaultStoreRecord> {
        self.stores.iter().find(|s| s.ref_name == ref_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLoc {
        SourceLoc { file: "t.vfr".into(), line: 1 }
    }

    #[test]
    fn active_ids_are_deduped_and_sorted() {
        let mut db = DefaultStoreDB::new();
        db.register("standard", 1, 0, loc()).unwrap();
        db.register("mfg", 2, 1, loc()).unwrap();
        db.register("other", 3, 2, loc()).unwrap();
        assert_eq!(db.active_ids(), vec![0, 1, 2]);
    }

    #[test]
    fn duplicate_ref_name_is_rejected() {
        let mut db = DefaultStoreDB::new();
        db.register("standard", 1, 0, loc()).unwrap();
        assert!(db.register("standard", 9, 9, loc()).is_err());
    }
}
