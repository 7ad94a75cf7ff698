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

//! Five independent id namespaces (C4), each a compact bitmap with
//! first-fit allocation and id-0 pre-reserved.

use crate::ifr::error::BuilderError;
use crate::ifr::error::Result;
use crate::ifr::error::SourceLoc;

const NAMESPACE_BITS: usize = 0x10000;

pub struct IdPool {
    namespace: &'static str,
    bits: Vec<u64>,
}

impl IdPool {
    pub fn new(namespace: &'static str) -> Self {
        let words = NAMESPACE_BITS / 64;
        let mut bits = vec![0u64; words];
        bits[0] |= 1; // id 0 reserved
        IdPool { namespace, bits }
    }

    fn word_bit(id: u16) -> (usize, u32) {
        ((id as usize) / 64, (id as u32) % 64)
    }

    pub fn is_free(&self, id: u16) -> bool {
        let (w, b) = Self::word_bit(id);
        self.bits[w] & (1 << b) == 0
    }

    pub fn mark_used(&mut self, id: u16, at: SourceLoc) -> Result<()> {
        let (w, b) = Self::word_bit(id);
        if self.bits[w] & (1 << b) != 0 {
            return Err(BuilderError::Redefined {
                at,
                what: self.namespace,
                name: id.to_string(),
            });
        }
        self.bits[w] |= 1 << b;
        Ok(())
    }

    /// Like `mark_used` but does not fail on collision (compatibility mode
    /// allows question-id collisions).
    pub fn mark_used_allow_collision(&mut self, id: u16) {
        let (w, b) = Self::word_bit(id);
        self.bits[w] |= 1 << b;
    }

    pub fn alloc(&mut self, at: SourceLoc) -> Result<u16> {
        for (w, word) in self.bits.iter_mut().enumerate() {
            if *word != u64::MAX {
                let b = word.trailing_ones();
                *word |= 1 << b;
                let id = w * 64 + b as usize;
                if id >= NAMESPACE_BITS {
                    break;
                }
                return Ok(id as u16);
            }
        }
        Err(BuilderError::Exhausted {
            at,
            namespace: self.namespace,
        })
    }

    pub fn free(&mut self, id: u16) {
        let (w, b) = Self::word_bit(id);
        self.bits[w] &= !(1 << b);
    }
}

pub struct IdRegistry {
    pub forms: IdPool,
    pub questions: IdPool,
    pub varstores: IdPool,
    pub default_stores: IdPool,
    pub rules: IdPool,
}

impl IdRegistry {
    pub fn new() -> Self {
        IdRegistry {
            forms: IdPool::new("form"),
            questions: IdPool::new("question"),
            varstores: IdPool::new("varstore"),
            default_stores: IdPool::new("default-store"),
            rules: IdPool::new("rule"),
        }
    }
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn here() -> SourceLoc {
        SourceLoc { file: "t.vfr".into(), line: 1 }
    }

    #[test]
    fn id_zero_is_reserved() {
        let pool = IdPool::new("form");
        assert!(!pool.is_free(0));
    }

    #[test]
    fn alloc_returns_distinct_increasing_ids() {
        let mut pool = IdPool::new("form");
        let a = pool.alloc(here()).unwrap();
        let b = pool.alloc(here()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn mark_used_detects_redefinition() {
        let mut pool = IdPool::new("question");
        pool.mark_used(5, here()).unwrap();
        assert!(pool.mark_used(5, here()).is_err());
    }

    #[test]
    fn free_allows_reuse() {
        let mut pool = IdPool::new("varstore");
        let a = pool.alloc(here()).unwrap();
        pool.free(a);
        assert!(pool.is_free(a));
    }
}
