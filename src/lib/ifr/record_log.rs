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

//! Ordered log of one entry per emitted opcode (C2), arena-backed so the
//! postprocessor can splice runs of entries without invalidating handles
//! held elsewhere (e.g. by PendingTable).

use crate::ifr::chunked_buffer::PatchAddr;

pub const INVALID: RecordHandle = RecordHandle(usize::MAX);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordHandle(usize);

pub const UNKNOWN_LINE: u32 = 0;

#[derive(Debug, Clone)]
struct Entry {
    source_line: u32,
    addr: PatchAddr,
    length: usize,
    offset: usize,
    prev: Option<RecordHandle>,
    next: Option<RecordHandle>,
}

pub struct RecordLog {
    entries: Vec<Entry>,
    head: Option<RecordHandle>,
    tail: Option<RecordHandle>,
    enabled: bool,
}

impl RecordLog {
    pub fn new(enabled: bool) -> Self {
        RecordLog {
            entries: Vec::new(),
            head: None,
            tail: None,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append a new entry at the tail of the log. No-ops (returning
    /// `INVALID`) when the log is disabled.
    pub fn register(&mut self, source_line: u32, addr: PatchAddr, length: usize, offset: usize) -> RecordHandle {
        if !self.enabled {
            return INVALID;
        }
        let handle = RecordHandle(self.entries.len());
        self.entries.push(Entry {
            source_line,
            addr,
            length,
            offset,
            prev: self.tail,
            next: None,
        });
        if let Some(tail) = self.tail {
            self.entries[tail.0].next = Some(handle);
        } else {
            self.head = Some(handle);
        }
        self.tail = Some(handle);
        handle
    }

    pub fn update(&mut self, handle: RecordHandle, source_line: u32, addr: PatchAddr, length: usize) {
        if handle == INVALID {
            return;
        }
        let e = &mut self.entries[handle.0];
        e.source_line = source_line;
        e.addr = addr;
        e.length = length;
    }

    pub fn source_line(&self, handle: RecordHandle) -> u32 {
        self.entries[handle.0].source_line
    }

    pub fn addr(&self, handle: RecordHandle) -> PatchAddr {
        self.entries[handle.0].addr
    }

    pub fn length(&self, handle: RecordHandle) -> usize {
        self.entries[handle.0].length
    }

    pub fn offset(&self, handle: RecordHandle) -> usize {
        self.entries[handle.0].offset
    }

    pub fn head(&self) -> Option<RecordHandle> {
        self.head
    }

    pub fn next(&self, handle: RecordHandle) -> Option<RecordHandle> {
        self.entries[handle.0].next
    }

    pub fn prev(&self, handle: RecordHandle) -> Option<RecordHandle> {
        self.entries[handle.0].prev
    }

    pub fn find_by_offset(&self, offset: usize) -> Option<RecordHandle> {
        let mut cur = self.head;
        while let Some(h) = cur {
            if self.entries[h.0].offset == offset {
                return Some(h);
            }
            cur = self.entries[h.0].next;
        }
        None
    }

    /// Re-walk the chain, rewriting each entry's `offset` as the running
    /// sum of prior lengths in declaration (chain) order.
    pub fn recompute_offsets(&mut self) {
        let mut running = 0usize;
        let mut cur = self.head;
        while let Some(h) = cur {
            self.entries[h.0].offset = running;
            running += self.entries[h.0].length;
            cur = self.entries[h.0].next;
        }
    }

    /// Refresh every entry's `payload_ptr` (`addr`) from its (already
    /// recomputed) `offset`, via the buffer's own address resolution.
    /// Called after a splice moves records to a new physical location.
    pub fn sync_addrs(&mut self, buffer: &crate::ifr::chunked_buffer::ChunkedBuffer) {
        let mut cur = self.head;
        while let Some(h) = cur {
            if let Some(addr) = buffer.address_of(self.entries[h.0].offset) {
                self.entries[h.0].addr = addr;
            }
            cur = self.entries[h.0].next;
        }
    }

    pub fn set_addr(&mut self, handle: RecordHandle, addr: PatchAddr) {
        self.entries[handle.0].addr = addr;
    }

    /// Unlink the chain segment `[a..=b]` (must be contiguous via `next`)
    /// and relink it immediately before `insertion_point`.
    pub fn splice(&mut self, a: RecordHandle, b: RecordHandle, insertion_point: RecordHandle) {
        let before_a = self.entries[a.0].prev;
        let after_b = self.entries[b.0].next;

        match before_a {
            Some(p) => self.entries[p.0].next = after_b,
            None => self.head = after_b,
        }
        match after_b {
            Some(n) => self.entries[n.0].prev = before_a,
            None => self.tail = before_a,
        }

        let target_prev = self.entries[insertion_point.0].prev;
        self.entries[a.0].prev = target_prev;
        match target_prev {
            Some(p) => self.entries[p.0].next = Some(a),
            None => self.head = Some(a),
        }
        self.entries[b.0].next = Some(insertion_point);
        self.entries[insertion_point.0].prev = Some(b);
    }

    /// Splice `[a..=b]` to become the new tail of the log (used to move a
    /// run after the last entry, e.g. appending ahead of a final `end`).
    pub fn splice_to_tail(&mut self, a: RecordHandle, b: RecordHandle) {
        let before_a = self.entries[a.0].prev;
        let after_b = self.entries[b.0].next;
        match before_a {
            Some(p) => self.entries[p.0].next = after_b,
            None => self.head = after_b,
        }
        match after_b {
            Some(n) => self.entries[n.0].prev = before_a,
            None => self.tail = before_a,
        }
        self.entries[a.0].prev = self.tail;
        if let Some(t) = self.tail {
            self.entries[t.0].next = Some(a);
        } else {
            self.head = Some(a);
        }
        self.entries[b.0].next = None;
        self.tail = Some(b);
    }

    pub fn iter(&self) -> RecordLogIter<'_> {
        RecordLogIter {
            log: self,
            cur: self.head,
        }
    }
}

pub struct RecordLogIter<'a> {
    log: &'a RecordLog,
    cur: Option<RecordHandle>,
}

impl<'a> Iterator for RecordLogIter<'a> {
    type Item = RecordHandle;
    fn next(&mut self) -> Option<RecordHandle> {
        let cur = self.cur?;
        self.cur = self.log.next(cur);
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: usize) -> PatchAddr {
        PatchAddr { chunk: 0, offset: n }
    }

    #[test]
    fn register_and_walk_in_order() {
        let mut log = RecordLog::new(true);
        log.register(1, addr(0), 2, 0);
        log.register(1, addr(2), 4, 2);
        log.register(2, addr(6), 2, 6);
        let offsets: Vec<usize> = log.iter().map(|h| log.offset(h)).collect();
        assert_eq!(offsets, vec![0, 2, 6]);
    }

    #[test]
    fn disabled_log_noops() {
        let mut log = RecordLog::new(false);
        let h = log.register(1, addr(0), 2, 0);
        assert_eq!(h, INVALID);
        assert!(log.head().is_none());
    }

    #[test]
    fn splice_moves_run_before_target_and_recompute_fixes_offsets() {
        let mut log = RecordLog::new(true);
        let a = log.register(1, addr(0), 2, 0);
        let b = log.register(1, addr(2), 2, 2);
        let c = log.register(1, addr(4), 2, 4);
        let d = log.register(1, addr(6), 2, 6);

        // move [c] before b
        log.splice(c, c, b);
        let order: Vec<RecordHandle> = log.iter().collect();
        assert_eq!(order, vec![a, c, b, d]);

        log.recompute_offsets();
        assert_eq!(log.offset(a), 0);
        assert_eq!(log.offset(c), 2);
        assert_eq!(log.offset(b), 4);
        assert_eq!(log.offset(d), 6);
    }
}
