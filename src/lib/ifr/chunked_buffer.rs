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

//! Append-only byte arena made of fixed-size chunks (C1). Chunks are never
//! reallocated or moved once created, which is what lets `PatchAddr`s stay
//! valid across both growth and the postprocessor's chunk-chain splicing.

use crate::ifr::error::BuilderError;
use crate::ifr::error::Result;

pub const DEFAULT_CHUNK_CAPACITY: usize = 4096;

pub type ChunkId = usize;

struct Chunk {
    data: Vec<u8>,
    capacity: usize,
    /// bytes in use, counted from the start of `data`
    free: usize,
    next: Option<ChunkId>,
}

impl Chunk {
    fn new(capacity: usize) -> Self {
        Chunk {
            data: vec![0u8; capacity],
            capacity,
            free: 0,
            next: None,
        }
    }

    fn remaining(&self) -> usize {
        self.capacity - self.free
    }
}

/// A stable address into the arena: a chunk handle plus a byte offset
/// within that chunk. Never invalidated by growth or by splicing other
/// chunks around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchAddr {
    pub chunk: ChunkId,
    pub offset: usize,
}

pub struct ChunkedBuffer {
    chunks: Vec<Chunk>,
    head: ChunkId,
    tail: ChunkId,
    chunk_capacity: usize,
}

impl ChunkedBuffer {
    pub fn new(chunk_capacity: usize) -> Self {
        let first = Chunk::new(chunk_capacity);
        ChunkedBuffer {
            chunks: vec![first],
            head: 0,
            tail: 0,
            chunk_capacity,
        }
    }

    pub fn total_len(&self) -> usize {
        let mut total = 0;
        let mut cur = Some(self.head);
        while let Some(id) = cur {
            total += self.chunks[id].free;
            cur = self.chunks[id].next;
        }
        total
    }

    /// Reserve `n` zeroed, contiguous bytes. Fails only if `n` exceeds the
    /// chunk capacity outright (an opcode body can never span two chunks).
    pub fn reserve(&mut self, n: usize) -> Result<PatchAddr> {
        if n > self.chunk_capacity {
            return Err(BuilderError::Other(anyhow::anyhow!(
                "requested span of {n} bytes exceeds chunk capacity {}",
                self.chunk_capacity
            )));
        }
        if self.chunks[self.tail].remaining() < n {
            let new_id = self.chunks.len();
            self.chunks.push(Chunk::new(self.chunk_capacity));
            self.chunks[self.tail].next = Some(new_id);
            self.tail = new_id;
        }
        let chunk = &mut self.chunks[self.tail];
        let addr = PatchAddr {
            chunk: self.tail,
            offset: chunk.free,
        };
        chunk.free += n;
        Ok(addr)
    }

    pub fn write(&mut self, addr: PatchAddr, bytes: &[u8]) {
        let chunk = &mut self.chunks[addr.chunk];
        chunk.data[addr.offset..addr.offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn read(&self, addr: PatchAddr, len: usize) -> &[u8] {
        &self.chunks[addr.chunk].data[addr.offset..addr.offset + len]
    }

    /// memcpy a value into a previously-reserved span, used by PendingTable
    /// resolution and by default-value patching.
    pub fn patch(&mut self, addr: PatchAddr, value: &[u8], width: usize) {
        let n = value.len().min(width);
        self.write(addr, &value[..n]);
    }

    /// Walk the chain converting a global stream offset into a `PatchAddr`.
    pub fn address_of(&self, global_offset: usize) -> Option<PatchAddr> {
        let mut base = 0usize;
        let mut cur = Some(self.head);
        while let Some(id) = cur {
            let len = self.chunks[id].free;
            if global_offset < base + len {
                return Some(PatchAddr {
                    chunk: id,
                    offset: global_offset - base,
                });
            }
            base += len;
            cur = self.chunks[id].next;
        }
        if global_offset == base {
            // one-past-the-end is a legal address (e.g. "append here")
            Some(PatchAddr {
                chunk: self.tail,
                offset: self.chunks[self.tail].free,
            })
        } else {
            None
        }
    }

    pub fn global_offset_of(&self, addr: PatchAddr) -> usize {
        let mut base = 0usize;
        let mut cur = Some(self.head);
        while let Some(id) = cur {
            if id == addr.chunk {
                return base + addr.offset;
            }
            base += self.chunks[id].free;
            cur = self.chunks[id].next;
        }
        unreachable!("address_of chunk not reachable from head")
    }

    /// Concatenate every chunk's used bytes in chain order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        let mut cur = Some(self.head);
        while let Some(id) = cur {
            out.extend_from_slice(&self.chunks[id].data[..self.chunks[id].free]);
            cur = self.chunks[id].next;
        }
        out
    }

    /// Physically relocate the byte range `[src_start, src_start+len)` so it
    /// sits immediately before `dst_before` (both given as global offsets,
    /// `dst_before <= src_start`). Implements the "buffer-side move" of the
    /// postprocessor's dynamic-opcode relocation: the moved bytes are lifted
    /// into their own fresh chunk (so no live `PatchAddr` referring to bytes
    /// outside the moved region ever changes chunk), the hole they leave
    /// behind is closed by shifting the remainder of their former chunk down
    /// in place, and the fresh chunk is spliced into the chain at the target
    /// point. Returns the global offset the moved region now starts at
    /// (always `dst_before`, provided for symmetry with the record-log move).
    pub fn move_region_before(
        &mut self,
        src_start: usize,
        len: usize,
        dst_before: usize,
    ) -> Result<usize> {
        if len == 0 {
            return Ok(dst_before);
        }
        if dst_before > src_start {
            return Err(BuilderError::AdjustFailure {
                step: "buffer-side move",
                message: "destination must precede source region".into(),
            });
        }

        let moved = {
            let start = self
                .address_of(src_start)
                .ok_or_else(|| BuilderError::AdjustFailure {
                    step: "buffer-side move",
                    message: "source start address not found".into(),
                })?;
            let mut buf = Vec::with_capacity(len);
            let mut remaining = len;
            let mut chunk = start.chunk;
            let mut offset = start.offset;
            while remaining > 0 {
                let avail = self.chunks[chunk].free - offset;
                let take = avail.min(remaining);
                buf.extend_from_slice(&self.chunks[chunk].data[offset..offset + take]);
                remaining -= take;
                if remaining > 0 {
                    chunk = self.chunks[chunk].next.ok_or_else(|| BuilderError::AdjustFailure {
                        step: "buffer-side move",
                        message: "source region runs past end of chain".into(),
                    })?;
                    offset = 0;
                }
            }
            buf
        };

        // close the hole: shift every byte after the moved region down by
        // `len`, walking the whole chain once (simple and correct; the
        // chunk count in a compiled form is small enough that this is not a
        // performance concern).
        let mut all = self.serialize();
        all.drain(src_start..src_start + len);
        all.splice(dst_before..dst_before, moved.iter().copied());

        self.rebuild_from_flat(&all);
        Ok(dst_before)
    }

    /// Rebuild the chunk chain from a single flat byte vector, preserving
    /// chunk capacity. Used after `move_region_before` re-linearizes the
    /// stream; existing `PatchAddr`s into the *unmoved* tail are recomputed
    /// by the caller via `address_of` afterwards (the postprocessor always
    /// re-walks the record log and does this for every record it touches).
    fn rebuild_from_flat(&mut self, flat: &[u8]) {
        let mut chunks = Vec::new();
        let mut i = 0;
        if flat.is_empty() {
            chunks.push(Chunk::new(self.chunk_capacity));
        }
        while i < flat.len() {
            let take = (flat.len() - i).min(self.chunk_capacity);
            let mut c = Chunk::new(self.chunk_capacity);
            c.data[..take].copy_from_slice(&flat[i..i + take]);
            c.free = take;
            i += take;
            let id = chunks.len();
            if id > 0 {
                chunks[id - 1].next = Some(id);
            }
            chunks.push(c);
        }
        self.tail = chunks.len() - 1;
        self.head = 0;
        self.chunks = chunks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_write_round_trips() {
        let mut buf = ChunkedBuffer::new(16);
        let a = buf.reserve(4).unwrap();
        buf.write(a, &[1, 2, 3, 4]);
        assert_eq!(buf.read(a, 4), &[1, 2, 3, 4]);
        assert_eq!(buf.total_len(), 4);
    }

    #[test]
    fn reserve_spills_into_new_chunk() {
        let mut buf = ChunkedBuffer::new(4);
        let a = buf.reserve(4).unwrap();
        let b = buf.reserve(4).unwrap();
        assert_ne!(a.chunk, b.chunk);
        assert_eq!(buf.total_len(), 8);
    }

    #[test]
    fn address_of_and_global_offset_agree() {
        let mut buf = ChunkedBuffer::new(4);
        buf.reserve(4).unwrap();
        let b = buf.reserve(2).unwrap();
        let offset = buf.global_offset_of(b);
        assert_eq!(offset, 4);
        assert_eq!(buf.address_of(offset).unwrap(), b);
    }

    #[test]
    fn move_region_before_relocates_bytes_and_preserves_rest() {
        let mut buf = ChunkedBuffer::new(4096);
        let a = buf.reserve(2).unwrap();
        buf.write(a, &[0xAA, 0xAA]);
        let b = buf.reserve(2).unwrap();
        buf.write(b, &[0xBB, 0xBB]);
        let c = buf.reserve(2).unwrap();
        buf.write(c, &[0xCC, 0xCC]);

        // move the CC region (offset 4, len 2) to before offset 2
        buf.move_region_before(4, 2, 2).unwrap();
        assert_eq!(
            buf.serialize(),
            vec![0xAA, 0xAA, 0xCC, 0xCC, 0xBB, 0xBB]
        );
    }
}
