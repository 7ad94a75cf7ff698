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

//! OpcodeEmitter (C3): reserves bytes in the chunked buffer, writes the
//! 2-byte header plus body, and registers a record-log entry. Variable-size
//! opcodes go through a scratch-buffer `Delayed` builder that finalises its
//! length only when flushed (length-last finalisation, in place of the
//! destructor side-effects the reference compiler used).

use log::debug;

use crate::ifr::chunked_buffer::ChunkedBuffer;
use crate::ifr::error::BuilderError;
use crate::ifr::error::Result;
use crate::ifr::error::SourceLoc;
use crate::ifr::opcode::header_bytes;
use crate::ifr::opcode::OpCode;
use crate::ifr::record_log::RecordHandle;
use crate::ifr::record_log::RecordLog;

/// Process-wide (here: per-builder) nesting counter. Incremented when
/// emitting a scope-open opcode, decremented when emitting `end`.
#[derive(Debug, Default)]
pub struct ScopeCounter(u32);

impl ScopeCounter {
    pub fn depth(&self) -> u32 {
        self.0
    }

    fn header_bit_for(&self, op: OpCode) -> bool {
        op.is_scope_open() || self.0 > 0
    }

    fn on_emit(&mut self, op: OpCode) {
        if op.is_scope_open() {
            self.0 += 1;
        } else if op == OpCode::End {
            self.0 = self.0.saturating_sub(1);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EmittedRecord {
    pub handle: RecordHandle,
    pub global_offset: usize,
    pub length: usize,
}

pub struct Emitter<'a> {
    pub buffer: &'a mut ChunkedBuffer,
    pub log: &'a mut RecordLog,
    pub scope: &'a mut ScopeCounter,
}

impl<'a> Emitter<'a> {
    /// Emit a fixed-layout opcode in one shot: header + body.
    pub fn emit_fixed(&mut self, op: OpCode, line: u32, body: &[u8]) -> Result<EmittedRecord> {
        let length = 2 + body.len();
        if length > 0x7F {
            return Err(BuilderError::LengthOverflow { length });
        }
        let scope_open = self.scope.header_bit_for(op);
        let header = header_bytes(op, length, scope_open)
            .map_err(|length| BuilderError::LengthOverflow { length })?;

        let addr = self.buffer.reserve(length)?;
        self.buffer.write(addr, &header);
        if !body.is_empty() {
            let body_addr = crate::ifr::chunked_buffer::PatchAddr {
                chunk: addr.chunk,
                offset: addr.offset + 2,
            };
            self.buffer.write(body_addr, body);
        }

        let global_offset = self.buffer.global_offset_of(addr);
        let handle = self.log.register(line, addr, length, global_offset);
        self.scope.on_emit(op);
        debug!(
            "emitted {} at offset {global_offset} ({length} bytes, line {line})",
            op.mnemonic()
        );
        Ok(EmittedRecord {
            handle,
            global_offset,
            length,
        })
    }

    /// The body address of an already-emitted record, for in-place setter
    /// mutation after construction (e.g. patching a default value in).
    pub fn body_addr(&self, rec: EmittedRecord) -> crate::ifr::chunked_buffer::PatchAddr {
        let addr = self.buffer.address_of(rec.global_offset).expect("live record");
        crate::ifr::chunked_buffer::PatchAddr {
            chunk: addr.chunk,
            offset: addr.offset + 2,
        }
    }

    pub fn current_source_loc(&self, line_map: &crate::ifr::error::LineMap, line: u32) -> SourceLoc {
        line_map.resolve(line)
    }
}

/// Scratch-buffer builder for opcodes whose final length depends on
/// subsequent setter calls (`numeric`, `one-of`, `varstore`,
/// `varstore-efi`, `form-map`, `disable-if`, `eq-id-list`). Body bytes
/// accumulate here; `finish` reserves the now-known final size in the
/// chunked buffer and copies header + body across in one write. Dropping
/// a `Delayed` without calling `finish` is a caller bug (every
/// construction path, including the error path, must call `finish`), so
/// `Drop` logs at error level as a last-resort safety net rather than
/// silently losing the opcode.
pub struct Delayed {
    op: OpCode,
    line: u32,
    body: Vec<u8>,
    finished: bool,
}

impl Delayed {
    pub fn new(op: OpCode, line: u32) -> Self {
        Delayed {
            op,
            line,
            body: Vec::new(),
            finished: false,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Reduce the scratch body to `n` bytes (e.g. narrowing an
    /// `one-of-option` value to its minimal width).
    pub fn shrink(&mut self, n: usize) {
        self.body.truncate(n);
    }

    pub fn finish(mut self, emitter: &mut Emitter<'_>) -> Result<EmittedRecord> {
        self.finished = true;
        emitter.emit_fixed(self.op, self.line, &self.body)
    }
}

impl Drop for Delayed {
    fn drop(&mut self) {
        if !self.finished {
            log::error!(
                "delayed {} opcode from line {} was dropped without finish() — opcode lost",
                self.op.mnemonic(),
                self.line
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ifr::chunked_buffer::ChunkedBuffer;
    use crate::ifr::record_log::RecordLog;

    #[test]
    fn nested_scope_sets_bit_on_inner_opcode() {
        let mut buf = ChunkedBuffer::new(4096);
        let mut log = RecordLog::new(true);
        let mut scope = ScopeCounter::default();
        let mut em = Emitter {
            buffer: &mut buf,
            log: &mut log,
            scope: &mut scope,
        };
        em.emit_fixed(OpCode::FormSet, 1, &[0u8; 20]).unwrap();
        let inner = em.emit_fixed(OpCode::Subtitle, 2, &[0, 0]).unwrap();
        let addr = em.buffer.address_of(inner.global_offset).unwrap();
        let header = em.buffer.read(addr, 2);
        assert_eq!(header[1] & 0x80, 0x80);
    }

    #[test]
    fn end_decrements_scope_counter() {
        let mut buf = ChunkedBuffer::new(4096);
        let mut log = RecordLog::new(true);
        let mut scope = ScopeCounter::default();
        let mut em = Emitter {
            buffer: &mut buf,
            log: &mut log,
            scope: &mut scope,
        };
        em.emit_fixed(OpCode::Form, 1, &[0, 0, 0, 0]).unwrap();
        assert_eq!(em.scope.depth(), 1);
        em.emit_fixed(OpCode::End, 2, &[]).unwrap();
        assert_eq!(em.scope.depth(), 0);
    }

    #[test]
    fn delayed_emission_finalises_length_from_scratch_body() {
        let mut buf = ChunkedBuffer::new(4096);
        let mut log = RecordLog::new(true);
        let mut scope = ScopeCounter::default();
        let mut em = Emitter {
            buffer: &mut buf,
            log: &mut log,
            scope: &mut scope,
        };
        let mut d = Delayed::new(OpCode::VarStore, 1);
        d.push(&[0u8; 16]); // guid
        d.push(&[0x20, 0x00]); // varstore id
        d.push(&[0x04, 0x00]); // size
        d.push(b"X\0");
        let rec = d.finish(&mut em).unwrap();
        assert_eq!(rec.length, 2 + 16 + 2 + 2 + 2);
    }
}
