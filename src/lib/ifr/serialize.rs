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

//! Output emission (C11): the final package byte stream, a `.lst`
//! source-interleaved listing, and a `.c` byte-array rendering.

use std::fmt::Write as _;

use crate::ifr::chunked_buffer::ChunkedBuffer;
use crate::ifr::error::LineMap;
use crate::ifr::opcode::package_header_bytes;
use crate::ifr::record_log::RecordLog;

/// The finished package: a 4-byte package header followed by every emitted
/// opcode record in stream order.
pub fn package_bytes(buffer: &ChunkedBuffer) -> Vec<u8> {
    let payload = buffer.serialize();
    let header = package_header_bytes(payload.len() as u32);
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&payload);
    out
}

/// `.c` rendering: a static byte array, 16 values per line, suitable for
/// `#include`-ing into a firmware module.
pub fn render_c_array(buffer: &ChunkedBuffer, symbol: &str) -> String {
    let bytes = package_bytes(buffer);
    let mut out = String::new();
    let _ = writeln!(out, "unsigned char {symbol}[] = {{");
    for chunk in bytes.chunks(16) {
        out.push_str("  ");
        for b in chunk {
            let _ = write!(out, "0x{b:02X}, ");
        }
        out.push('\n');
    }
    let _ = writeln!(out, "}};");
    let _ = writeln!(out, "unsigned int {symbol}_size = {};", bytes.len());
    out
}

/// `.lst` rendering: one line per record, showing its source line, stream
/// offset, and hex payload, followed by a trailing raw hex dump of the
/// 4-byte package header. Requires a record log built with logging enabled.
pub fn render_listing(buffer: &ChunkedBuffer, log: &RecordLog, line_map: &LineMap) -> String {
    let mut out = String::new();
    let header = package_header_bytes(buffer.total_len() as u32);
    let _ = writeln!(out, "; package header: {}", hex(&header));

    let mut cur = log.head();
    while let Some(h) = cur {
        let addr = log.addr(h);
        let bytes = buffer.read(addr, log.length(h));
        let loc = line_map.resolve(log.source_line(h));
        let _ = writeln!(
            out,
            "{:>6}  {:<40}  {}",
            loc,
            hex(bytes),
            describe(bytes)
        );
        cur = log.next(h);
    }
    out
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            s.push(' ');
        }
        let _ = write!(s, "{b:02X}");
    }
    s
}

fn describe(bytes: &[u8]) -> String {
    match bytes.first().and_then(|b| crate::ifr::opcode::OpCode::from_byte(*b)) {
        Some(op) => op.mnemonic().to_string(),
        None => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ifr::emitter::Emitter;
    use crate::ifr::emitter::ScopeCounter;
    use crate::ifr::opcode::OpCode;

    #[test]
    fn package_bytes_prefixes_four_byte_header() {
        let mut buf = ChunkedBuffer::new(4096);
        let mut log = RecordLog::new(true);
        let mut scope = ScopeCounter::default();
        let mut em = Emitter { buffer: &mut buf, log: &mut log, scope: &mut scope };
        em.emit_fixed(OpCode::Form, 1, &[0, 0, 0, 0]).unwrap();
        em.emit_fixed(OpCode::End, 2, &[]).unwrap();

        let out = package_bytes(&buf);
        assert_eq!(out.len(), 4 + 6 + 2);
        assert_eq!(out[3], 0x02);
    }

    #[test]
    fn c_array_rendering_includes_symbol_and_size() {
        let mut buf = ChunkedBuffer::new(4096);
        let mut log = RecordLog::new(true);
        let mut scope = ScopeCounter::default();
        let mut em = Emitter { buffer: &mut buf, log: &mut log, scope: &mut scope };
        em.emit_fixed(OpCode::End, 1, &[]).unwrap();

        let rendered = render_c_array(&buf, "gMyFormBin");
        assert!(rendered.contains("unsigned char gMyFormBin[]"));
        assert!(rendered.contains("gMyFormBin_size = 6;"));
    }

    #[test]
    fn listing_rendering_names_each_opcode() {
        let mut buf = ChunkedBuffer::new(4096);
        let mut log = RecordLog::new(true);
        let mut scope = ScopeCounter::default();
        let mut em = Emitter { buffer: &mut buf, log: &mut log, scope: &mut scope };
        em.emit_fixed(OpCode::Form, 1, &[0, 0, 0, 0]).unwrap();
        em.emit_fixed(OpCode::End, 2, &[]).unwrap();

        let rendered = render_listing(&buf, &log, &LineMap::new());
        assert!(rendered.contains("form"));
        assert!(rendered.contains("end"));
    }
}
