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

//! End-to-end scenarios driving [`vfrcc::Builder`] directly, one per
//! observable behavior of the finished package: header-bit placement,
//! varstore/question ordering, forward-reference resolution, auto-default
//! synthesis, and `inconsistent-if` relocation.

use vfrcc::ifr::guid::Guid;
use vfrcc::ifr::opcode::default_flags;
use vfrcc::ifr::opcode::default_value_type;
use vfrcc::ifr::opcode::question_flags;
use vfrcc::ifr::opcode::OpCode;
use vfrcc::Builder;

/// A lone `form` + `end`: both opcodes pick up the scope-open header bit,
/// `form` because it opens a scope and `end` because it is emitted while
/// that scope is still open (the nesting counter only drops after the
/// `end` itself is written). This is the header-bit formula in
/// `emitter.rs`, not a literal top-level/nested distinction.
#[test]
fn lone_form_and_end_both_carry_the_scope_bit() {
    let mut b = Builder::new(false, true);
    b.form_begin(Some(1), 0xAAAA, 1).unwrap();
    b.form_end(2).unwrap();
    let pkg = b.finish().unwrap();

    // 4-byte package header, then: form(01) len=6|0x80, id=1, title=0xAAAA
    assert_eq!(&pkg[4..6], &[OpCode::Form as u8, 0x86]);
    assert_eq!(&pkg[6..8], &1u16.to_le_bytes());
    assert_eq!(&pkg[8..10], &0xAAAAu16.to_le_bytes());
    assert_eq!(&pkg[10..12], &[OpCode::End as u8, 0x82]);
    assert_eq!(pkg.len(), 4 + 6 + 2);
}

/// A buffer varstore followed by a numeric question referencing its first
/// field: the question's `varstore_id`/`varstore_info` resolve through the
/// type system, and the varstore's record precedes the question's in
/// emission order.
#[test]
fn buffer_varstore_resolves_into_numeric_question_header() {
    let mut b = Builder::new(false, true);
    b.types.declare_struct("S", b.loc(1)).unwrap();
    b.types.add_field("S", "x", "UINT8", 0, None, b.loc(1)).unwrap();
    let vsid = b.varstore_buffer("MyVar", Guid::ZERO, "S", Some(7), 1).unwrap();
    let varstore_record = b.log.head().unwrap();

    let qid = b
        .numeric_question(Some("Q1"), "MyVar", "x", 10, 11, Some(0x20), 0, 0, 255, 1, 2)
        .unwrap();
    assert_eq!(qid, 0x20);
    assert_eq!(vsid, 7);

    let numeric_record = b.log.next(varstore_record).expect("numeric follows varstore");
    assert!(b.log.offset(numeric_record) > b.log.offset(varstore_record));

    let addr = b.log.addr(numeric_record);
    let body = b.buffer.read(addr, b.log.length(numeric_record));
    // question-header varstore_id sits right after prompt/help (offset 2+4)
    assert_eq!(u16::from_le_bytes([body[2 + 6], body[2 + 7]]), vsid);

    b.finish().unwrap();
}

/// A question referenced by name before it's declared resolves once the
/// question is registered, leaving no pending entries behind.
#[test]
fn forward_referenced_question_resolves_once_declared() {
    let mut b = Builder::new(false, true);
    b.types.declare_struct("S", b.loc(1)).unwrap();
    b.types.add_field("S", "x", "UINT8", 0, None, b.loc(1)).unwrap();
    b.varstore_buffer("V", Guid::ZERO, "S", Some(1), 1).unwrap();

    b.eq_id_val("Q1", 5, 1).unwrap();
    assert_eq!(b.pending.pending_count(), 1);

    let eq_id_record = b.log.head().unwrap();
    let qid = b
        .numeric_question(Some("Q1"), "V", "x", 1, 2, Some(0x10), 0, 0, 10, 1, 2)
        .unwrap();
    assert_eq!(qid, 0x10);
    assert_eq!(b.pending.pending_count(), 0);

    let addr = b.log.addr(eq_id_record);
    let body = b.buffer.read(addr, b.log.length(eq_id_record));
    assert_eq!(&body[2..4], &qid.to_le_bytes());

    b.finish().unwrap();
}

/// Three default-stores, a checkbox that only claims the standard
/// default-id via its flag byte: `finish()` synthesizes `TRUE` defaults
/// for the two ids the checkbox left uncovered.
#[test]
fn checkbox_gets_synthesized_defaults_for_uncovered_ids() {
    let mut b = Builder::new(false, true);
    b.types.declare_struct("S", b.loc(1)).unwrap();
    b.types.add_field("S", "v", "BOOLEAN", 0, None, b.loc(1)).unwrap();
    b.varstore_buffer("V", Guid::ZERO, "S", Some(1), 1).unwrap();

    b.default_store("standard", 10, Some(0), 1).unwrap();
    b.default_store("mfg", 11, Some(1), 1).unwrap();
    b.default_store("custom", 12, Some(2), 1).unwrap();

    b.checkbox_question(Some("CB"), "V", "v", 20, 21, Some(0x30), 0, default_flags::DEFAULT, 1)
        .unwrap();

    b.finish().unwrap();

    let checkbox = b
        .log
        .iter()
        .find(|&h| {
            let addr = b.log.addr(h);
            b.buffer.read(addr, 1)[0] == OpCode::CheckBox as u8
        })
        .expect("checkbox record present");

    let mut synthesized = Vec::new();
    let mut cur = b.log.next(checkbox);
    while let Some(h) = cur {
        let addr = b.log.addr(h);
        let rec = b.buffer.read(addr, b.log.length(h));
        assert_eq!(rec[0], OpCode::Default as u8, "expected only synthesized defaults to follow");
        // body: default_id(u16), type(u8), value
        let id = u16::from_le_bytes([rec[2], rec[3]]);
        assert_eq!(rec[4], default_value_type::BOOLEAN);
        assert_eq!(&rec[5..], &[1u8]);
        synthesized.push(id);
        cur = b.log.next(h);
    }
    assert_eq!(synthesized, vec![1, 2]);
}

/// A top-level `inconsistent-if` referencing a question declared later in
/// the stream is relocated into that question's scope by `finish()`
/// (compat mode), and the record log's offsets stay monotonic afterwards.
#[test]
fn top_level_inconsistent_if_relocates_into_question_scope() {
    let mut b = Builder::new(true, true);
    b.types.declare_struct("S", b.loc(1)).unwrap();
    b.types.add_field("S", "x", "UINT8", 0, None, b.loc(1)).unwrap();
    b.varstore_buffer("V", Guid::ZERO, "S", Some(1), 1).unwrap();

    b.inconsistent_if_begin(99, 1).unwrap();
    b.eq_id_val("Q1", 3, 1).unwrap();
    b.scope_end(1).unwrap();

    b.numeric_question(Some("Q1"), "V", "x", 1, 2, Some(0x20), 0, 0, 10, 1, 2)
        .unwrap();

    b.finish().unwrap();

    let mut offsets = Vec::new();
    let mut cur = b.log.head();
    while let Some(h) = cur {
        offsets.push(b.log.offset(h));
        cur = b.log.next(h);
    }
    assert!(offsets.windows(2).all(|w| w[0] < w[1]), "offsets must stay monotonic after relocation");

    // the inconsistent-if now sits somewhere after the question it targets
    let question_pos = b
        .log
        .iter()
        .position(|h| {
            let addr = b.log.addr(h);
            b.buffer.read(addr, 1)[0] == OpCode::Numeric as u8
        })
        .unwrap();
    let inconsistent_pos = b
        .log
        .iter()
        .position(|h| {
            let addr = b.log.addr(h);
            b.buffer.read(addr, 1)[0] == OpCode::InconsistentIf as u8
        })
        .unwrap();
    assert!(inconsistent_pos > question_pos);
}

/// `LATE_CHECK` on the owning question rewrites the relocated
/// `inconsistent-if` to `no-submit-if`.
#[test]
fn late_check_question_rewrites_inconsistent_if_to_no_submit_if() {
    let mut b = Builder::new(true, true);
    b.types.declare_struct("S", b.loc(1)).unwrap();
    b.types.add_field("S", "x", "UINT8", 0, None, b.loc(1)).unwrap();
    b.varstore_buffer("V", Guid::ZERO, "S", Some(1), 1).unwrap();

    b.inconsistent_if_begin(99, 1).unwrap();
    b.eq_id_val("Q1", 3, 1).unwrap();
    b.scope_end(1).unwrap();

    b.numeric_question(
        Some("Q1"),
        "V",
        "x",
        1,
        2,
        Some(0x20),
        question_flags::LATE_CHECK,
        0,
        10,
        1,
        2,
    )
    .unwrap();

    b.finish().unwrap();

    let rewritten = b.log.iter().any(|h| {
        let addr = b.log.addr(h);
        b.buffer.read(addr, 1)[0] == OpCode::NoSubmitIf as u8
    });
    assert!(rewritten, "inconsistent-if should have been rewritten to no-submit-if");
}

/// `.c` and `.lst` rendering both succeed against a finished package.
#[test]
fn package_renders_as_c_array_and_listing() {
    let mut b = Builder::new(false, true);
    b.form_begin(Some(1), 1, 1).unwrap();
    b.form_end(2).unwrap();
    b.finish().unwrap();

    let rendered = vfrcc::ifr::serialize::render_c_array(&b.buffer, "gFormBin");
    assert!(rendered.contains("unsigned char gFormBin[]"));

    let listing = vfrcc::ifr::serialize::render_listing(&b.buffer, &b.log, &b.line_map);
    assert!(listing.contains("form"));
    assert!(listing.contains("end"));
}
