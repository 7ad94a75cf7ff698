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

//! Postprocessor (C10): dynamic-opcode relocation, the framework-
//! compatibility record-list adjustment (run to a fixed point), and the
//! record/buffer consistency check.

use log::error;

use crate::ifr::chunked_buffer::ChunkedBuffer;
use crate::ifr::chunked_buffer::PatchAddr;
use crate::ifr::error::BuilderError;
use crate::ifr::error::Result;
use crate::ifr::opcode::default_flags;
use crate::ifr::opcode::default_value_type;
use crate::ifr::opcode::default_value_type_for_width;
use crate::ifr::opcode::header_bytes;
use crate::ifr::opcode::question_flags;
use crate::ifr::opcode::OpCode;
use crate::ifr::opcode::DEFAULT_ID_MANUFACTURING;
use crate::ifr::opcode::DEFAULT_ID_STANDARD;
use crate::ifr::record_log::RecordHandle;
use crate::ifr::record_log::RecordLog;

fn opcode_at(buffer: &ChunkedBuffer, log: &RecordLog, handle: RecordHandle) -> Option<OpCode> {
    let addr = log.addr(handle);
    OpCode::from_byte(buffer.read(addr, 1)[0])
}

fn is_question_opcode(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Numeric | OpCode::CheckBox | OpCode::OneOf | OpCode::OrderedList | OpCode::Date | OpCode::Time
    )
}

/// question_id field read out of a question-header-bearing opcode body.
fn question_id_of(buffer: &ChunkedBuffer, log: &RecordLog, handle: RecordHandle) -> u16 {
    let addr = log.addr(handle);
    let body = buffer.read(addr, log.length(handle));
    u16::from_le_bytes([body[2 + 4], body[2 + 5]])
}

fn question_flags_of(buffer: &ChunkedBuffer, log: &RecordLog, handle: RecordHandle) -> u8 {
    let addr = log.addr(handle);
    let body = buffer.read(addr, log.length(handle));
    body[2 + 10]
}

/// question_id referenced by an `eq-id-val` / `eq-id-id` / `eq-id-val-list`
/// opcode — the field sits right after the 2-byte header in all three.
fn eq_id_question_id(buffer: &ChunkedBuffer, log: &RecordLog, handle: RecordHandle) -> u16 {
    let addr = log.addr(handle);
    let body = buffer.read(addr, log.length(handle).max(4));
    u16::from_le_bytes([body[2], body[3]])
}

/// Walk forward from `start` (a scope-open opcode) and return the handle
/// of its matching `end`.
fn matching_end(
    buffer: &ChunkedBuffer,
    log: &RecordLog,
    start: RecordHandle,
) -> Result<RecordHandle> {
    let mut depth = 0i32;
    let mut cur = Some(start);
    while let Some(h) = cur {
        if let Some(op) = opcode_at(buffer, log, h) {
            if op.is_scope_open() {
                depth += 1;
            } else if op == OpCode::End {
                depth -= 1;
                if depth == 0 {
                    return Ok(h);
                }
            }
        }
        cur = log.next(h);
    }
    Err(BuilderError::AdjustFailure {
        step: "matching-end search",
        message: "scope never closed before end of record log".into(),
    })
}

/// Physically and logically relocate the opcode run `[run_start..=run_end]`
/// so it sits immediately before `insert_before_offset` (a stream offset
/// recorded before the run was synthesised). This is the dynamic-opcode
/// relocation: used when new opcodes (e.g. synthesised defaults) are
/// appended after a scope that has already closed.
pub fn relocate_dynamic_run(
    buffer: &mut ChunkedBuffer,
    log: &mut RecordLog,
    run_start: RecordHandle,
    run_end: RecordHandle,
    insert_before_offset: usize,
) -> Result<()> {
    let src_start = log.offset(run_start);
    let run_len: usize = {
        let mut total = 0;
        let mut cur = Some(run_start);
        loop {
            let h = cur.expect("run_end must follow run_start in the log");
            total += log.length(h);
            if h == run_end {
                break;
            }
            cur = log.next(h);
        }
        total
    };

    buffer.move_region_before(src_start, run_len, insert_before_offset)?;

    let insertion_point = log
        .find_by_offset(insert_before_offset)
        .ok_or_else(|| BuilderError::AdjustFailure {
            step: "dynamic-opcode relocation",
            message: "could not locate insertion anchor in record log".into(),
        })?;
    log.splice(run_start, run_end, insertion_point);
    log.recompute_offsets();
    log.sync_addrs(buffer);
    Ok(())
}

/// Depth of open scopes strictly before `target` (exclusive).
fn depth_before(buffer: &ChunkedBuffer, log: &RecordLog, target: RecordHandle) -> i32 {
    let mut depth = 0i32;
    let mut cur = log.head();
    while let Some(h) = cur {
        if h == target {
            break;
        }
        if let Some(op) = opcode_at(buffer, log, h) {
            if op.is_scope_open() {
                depth += 1;
            } else if op == OpCode::End {
                depth -= 1;
            }
        }
        cur = log.next(h);
    }
    depth
}

/// Append a new `default` opcode at the tail of the buffer and record log.
/// The caller relocates it afterwards if it doesn't already belong at the
/// tail (§4.10's relocation primitive).
fn append_default(
    buffer: &mut ChunkedBuffer,
    log: &mut RecordLog,
    default_id: u16,
    value_type: u8,
    value: &[u8],
    scope_open: bool,
) -> Result<RecordHandle> {
    let mut body = Vec::with_capacity(3 + value.len());
    body.extend_from_slice(&default_id.to_le_bytes());
    body.push(value_type);
    body.extend_from_slice(value);
    let length = 2 + body.len();
    let header = header_bytes(OpCode::Default, length, scope_open)
        .map_err(|length| BuilderError::LengthOverflow { length })?;

    let addr = buffer.reserve(length)?;
    buffer.write(addr, &header);
    if !body.is_empty() {
        let body_addr = PatchAddr { chunk: addr.chunk, offset: addr.offset + 2 };
        buffer.write(body_addr, &body);
    }
    let global_offset = buffer.global_offset_of(addr);
    Ok(log.register(0, addr, length, global_offset))
}

/// Records belonging to a question: every record strictly between `start`
/// and `scope_end` for a scope-opening question (one-of, ordered-list,
/// date, time), or the run of `default` opcodes immediately following a
/// non-scope-opening one (numeric, checkbox).
fn collect_body(
    buffer: &ChunkedBuffer,
    log: &RecordLog,
    start: RecordHandle,
    scope_end: Option<RecordHandle>,
) -> Vec<RecordHandle> {
    let mut v = Vec::new();
    let mut cur = log.next(start);
    match scope_end {
        Some(end) => {
            while let Some(h) = cur {
                if h == end {
                    break;
                }
                v.push(h);
                cur = log.next(h);
            }
        }
        None => {
            while let Some(h) = cur {
                if opcode_at(buffer, log, h) != Some(OpCode::Default) {
                    break;
                }
                v.push(h);
                cur = log.next(h);
            }
        }
    }
    v
}

/// One question's share of auto-default synthesis (§4.8): figure out
/// which `default_id`s it already carries (via one-of-option flags,
/// checkbox default-flags, or explicit `default` opcodes), then synthesise
/// and relocate a `default` opcode for every id it's missing.
fn synthesize_for_question(
    buffer: &mut ChunkedBuffer,
    log: &mut RecordLog,
    start: RecordHandle,
    op: OpCode,
    active_ids: &[u16],
) -> Result<()> {
    let scope_end = if op.is_scope_open() {
        Some(matching_end(buffer, log, start)?)
    } else {
        None
    };
    let body = collect_body(buffer, log, start, scope_end);

    let mut present: Vec<u16> = Vec::new();
    let mut option_value: Option<Vec<u8>> = None;

    match op {
        OpCode::OneOf => {
            for &h in &body {
                if opcode_at(buffer, log, h) != Some(OpCode::OneOfOption) {
                    continue;
                }
                let addr = log.addr(h);
                let rec = buffer.read(addr, log.length(h)).to_vec();
                let flags = rec[4];
                let width = rec[5] as usize;
                let value = rec[6..6 + width].to_vec();
                if flags & default_flags::DEFAULT != 0 && !present.contains(&DEFAULT_ID_STANDARD) {
                    present.push(DEFAULT_ID_STANDARD);
                    option_value.get_or_insert(value);
                } else if flags & default_flags::DEFAULT_MFG != 0 && !present.contains(&DEFAULT_ID_MANUFACTURING) {
                    present.push(DEFAULT_ID_MANUFACTURING);
                }
            }
        }
        OpCode::CheckBox => {
            let addr = log.addr(start);
            let rec = buffer.read(addr, log.length(start));
            let flags = *rec.last().expect("checkbox body is never empty");
            if flags & default_flags::DEFAULT != 0 {
                present.push(DEFAULT_ID_STANDARD);
            }
            if flags & default_flags::DEFAULT_MFG != 0 {
                present.push(DEFAULT_ID_MANUFACTURING);
            }
        }
        _ => {}
    }

    let mut explicit_value: Option<(u8, Vec<u8>)> = None;
    for &h in &body {
        if opcode_at(buffer, log, h) != Some(OpCode::Default) {
            continue;
        }
        let addr = log.addr(h);
        let rec = buffer.read(addr, log.length(h)).to_vec();
        let id = u16::from_le_bytes([rec[2], rec[3]]);
        let value_type = rec[4];
        if !present.contains(&id) {
            present.push(id);
        }
        explicit_value = Some((value_type, rec[5..].to_vec()));
    }

    let missing: Vec<u16> = active_ids.iter().copied().filter(|id| !present.contains(id)).collect();
    if missing.is_empty() {
        return Ok(());
    }

    let value_for = |id: u16| -> Option<(u8, Vec<u8>)> {
        let _ = id;
        match op {
            OpCode::CheckBox => Some((default_value_type::BOOLEAN, vec![1])),
            OpCode::OneOf => option_value
                .clone()
                .map(|v| (default_value_type_for_width(v.len()), v)),
            _ => explicit_value.clone(),
        }
    };

    let insert_before_offset: Option<usize> = match scope_end {
        Some(end) => Some(log.offset(end)),
        None => {
            let anchor = body.last().copied().unwrap_or(start);
            log.next(anchor).map(|n| log.offset(n))
        }
    };
    let base_depth = depth_before(buffer, log, start) + if op.is_scope_open() { 1 } else { 0 };
    let scope_open_bit = base_depth > 0;

    let mut run_start: Option<RecordHandle> = None;
    let mut run_end: Option<RecordHandle> = None;
    for id in missing {
        let Some((value_type, value)) = value_for(id) else { continue };
        let h = append_default(buffer, log, id, value_type, &value, scope_open_bit)?;
        run_start.get_or_insert(h);
        run_end = Some(h);
    }
    let (Some(run_start), Some(run_end)) = (run_start, run_end) else {
        return Ok(());
    };

    match insert_before_offset {
        Some(offset) => relocate_dynamic_run(buffer, log, run_start, run_end, offset)?,
        None => {
            // already at the tail of both buffer and log; nothing to relocate
        }
    }
    Ok(())
}

/// Auto-default synthesis (C8, §4.8): for every question, fill in a
/// `default` opcode for each registered default-store id it doesn't
/// already provide a value for.
pub fn synthesize_missing_defaults(
    buffer: &mut ChunkedBuffer,
    log: &mut RecordLog,
    active_ids: &[u16],
) -> Result<()> {
    if active_ids.is_empty() {
        return Ok(());
    }
    let mut cur = log.head();
    while let Some(h) = cur {
        if let Some(op) = opcode_at(buffer, log, h) {
            if is_question_opcode(op) {
                synthesize_for_question(buffer, log, h, op, active_ids)?;
            }
        }
        cur = log.next(h);
    }
    Ok(())
}

/// Move `inconsistent-if` runs declared at top scope into their owning
/// question's scope, rewriting to `no-submit-if` when the question's
/// LATE_CHECK flag is set. Repeats from the list head after every
/// successful move, since one pass is not equivalent when multiple
/// top-level `inconsistent-if`s reference the same question.
pub fn adjust_inconsistent_if_to_question_scope(
    buffer: &mut ChunkedBuffer,
    log: &mut RecordLog,
) -> Result<()> {
    loop {
        let mut moved = false;
        let mut depth = 0i32;
        let mut cur = log.head();
        while let Some(h) = cur {
            let Some(op) = opcode_at(buffer, log, h) else {
                cur = log.next(h);
                continue;
            };
            let at_top = depth == 0;
            if op.is_scope_open() {
                depth += 1;
            } else if op == OpCode::End {
                depth -= 1;
            }

            if op == OpCode::InconsistentIf && at_top {
                let end = matching_end(buffer, log, h)?;
                let question_id = find_eq_id_in_range(buffer, log, h, end)
                    .ok_or_else(|| BuilderError::AdjustFailure {
                        step: "inconsistent-if relocation",
                        message: "no eq-id-* opcode found inside inconsistent-if scope".into(),
                    })?;
                let target = find_question_by_id(buffer, log, question_id).ok_or_else(|| {
                    BuilderError::AdjustFailure {
                        step: "inconsistent-if relocation",
                        message: format!("no question with id {question_id} found"),
                    }
                })?;

                if question_flags_of(buffer, log, target) & question_flags::LATE_CHECK != 0 {
                    rewrite_header_op(buffer, log, h, OpCode::NoSubmitIf)?;
                }

                let target_op = opcode_at(buffer, log, target).unwrap();
                let mut insertion_point_anchor = if target_op.is_scope_open() {
                    matching_end(buffer, log, target)?
                } else {
                    target
                };
                // date/time special case: skip one trailing `default`
                if matches!(target_op, OpCode::Date | OpCode::Time) {
                    if let Some(next) = log.next(insertion_point_anchor) {
                        if opcode_at(buffer, log, next) == Some(OpCode::Default) {
                            insertion_point_anchor = next;
                        }
                    }
                }
                let insertion_point = match log.next(insertion_point_anchor) {
                    Some(n) => n,
                    None => {
                        // target is the last record in the log: append the
                        // run to the tail instead of splicing "before" a
                        // nonexistent successor.
                        log.splice_to_tail(h, end);
                        log.recompute_offsets();
                        log.sync_addrs(buffer);
                        moved = true;
                        break;
                    }
                };
                log.splice(h, end, insertion_point);
                log.recompute_offsets();
                log.sync_addrs(buffer);
                moved = true;
                break;
            }
            cur = log.next(h);
        }
        if !moved {
            break;
        }
    }
    Ok(())
}

fn find_eq_id_in_range(
    buffer: &ChunkedBuffer,
    log: &RecordLog,
    start: RecordHandle,
    end: RecordHandle,
) -> Option<u16> {
    let mut cur = Some(start);
    while let Some(h) = cur {
        if let Some(op) = opcode_at(buffer, log, h) {
            if matches!(op, OpCode::EqIdVal | OpCode::EqIdId | OpCode::EqIdValList) {
                return Some(eq_id_question_id(buffer, log, h));
            }
        }
        if h == end {
            break;
        }
        cur = log.next(h);
    }
    None
}

fn find_question_by_id(buffer: &ChunkedBuffer, log: &RecordLog, question_id: u16) -> Option<RecordHandle> {
    let mut cur = log.head();
    while let Some(h) = cur {
        if let Some(op) = opcode_at(buffer, log, h) {
            if is_question_opcode(op) && question_id_of(buffer, log, h) == question_id {
                return Some(h);
            }
        }
        cur = log.next(h);
    }
    None
}

fn rewrite_header_op(
    buffer: &mut ChunkedBuffer,
    log: &RecordLog,
    handle: RecordHandle,
    new_op: OpCode,
) -> Result<()> {
    let addr = log.addr(handle);
    let header = buffer.read(addr, 2).to_vec();
    buffer.write(addr, &[new_op as u8, header[1]]);
    Ok(())
}

/// Move a late-declared run of `varstore`/`varstore-efi` opcodes (one
/// terminated by `end`, meaning it was parsed after the formset body
/// closed) to sit before the first `form` opcode.
pub fn adjust_late_varstores_before_first_form(
    buffer: &mut ChunkedBuffer,
    log: &mut RecordLog,
) -> Result<()> {
    loop {
        let mut moved = false;
        let mut cur = log.head();
        let mut run_start: Option<RecordHandle> = None;
        while let Some(h) = cur {
            match opcode_at(buffer, log, h) {
                Some(OpCode::VarStore) | Some(OpCode::VarStoreEfi) | Some(OpCode::VarStoreNameValue) => {
                    if run_start.is_none() {
                        run_start = Some(h);
                    }
                }
                Some(OpCode::End) if run_start.is_some() => {
                    let start = run_start.unwrap();
                    if let Some(first_form) = find_first_form(buffer, log) {
                        if log.offset(first_form) > log.offset(start) {
                            // already ahead of (or at) the first form; nothing to do
                        } else {
                            log.splice(start, h, first_form);
                            log.recompute_offsets();
                            log.sync_addrs(buffer);
                            moved = true;
                            break;
                        }
                    }
                    run_start = None;
                }
                _ => {
                    run_start = None;
                }
            }
            cur = log.next(h);
        }
        if !moved {
            break;
        }
    }
    Ok(())
}

fn find_first_form(buffer: &ChunkedBuffer, log: &RecordLog) -> Option<RecordHandle> {
    let mut cur = log.head();
    while let Some(h) = cur {
        if opcode_at(buffer, log, h) == Some(OpCode::Form) {
            return Some(h);
        }
        cur = log.next(h);
    }
    None
}

/// Build two byte vectors — chunk-chain serialization and record-payload
/// concatenation — and byte-compare them. A mismatch is a fatal internal
/// error, per the error-handling policy (the reference compiler reports
/// and proceeds; this implementation does not).
pub fn consistency_check(buffer: &ChunkedBuffer, log: &RecordLog) -> Result<()> {
    let from_buffer = buffer.serialize();
    let mut from_log = Vec::with_capacity(from_buffer.len());
    let mut cur = log.head();
    while let Some(h) = cur {
        let addr = log.addr(h);
        from_log.extend_from_slice(buffer.read(addr, log.length(h)));
        cur = log.next(h);
    }

    if from_buffer.len() != from_log.len() {
        error!(
            "consistency check: length mismatch (buffer {} vs records {})",
            from_buffer.len(),
            from_log.len()
        );
        return Err(BuilderError::RecordBufferMismatch {
            offset: from_buffer.len().min(from_log.len()),
        });
    }
    for (i, (a, b)) in from_buffer.iter().zip(from_log.iter()).enumerate() {
        if a != b {
            error!("consistency check: first divergence at offset {i}");
            return Err(BuilderError::RecordBufferMismatch { offset: i });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ifr::emitter::Emitter;
    use crate::ifr::emitter::ScopeCounter;
    use crate::ifr::opcode::header_bytes;

    fn fresh() -> (ChunkedBuffer, RecordLog, ScopeCounter) {
        (ChunkedBuffer::new(4096), RecordLog::new(true), ScopeCounter::default())
    }

    #[test]
    fn consistency_check_passes_for_untouched_stream() {
        let (mut buf, mut log, mut scope) = fresh();
        let mut em = Emitter { buffer: &mut buf, log: &mut log, scope: &mut scope };
        em.emit_fixed(OpCode::Form, 1, &[0, 0, 0, 0]).unwrap();
        em.emit_fixed(OpCode::End, 2, &[]).unwrap();
        assert!(consistency_check(&buf, &log).is_ok());
    }

    #[test]
    fn synthesize_missing_defaults_fills_checkbox_gaps_with_true() {
        let (mut buf, mut log, mut scope) = fresh();
        {
            let mut em = Emitter { buffer: &mut buf, log: &mut log, scope: &mut scope };
            let qh = crate::ifr::opcode::QuestionHeader {
                question_id: 1,
                ..Default::default()
            };
            let mut body = qh.to_bytes().to_vec();
            body.push(default_flags::DEFAULT);
            em.emit_fixed(OpCode::CheckBox, 1, &body).unwrap();
        }

        synthesize_missing_defaults(&mut buf, &mut log, &[0, 1, 2]).unwrap();
        assert!(consistency_check(&buf, &log).is_ok());

        let checkbox = log.head().unwrap();
        let mut seen = Vec::new();
        let mut cur = log.next(checkbox);
        while let Some(h) = cur {
            assert_eq!(opcode_at(&buf, &log, h), Some(OpCode::Default));
            let addr = log.addr(h);
            let rec = buf.read(addr, log.length(h));
            let id = u16::from_le_bytes([rec[2], rec[3]]);
            assert_eq!(rec[4], default_value_type::BOOLEAN);
            assert_eq!(&rec[5..], &[1u8]);
            seen.push(id);
            cur = log.next(h);
        }
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn synthesize_missing_defaults_is_noop_when_question_already_covers_all_ids() {
        let (mut buf, mut log, mut scope) = fresh();
        {
            let mut em = Emitter { buffer: &mut buf, log: &mut log, scope: &mut scope };
            let qh = crate::ifr::opcode::QuestionHeader {
                question_id: 1,
                ..Default::default()
            };
            let mut body = qh.to_bytes().to_vec();
            body.push(default_flags::DEFAULT);
            em.emit_fixed(OpCode::CheckBox, 1, &body).unwrap();
        }
        synthesize_missing_defaults(&mut buf, &mut log, &[0]).unwrap();
        let checkbox = log.head().unwrap();
        assert!(log.next(checkbox).is_none());
    }

    #[test]
    fn relocate_dynamic_run_moves_record_and_bytes_together() {
        let (mut buf, mut log, mut scope) = fresh();
        let insert_before_offset;
        let (run_start, run_end);
        {
            let mut em = Emitter { buffer: &mut buf, log: &mut log, scope: &mut scope };
            em.emit_fixed(OpCode::Form, 1, &[0, 0, 0, 0]).unwrap();
            let marker = em.emit_fixed(OpCode::End, 1, &[]).unwrap();
            insert_before_offset = marker.global_offset;
            let a = em.emit_fixed(OpCode::DefaultStore, 2, &[0, 0, 0, 0]).unwrap();
            run_start = log.find_by_offset(a.global_offset).unwrap();
            run_end = run_start;
        }
        relocate_dynamic_run(&mut buf, &mut log, run_start, run_end, insert_before_offset).unwrap();
        assert!(consistency_check(&buf, &log).is_ok());
        // the default-store bytes now precede the final `end`
        let serialized = buf.serialize();
        let end_header = header_bytes(OpCode::End, 2, false).unwrap();
        let end_pos = serialized.windows(2).position(|w| w == end_header).unwrap();
        assert!(end_pos >= 6, "default-store run should now sit before end");
    }
}
