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

//! Opcode byte values, the static `{size, scope_open}` table driving
//! OpcodeEmitter (C3), and the `question-header` shared tail.
//!
//! The numeric values below follow the body-layout table handed down for
//! this package format; `Default`/`DefaultStore` in particular are 0x5B and
//! 0x5C respectively as given there (see DESIGN.md for the one place this
//! disagrees with the vendor header found alongside the reference
//! compiler, and why the table here wins).

use crate::ifr::guid::Guid;

pub type StringId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Form = 0x01,
    Subtitle = 0x02,
    Text = 0x03,
    OneOf = 0x05,
    CheckBox = 0x06,
    Numeric = 0x07,
    OneOfOption = 0x09,
    SuppressIf = 0x0A,
    FormSet = 0x0E,
    Ref = 0x0F,
    NoSubmitIf = 0x10,
    InconsistentIf = 0x11,
    EqIdVal = 0x12,
    EqIdId = 0x13,
    EqIdValList = 0x14,
    Rule = 0x18,
    GrayOutIf = 0x19,
    Date = 0x1A,
    Time = 0x1B,
    DisableIf = 0x1E,
    OrderedList = 0x23,
    VarStore = 0x24,
    VarStoreNameValue = 0x25,
    VarStoreEfi = 0x26,
    End = 0x29,
    DefaultStore = 0x5B,
    Default = 0x5C,
}

impl OpCode {
    pub const fn is_scope_open(self) -> bool {
        matches!(
            self,
            OpCode::Form
                | OpCode::OneOf
                | OpCode::SuppressIf
                | OpCode::FormSet
                | OpCode::NoSubmitIf
                | OpCode::InconsistentIf
                | OpCode::GrayOutIf
                | OpCode::Date
                | OpCode::Time
                | OpCode::DisableIf
                | OpCode::OrderedList
                | OpCode::Ref
        )
    }

    /// Fixed body size in bytes (including the 2-byte header), for opcodes
    /// whose layout is constant. Variable-length opcodes return `None`; the
    /// caller (OpcodeEmitter) supplies the size explicitly for those.
    pub const fn fixed_size(self) -> Option<usize> {
        match self {
            OpCode::Form => Some(2 + 2 + 2),
            OpCode::Subtitle => Some(2 + 2),
            OpCode::Text => Some(2 + 2 + 2 + 2),
            OpCode::OneOf => None,
            OpCode::CheckBox => Some(2 + QUESTION_HEADER_SIZE + 1),
            OpCode::Numeric => None,
            OpCode::OneOfOption => None,
            OpCode::SuppressIf => Some(2),
            OpCode::FormSet => None,
            OpCode::Ref => Some(2 + QUESTION_HEADER_SIZE + 2),
            OpCode::NoSubmitIf => Some(2 + 2),
            OpCode::InconsistentIf => Some(2 + 2),
            OpCode::EqIdVal => Some(2 + 2 + 2),
            OpCode::EqIdId => Some(2 + 2 + 2),
            OpCode::EqIdValList => None,
            OpCode::Rule => Some(2 + 1),
            OpCode::GrayOutIf => Some(2),
            OpCode::Date => Some(2 + QUESTION_HEADER_SIZE),
            OpCode::Time => Some(2 + QUESTION_HEADER_SIZE),
            OpCode::DisableIf => Some(2),
            OpCode::OrderedList => Some(2 + QUESTION_HEADER_SIZE + 1 + 1),
            OpCode::VarStore => None,
            OpCode::VarStoreNameValue => None,
            OpCode::VarStoreEfi => None,
            OpCode::End => Some(2),
            OpCode::DefaultStore => Some(2 + 2 + 2),
            OpCode::Default => None,
        }
    }

    pub fn from_byte(b: u8) -> Option<OpCode> {
        Some(match b {
            0x01 => OpCode::Form,
            0x02 => OpCode::Subtitle,
            0x03 => OpCode::Text,
            0x05 => OpCode::OneOf,
            0x06 => OpCode::CheckBox,
            0x07 => OpCode::Numeric,
            0x09 => OpCode::OneOfOption,
            0x0A => OpCode::SuppressIf,
            0x0E => OpCode::FormSet,
            0x0F => OpCode::Ref,
            0x10 => OpCode::NoSubmitIf,
            0x11 => OpCode::InconsistentIf,
            0x12 => OpCode::EqIdVal,
            0x13 => OpCode::EqIdId,
            0x14 => OpCode::EqIdValList,
            0x18 => OpCode::Rule,
            0x19 => OpCode::GrayOutIf,
            0x1A => OpCode::Date,
            0x1B => OpCode::Time,
            0x1E => OpCode::DisableIf,
            0x23 => OpCode::OrderedList,
            0x24 => OpCode::VarStore,
            0x25 => OpCode::VarStoreNameValue,
            0x26 => OpCode::VarStoreEfi,
            0x29 => OpCode::End,
            0x5B => OpCode::DefaultStore,
            0x5C => OpCode::Default,
            _ => return None,
        })
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            OpCode::Form => "form",
            OpCode::Subtitle => "subtitle",
            OpCode::Text => "text",
            OpCode::OneOf => "one-of",
            OpCode::CheckBox => "checkbox",
            OpCode::Numeric => "numeric",
            OpCode::OneOfOption => "one-of-option",
            OpCode::SuppressIf => "suppress-if",
            OpCode::FormSet => "form-set",
            OpCode::Ref => "ref",
            OpCode::NoSubmitIf => "no-submit-if",
            OpCode::InconsistentIf => "inconsistent-if",
            OpCode::EqIdVal => "eq-id-val",
            OpCode::EqIdId => "eq-id-id",
            OpCode::EqIdValList => "eq-id-val-list",
            OpCode::Rule => "rule",
            OpCode::GrayOutIf => "grayout-if",
            OpCode::Date => "date",
            OpCode::Time => "time",
            OpCode::DisableIf => "disable-if",
            OpCode::OrderedList => "ordered-list",
            OpCode::VarStore => "varstore",
            OpCode::VarStoreNameValue => "varstore-name-value",
            OpCode::VarStoreEfi => "varstore-efi",
            OpCode::End => "end",
            OpCode::DefaultStore => "default-store",
            OpCode::Default => "default",
        }
    }
}

pub const QUESTION_HEADER_SIZE: usize = 2 + 2 + 2 + 2 + 2 + 1;

/// `{prompt, help, question_id, varstore_id, varstore_info, flags}`, shared
/// by every question-kind opcode body.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuestionHeader {
    pub prompt: StringId,
    pub help: StringId,
    pub question_id: u16,
    pub varstore_id: u16,
    pub varstore_info: u16,
    pub flags: u8,
}

pub mod question_flags {
    pub const READ_ONLY: u8 = 0x01;
    pub const CALLBACK: u8 = 0x04;
    pub const RESET_REQUIRED: u8 = 0x10;
    pub const LATE_CHECK: u8 = 0x20;
    pub const RECONNECT_REQUIRED: u8 = 0x40;
    pub const OPTIONS_ONLY: u8 = 0x80;
}

pub mod default_flags {
    pub const DEFAULT: u8 = 0x01;
    pub const DEFAULT_MFG: u8 = 0x02;
}

pub const DEFAULT_ID_STANDARD: u16 = 0x0000;
pub const DEFAULT_ID_MANUFACTURING: u16 = 0x0001;

/// Tags for the `default` opcode's `type(u8)` field: which numeric width
/// (or boolean) `value` holds, mirroring the NUM_SIZE_* / BOOLEAN split the
/// question-header numeric widths already use elsewhere in this file.
pub mod default_value_type {
    pub const NUM_SIZE_8: u8 = 0x00;
    pub const NUM_SIZE_16: u8 = 0x01;
    pub const NUM_SIZE_32: u8 = 0x02;
    pub const NUM_SIZE_64: u8 = 0x03;
    pub const BOOLEAN: u8 = 0x04;
}

/// Derive a `default` opcode's `type` byte from the byte width of a plain
/// numeric value (the caller uses `default_value_type::BOOLEAN` directly
/// for checkbox-shaped values instead, since width alone can't tell a
/// 1-byte boolean from a 1-byte `UINT8`).
pub fn default_value_type_for_width(width: usize) -> u8 {
    match width {
        1 => default_value_type::NUM_SIZE_8,
        2 => default_value_type::NUM_SIZE_16,
        4 => default_value_type::NUM_SIZE_32,
        _ => default_value_type::NUM_SIZE_64,
    }
}

impl QuestionHeader {
    pub fn to_bytes(self) -> [u8; QUESTION_HEADER_SIZE] {
        let mut out = [0u8; QUESTION_HEADER_SIZE];
        out[0..2].copy_from_slice(&self.prompt.to_le_bytes());
        out[2..4].copy_from_slice(&self.help.to_le_bytes());
        out[4..6].copy_from_slice(&self.question_id.to_le_bytes());
        out[6..8].copy_from_slice(&self.varstore_id.to_le_bytes());
        out[8..10].copy_from_slice(&self.varstore_info.to_le_bytes());
        out[10] = self.flags;
        out
    }
}

/// Package header: `{length:u24, type:u8}`. `type` is always `FORM` (0x02)
/// for an IFR forms package.
pub const PACKAGE_TYPE_FORM: u8 = 0x02;

pub fn package_header_bytes(payload_len: u32) -> [u8; 4] {
    let total = payload_len + 4;
    let mut out = [0u8; 4];
    out[0] = (total & 0xFF) as u8;
    out[1] = ((total >> 8) & 0xFF) as u8;
    out[2] = ((total >> 16) & 0xFF) as u8;
    out[3] = PACKAGE_TYPE_FORM;
    out
}

/// Encode the 2-byte opcode header: low 7 bits of the second byte are
/// length, high bit is scope-open.
pub fn header_bytes(op: OpCode, length: usize, scope_open: bool) -> Result<[u8; 2], usize> {
    if length > 0x7F {
        return Err(length);
    }
    let mut b1 = length as u8;
    if scope_open {
        b1 |= 0x80;
    }
    Ok([op as u8, b1])
}

pub fn guid_bytes(guid: Guid) -> [u8; 16] {
    guid.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bytes_rejects_overlong_records() {
        assert!(header_bytes(OpCode::End, 0x80, false).is_err());
    }

    #[test]
    fn header_bytes_sets_scope_bit() {
        let b = header_bytes(OpCode::Form, 7, true).unwrap();
        assert_eq!(b, [0x01, 0x87]);
    }

    #[test]
    fn package_header_includes_its_own_four_bytes() {
        let b = package_header_bytes(0x100);
        assert_eq!(b, [0x04, 0x01, 0x00, 0x02]);
    }

    #[test]
    fn question_header_round_trips_fields() {
        let qh = QuestionHeader {
            prompt: 1,
            help: 2,
            question_id: 0x10,
            varstore_id: 0x20,
            varstore_info: 0,
            flags: question_flags::LATE_CHECK,
        };
        let bytes = qh.to_bytes();
        assert_eq!(&bytes[4..6], &0x10u16.to_le_bytes());
        assert_eq!(&bytes[6..8], &0x20u16.to_le_bytes());
        assert_eq!(bytes[10], 0x20);
    }
}
