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

//! Structured op-list frontend: a serde-deserializable stand-in for the
//! VFR textual grammar (parsing that grammar is explicitly out of scope).
//! `BuilderOp` is one entry per surface the builder exposes; a JSON/YAML
//! document deserializes straight into `Vec<BuilderOp>` and
//! [`ProgramFrontend`] replays it against a [`crate::ifr::builder::Builder`].

use serde::Deserialize;

use crate::ifr::builder::Builder;
use crate::ifr::builder::VfrFrontend;
use crate::ifr::error::Result;
use crate::ifr::guid::Guid;
use crate::ifr::opcode::StringId;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum BuilderOp {
    FormSetBegin {
        guid: Guid,
        title: StringId,
        help: StringId,
        line: u32,
    },
    FormSetEnd {
        line: u32,
    },
    FormBegin {
        id: Option<u16>,
        title: StringId,
        line: u32,
    },
    FormEnd {
        line: u32,
    },
    Subtitle {
        prompt: StringId,
        line: u32,
    },
    Text {
        help: StringId,
        text: StringId,
        text_two: StringId,
        line: u32,
    },
    VarStoreBuffer {
        name: String,
        guid: Guid,
        type_name: String,
        id: Option<u16>,
        line: u32,
    },
    VarStoreEfi {
        name: String,
        guid: Guid,
        efi_name_string_id: StringId,
        size_bytes: u8,
        id: Option<u16>,
        line: u32,
    },
    VarStoreNameValueBegin {
        name: String,
        id: Option<u16>,
        line: u32,
    },
    VarStoreNameValueAdd {
        string_id: StringId,
    },
    VarStoreNameValueEnd {
        id: u16,
        guid: Guid,
        line: u32,
    },
    DefaultStore {
        ref_name: String,
        name_string_id: StringId,
        default_id: Option<u16>,
        line: u32,
    },
    Numeric {
        name: Option<String>,
        varstore: String,
        field: String,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        min: u64,
        max: u64,
        step: u64,
        line: u32,
    },
    CheckBox {
        name: Option<String>,
        varstore: String,
        field: String,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        #[serde(default)]
        default_flags: u8,
        line: u32,
    },
    OneOfBegin {
        name: Option<String>,
        varstore: String,
        field: String,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        line: u32,
    },
    OneOfOption {
        text: StringId,
        value: Vec<u8>,
        flags: u8,
        line: u32,
    },
    OneOfEnd {
        line: u32,
    },
    OrderedListBegin {
        name: Option<String>,
        varstore: String,
        field: String,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        max_containers: u8,
        line: u32,
    },
    OrderedListEnd {
        line: u32,
    },
    Date {
        varstore_year: String,
        varstore_month: String,
        varstore_day: String,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        line: u32,
    },
    Time {
        varstore_hour: String,
        varstore_minute: String,
        varstore_second: String,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        line: u32,
    },
    RefBegin {
        name: Option<String>,
        base_varid: String,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        line: u32,
    },
    RefEnd {
        line: u32,
    },
    SuppressIfBegin {
        line: u32,
    },
    NoSubmitIfBegin {
        error_text: StringId,
        line: u32,
    },
    InconsistentIfBegin {
        error_text: StringId,
        line: u32,
    },
    GrayOutIfBegin {
        line: u32,
    },
    DisableIfBegin {
        line: u32,
    },
    ScopeEnd {
        line: u32,
    },
    EqIdVal {
        question: String,
        value: u16,
        line: u32,
    },
    EqIdId {
        question_a: String,
        question_b: String,
        line: u32,
    },
    EqIdValList {
        question: String,
        values: Vec<u16>,
        line: u32,
    },
    RuleBegin {
        name: String,
        id: Option<u16>,
        line: u32,
    },
    RuleEnd {
        line: u32,
    },
    Default {
        default_id: u16,
        value: Vec<u8>,
        flags: u8,
        line: u32,
    },
    DeclareStruct {
        name: String,
        line: u32,
    },
    AddField {
        struct_name: String,
        field_name: String,
        field_type_name: String,
        array_count: usize,
        bit_width: Option<u8>,
        line: u32,
    },
    PushPack {
        n: Option<usize>,
        id: Option<u32>,
    },
    PopPack {
        id: Option<u32>,
    },
    AssignPack {
        n: usize,
    },
}

/// Replays a deserialized `Vec<BuilderOp>` against a `Builder`, in order.
pub struct ProgramFrontend {
    pub ops: Vec<BuilderOp>,
}

impl ProgramFrontend {
    pub fn new(ops: Vec<BuilderOp>) -> Self {
        ProgramFrontend { ops }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let ops: Vec<BuilderOp> = serde_json::from_str(text)
            .map_err(|e| crate::ifr::error::BuilderError::Other(anyhow::anyhow!(e)))?;
        Ok(ProgramFrontend { ops })
    }
}

impl VfrFrontend for ProgramFrontend {
    fn drive(self, b: &mut Builder) -> Result<()> {
        for op in self.ops {
            apply(b, op)?;
        }
        Ok(())
    }
}

fn apply(b: &mut Builder, op: BuilderOp) -> Result<()> {
    use BuilderOp::*;
    match op {
        FormSetBegin { guid, title, help, line } => b.form_set_begin(guid, title, help, line),
        FormSetEnd { line } => b.form_set_end(line),
        FormBegin { id, title, line } => b.form_begin(id, title, line).map(|_| ()),
        FormEnd { line } => b.form_end(line),
        Subtitle { prompt, line } => b.subtitle(prompt, line),
        Text { help, text, text_two, line } => b.text(help, text, text_two, line),
        VarStoreBuffer { name, guid, type_name, id, line } => {
            b.varstore_buffer(&name, guid, &type_name, id, line).map(|_| ())
        }
        VarStoreEfi { name, guid, efi_name_string_id, size_bytes, id, line } => b
            .varstore_efi(&name, guid, efi_name_string_id, size_bytes, id, line)
            .map(|_| ()),
        VarStoreNameValueBegin { name, id, line } => {
            b.varstore_name_value_begin(&name, id, line).map(|_| ())
        }
        VarStoreNameValueAdd { string_id } => {
            b.varstore_name_value_add(string_id);
            Ok(())
        }
        VarStoreNameValueEnd { id, guid, line } => b.varstore_name_value_end(id, guid, line),
        DefaultStore { ref_name, name_string_id, default_id, line } => b
            .default_store(&ref_name, name_string_id, default_id, line)
            .map(|_| ()),
        Numeric { name, varstore, field, prompt, help, id, flags, min, max, step, line } => b
            .numeric_question(
                name.as_deref(),
                &varstore,
                &field,
                prompt,
                help,
                id,
                flags,
                min,
                max,
                step,
                line,
            )
            .map(|_| ()),
        CheckBox { name, varstore, field, prompt, help, id, flags, default_flags, line } => b
            .checkbox_question(name.as_deref(), &varstore, &field, prompt, help, id, flags, default_flags, line)
            .map(|_| ()),
        OneOfBegin { name, varstore, field, prompt, help, id, flags, line } => b
            .one_of_begin(name.as_deref(), &varstore, &field, prompt, help, id, flags, line)
            .map(|_| ()),
        OneOfOption { text, value, flags, line } => b.one_of_option(text, &value, flags, line),
        OneOfEnd { line } => b.one_of_end(line),
        OrderedListBegin { name, varstore, field, prompt, help, id, flags, max_containers, line } => b
            .ordered_list_begin(
                name.as_deref(),
                &varstore,
                &field,
                prompt,
                help,
                id,
                flags,
                max_containers,
                line,
            )
            .map(|_| ()),
        OrderedListEnd { line } => b.ordered_list_end(line),
        Date { varstore_year, varstore_month, varstore_day, prompt, help, id, flags, line } => b
            .date_question(&varstore_year, &varstore_month, &varstore_day, prompt, help, id, flags, line)
            .map(|_| ()),
        Time { varstore_hour, varstore_minute, varstore_second, prompt, help, id, flags, line } => b
            .time_question(
                &varstore_hour,
                &varstore_minute,
                &varstore_second,
                prompt,
                help,
                id,
                flags,
                line,
            )
            .map(|_| ()),
        RefBegin { name, base_varid, prompt, help, id, flags, line } => b
            .ref_question(name.as_deref(), &base_varid, prompt, help, id, flags, line)
            .map(|_| ()),
        RefEnd { line } => b.ref_end(line),
        SuppressIfBegin { line } => b.suppress_if_begin(line),
        NoSubmitIfBegin { error_text, line } => b.no_submit_if_begin(error_text, line),
        InconsistentIfBegin { error_text, line } => b.inconsistent_if_begin(error_text, line),
        GrayOutIfBegin { line } => b.gray_out_if_begin(line),
        DisableIfBegin { line } => b.disable_if_begin(line),
        ScopeEnd { line } => b.scope_end(line),
        EqIdVal { question, value, line } => b.eq_id_val(&question, value, line),
        EqIdId { question_a, question_b, line } => b.eq_id_id(&question_a, &question_b, line),
        EqIdValList { question, values, line } => b.eq_id_val_list(&question, &values, line),
        RuleBegin { name, id, line } => b.rule_begin(&name, id, line).map(|_| ()),
        RuleEnd { line } => b.rule_end(line),
        Default { default_id, value, flags, line } => b.default(default_id, &value, flags, line),
        DeclareStruct { name, line } => b.declare_struct(&name, line),
        AddField { struct_name, field_name, field_type_name, array_count, bit_width, line } => b
            .add_field(&struct_name, &field_name, &field_type_name, array_count, bit_width, line),
        PushPack { n, id } => {
            b.push_pack(n, id);
            Ok(())
        }
        PopPack { id } => b.pop_pack(id),
        AssignPack { n } => {
            b.assign_pack(n);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_program_builds_a_minimal_formset() {
        let json = r#"[
            {"op": "form-set-begin", "guid": {"data1":0,"data2":0,"data3":0,"data4":[0,0,0,0,0,0,0,0]}, "title": 1, "help": 2, "line": 1},
            {"op": "form-begin", "id": 1, "title": 3, "line": 2},
            {"op": "form-end", "line": 3},
            {"op": "form-set-end", "line": 4}
        ]"#;
        let frontend = ProgramFrontend::from_json(json).unwrap();
        let mut b = Builder::new(false, true);
        frontend.drive(&mut b).unwrap();
        let pkg = b.finish().unwrap();
        assert_eq!(pkg[3], 0x02);
    }

    #[test]
    fn json_program_declares_a_struct_with_packing() {
        let json = r#"[
            {"op": "push-pack", "n": 1, "id": null},
            {"op": "declare-struct", "name": "S", "line": 1},
            {"op": "add-field", "struct_name": "S", "field_name": "a", "field_type_name": "UINT8", "array_count": 0, "bit_width": null, "line": 2},
            {"op": "add-field", "struct_name": "S", "field_name": "b", "field_type_name": "UINT32", "array_count": 0, "bit_width": null, "line": 3},
            {"op": "pop-pack", "id": null}
        ]"#;
        let frontend = ProgramFrontend::from_json(json).unwrap();
        let mut b = Builder::new(false, false);
        frontend.drive(&mut b).unwrap();
        // pack(1) forces byte-packing, so `b` sits right after `a` instead
        // of being aligned up to a 4-byte boundary.
        let s = b.types.lookup("S").unwrap();
        assert_eq!(s.fields[1].offset, 1);
    }
}
