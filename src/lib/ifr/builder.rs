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

//! Builder context: the single value that replaces the reference
//! compiler's global singleton databases (Design Notes: "map global
//! singleton DBs to a Builder context value passed by reference"). Owns
//! every component (C1-C9) and exposes one method per opcode the rest of
//! the crate can drive a form package with. [`VfrFrontend`] is the seam a
//! parser (or, here, [`crate::ifr::frontend::ProgramFrontend`]) drives
//! through.

use crate::ifr::chunked_buffer::ChunkedBuffer;
use crate::ifr::chunked_buffer::PatchAddr;
use crate::ifr::defaults::DefaultStoreDB;
use crate::ifr::emitter::Delayed;
use crate::ifr::emitter::Emitter;
use crate::ifr::emitter::ScopeCounter;
use crate::ifr::error::BuilderError;
use crate::ifr::error::Diagnostic;
use crate::ifr::error::LineMap;
use crate::ifr::error::Result;
use crate::ifr::error::SourceLoc;
use crate::ifr::guid::Guid;
use crate::ifr::ids::IdRegistry;
use crate::ifr::opcode::default_flags;
use crate::ifr::opcode::header_bytes;
use crate::ifr::opcode::question_flags;
use crate::ifr::opcode::OpCode;
use crate::ifr::opcode::QuestionHeader;
use crate::ifr::opcode::StringId;
use crate::ifr::pending::PendingTable;
use crate::ifr::postprocess;
use crate::ifr::questions::QuestionDB;
use crate::ifr::questions::QuestionKind;
use crate::ifr::record_log::RecordLog;
use crate::ifr::types::TypeDB;
use crate::ifr::varstore::VarStoreDB;

/// Trait a frontend implements to drive a [`Builder`] to completion. The
/// VFR textual grammar and its expression/string front end are out of
/// scope here; [`crate::ifr::frontend::ProgramFrontend`] is the
/// structured-op-list stand-in that implements this trait.
pub trait VfrFrontend {
    fn drive(self, builder: &mut Builder) -> Result<()>;
}

pub struct Builder {
    pub buffer: ChunkedBuffer,
    pub log: RecordLog,
    pub scope: ScopeCounter,
    pub ids: IdRegistry,
    pub questions: QuestionDB,
    pub types: TypeDB,
    pub varstores: VarStoreDB,
    pub defaults: DefaultStoreDB,
    pub pending: PendingTable,
    pub line_map: LineMap,
    pub compat_mode: bool,
    /// Domain errors (redefinition, undefined reference, unsupported flags,
    /// datum-shape, ambiguous varstore) reported during parse; the builder
    /// keeps going past each one rather than aborting (§7's policy). Never
    /// populated with the fatal kinds, which short-circuit via `Result`.
    pub diagnostics: Vec<Diagnostic>,
    /// When set, any entry landing in `diagnostics` instead fails `finish()`
    /// (the "warning-as-error switch" the error-handling policy names).
    pub warnings_as_errors: bool,
}

impl Builder {
    pub fn new(compat_mode: bool, record_log: bool) -> Self {
        Builder {
            buffer: ChunkedBuffer::new(crate::ifr::chunked_buffer::DEFAULT_CHUNK_CAPACITY),
            log: RecordLog::new(record_log),
            scope: ScopeCounter::default(),
            ids: IdRegistry::new(),
            questions: QuestionDB::new(compat_mode),
            types: TypeDB::new(),
            varstores: VarStoreDB::new(),
            defaults: DefaultStoreDB::new(),
            pending: PendingTable::new(),
            line_map: LineMap::new(),
            compat_mode,
            diagnostics: Vec::new(),
            warnings_as_errors: false,
        }
    }

    pub fn loc(&self, line: u32) -> SourceLoc {
        self.line_map.resolve(line)
    }

    /// Handle a domain-or-fatal error from a step the caller can recover
    /// from by substituting a placeholder value: fatal kinds propagate,
    /// domain kinds are logged and pushed onto `diagnostics` so the caller
    /// can fall back and keep going (§7's "reported, builder continues").
    fn report_domain(&mut self, at: SourceLoc, e: BuilderError) -> Result<()> {
        if e.is_fatal() {
            return Err(e);
        }
        log::warn!("{e}");
        self.diagnostics.push(Diagnostic { at, message: e.to_string() });
        Ok(())
    }

    fn emitter(&mut self) -> Emitter<'_> {
        Emitter {
            buffer: &mut self.buffer,
            log: &mut self.log,
            scope: &mut self.scope,
        }
    }

    /// Resolve `varstore_name.field_path` (a buffer store) or a bare
    /// varstore name (an efi store, scalar access) into
    /// `(varstore_id, varstore_info, width_bytes)`.
    pub fn resolve_var(
        &mut self,
        varstore_name: &str,
        field_path: &str,
        guid: Option<Guid>,
        at: SourceLoc,
    ) -> Result<(u16, u16, usize)> {
        let vsid = match self
            .varstores
            .resolve(varstore_name, guid, |t| self.types.lookup(t).is_some(), at.clone())
        {
            Ok(vsid) => vsid,
            Err(e) => {
                self.report_domain(at.clone(), e)?;
                0
            }
        };
        if let Some(type_name) = self.varstores.buffer_type(vsid) {
            let full = format!("{type_name}.{field_path}");
            match self.types.resolve(&full, at.clone()) {
                Ok(resolved) => Ok((vsid, resolved.offset as u16, resolved.width)),
                Err(e) => {
                    self.report_domain(at, e)?;
                    Ok((vsid, 0, 1))
                }
            }
        } else {
            Ok((vsid, 0, 1))
        }
    }

    // ---- form-set / form / static text --------------------------------

    pub fn form_set_begin(
        &mut self,
        guid: Guid,
        title: StringId,
        help: StringId,
        line: u32,
    ) -> Result<()> {
        let mut d = Delayed::new(OpCode::FormSet, line);
        d.push(&crate::ifr::opcode::guid_bytes(guid));
        d.push(&title.to_le_bytes());
        d.push(&help.to_le_bytes());
        d.push(&[1]); // one class/subclass guid count kept as a fixed minimal tail
        let mut em = self.emitter();
        d.finish(&mut em)?;
        Ok(())
    }

    pub fn form_set_end(&mut self, line: u32) -> Result<()> {
        self.emitter().emit_fixed(OpCode::End, line, &[])?;
        Ok(())
    }

    pub fn form_begin(&mut self, id: Option<u16>, title: StringId, line: u32) -> Result<u16> {
        let at = self.loc(line);
        let form_id = match id {
            None => self.ids.forms.alloc(at)?,
            Some(id) => {
                if let Err(e) = self.ids.forms.mark_used(id, at.clone()) {
                    self.report_domain(at, e)?;
                    self.ids.forms.mark_used_allow_collision(id);
                }
                id
            }
        };
        let mut body = Vec::with_capacity(4);
        body.extend_from_slice(&form_id.to_le_bytes());
        body.extend_from_slice(&title.to_le_bytes());
        self.emitter().emit_fixed(OpCode::Form, line, &body)?;
        Ok(form_id)
    }

    pub fn form_end(&mut self, line: u32) -> Result<()> {
        self.emitter().emit_fixed(OpCode::End, line, &[])?;
        Ok(())
    }

    pub fn subtitle(&mut self, prompt: StringId, line: u32) -> Result<()> {
        self.emitter()
            .emit_fixed(OpCode::Subtitle, line, &prompt.to_le_bytes())?;
        Ok(())
    }

    pub fn text(&mut self, help: StringId, text: StringId, text_two: StringId, line: u32) -> Result<()> {
        let mut body = Vec::with_capacity(6);
        body.extend_from_slice(&help.to_le_bytes());
        body.extend_from_slice(&text.to_le_bytes());
        body.extend_from_slice(&text_two.to_le_bytes());
        self.emitter().emit_fixed(OpCode::Text, line, &body)?;
        Ok(())
    }

    // ---- varstores ------------------------------------------------------

    // ---- type system --------------------------------------------------

    pub fn declare_struct(&mut self, name: &str, line: u32) -> Result<()> {
        let at = self.loc(line);
        self.types.declare_struct(name, at)
    }

    pub fn add_field(
        &mut self,
        struct_name: &str,
        field_name: &str,
        field_type_name: &str,
        array_count: usize,
        bit_width: Option<u8>,
        line: u32,
    ) -> Result<()> {
        let at = self.loc(line);
        self.types
            .add_field(struct_name, field_name, field_type_name, array_count, bit_width, at)
    }

    pub fn push_pack(&mut self, n: Option<usize>, id: Option<u32>) {
        self.types.push_pack(n, id);
    }

    pub fn pop_pack(&mut self, id: Option<u32>) -> Result<()> {
        self.types.pop_pack(id)
    }

    pub fn assign_pack(&mut self, n: usize) {
        self.types.assign_pack(n);
    }

    // ---- varstores ------------------------------------------------------

    pub fn varstore_buffer(
        &mut self,
        name: &str,
        guid: Guid,
        type_name: &str,
        id: Option<u16>,
        line: u32,
    ) -> Result<u16> {
        let at = self.loc(line);
        let id = match id {
            None => self.ids.varstores.alloc(at.clone())?,
            Some(id) => {
                if let Err(e) = self.ids.varstores.mark_used(id, at.clone()) {
                    self.report_domain(at.clone(), e)?;
                    self.ids.varstores.mark_used_allow_collision(id);
                }
                id
            }
        };
        let size = match self.types.lookup(type_name) {
            Some(t) => t.total_size,
            None => {
                self.report_domain(
                    at.clone(),
                    BuilderError::UndefinedReference { at: at.clone(), name: type_name.to_string() },
                )?;
                0
            }
        };
        if let Err(e) = self.varstores.declare_buffer(name, guid, type_name, id, at.clone()) {
            self.report_domain(at.clone(), e)?;
        }

        let mut d = Delayed::new(OpCode::VarStore, line);
        d.push(&crate::ifr::opcode::guid_bytes(guid));
        d.push(&id.to_le_bytes());
        d.push(&(size as u16).to_le_bytes());
        d.push(name.as_bytes());
        d.push(&[0]);
        let mut em = self.emitter();
        d.finish(&mut em)?;
        Ok(id)
    }

    pub fn varstore_efi(
        &mut self,
        name: &str,
        guid: Guid,
        efi_name_string_id: StringId,
        size_bytes: u8,
        id: Option<u16>,
        line: u32,
    ) -> Result<u16> {
        let at = self.loc(line);
        let id = match id {
            None => self.ids.varstores.alloc(at.clone())?,
            Some(id) => {
                if let Err(e) = self.ids.varstores.mark_used(id, at.clone()) {
                    self.report_domain(at.clone(), e)?;
                    self.ids.varstores.mark_used_allow_collision(id);
                }
                id
            }
        };
        if let Err(e) = self.varstores.declare_efi(name, guid, efi_name_string_id, size_bytes, id, at.clone()) {
            self.report_domain(at, e)?;
        }

        let mut body = Vec::with_capacity(16 + 2 + 2 + 1);
        body.extend_from_slice(&crate::ifr::opcode::guid_bytes(guid));
        body.extend_from_slice(&id.to_le_bytes());
        body.push(0); // EFI_VARSTORE_ATTRIBUTE, unused here
        body.extend_from_slice(&(size_bytes as u32).to_le_bytes());
        body.extend_from_slice(&efi_name_string_id.to_le_bytes());
        self.emitter().emit_fixed(OpCode::VarStoreEfi, line, &body)?;
        Ok(id)
    }

    pub fn varstore_name_value_begin(&mut self, name: &str, id: Option<u16>, line: u32) -> Result<u16> {
        let at = self.loc(line);
        let id = match id {
            None => self.ids.varstores.alloc(at.clone())?,
            Some(id) => {
                if let Err(e) = self.ids.varstores.mark_used(id, at.clone()) {
                    self.report_domain(at, e)?;
                    self.ids.varstores.mark_used_allow_collision(id);
                }
                id
            }
        };
        self.varstores.declare_name_begin(name, id);
        Ok(id)
    }

    pub fn varstore_name_value_add(&mut self, string_id: StringId) {
        self.varstores.name_add(string_id);
    }

    pub fn varstore_name_value_end(&mut self, id: u16, guid: Guid, line: u32) -> Result<()> {
        self.varstores.name_end(guid)?;
        let mut body = Vec::with_capacity(2 + 16);
        body.extend_from_slice(&id.to_le_bytes());
        body.extend_from_slice(&crate::ifr::opcode::guid_bytes(guid));
        self.emitter().emit_fixed(OpCode::VarStoreNameValue, line, &body)?;
        self.emitter().emit_fixed(OpCode::End, line, &[])?;
        Ok(())
    }

    // ---- default-store ----------------------------------------------------

    pub fn default_store(
        &mut self,
        ref_name: &str,
        name_string_id: StringId,
        default_id: Option<u16>,
        line: u32,
    ) -> Result<u16> {
        let at = self.loc(line);
        let id = match default_id {
            None => self.ids.default_stores.alloc(at.clone())?,
            Some(id) => {
                if let Err(e) = self.ids.default_stores.mark_used(id, at.clone()) {
                    self.report_domain(at.clone(), e)?;
                    self.ids.default_stores.mark_used_allow_collision(id);
                }
                id
            }
        };
        if let Err(e) = self.defaults.register(ref_name, name_string_id, id, at.clone()) {
            self.report_domain(at, e)?;
        }
        let mut body = Vec::with_capacity(4);
        body.extend_from_slice(&name_string_id.to_le_bytes());
        body.extend_from_slice(&id.to_le_bytes());
        self.emitter().emit_fixed(OpCode::DefaultStore, line, &body)?;
        Ok(id)
    }

    // ---- question header helper --------------------------------------

    fn question_header(
        &mut self,
        name: Option<&str>,
        varid_key: &str,
        varstore_id: u16,
        varstore_info: u16,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        kind: QuestionKind,
        line: u32,
    ) -> Result<QuestionHeader> {
        let at = self.loc(line);
        let question_id = match kind {
            QuestionKind::Normal => match self.questions.register(
                name,
                varid_key,
                id,
                &mut self.ids,
                &mut self.buffer,
                &mut self.pending,
                at.clone(),
            ) {
                Ok(qid) => qid,
                Err(e) => {
                    self.report_domain(at.clone(), e)?;
                    let qid = id.unwrap_or(0);
                    self.ids.questions.mark_used_allow_collision(qid);
                    qid
                }
            },
            _ => unreachable!("composite kinds use their own register_* entry points"),
        };
        if let Some(n) = name {
            self.pending.resolve(&mut self.buffer, n, &question_id.to_le_bytes());
        }
        Ok(QuestionHeader {
            prompt,
            help,
            question_id,
            varstore_id,
            varstore_info,
            flags,
        })
    }

    // ---- scalar questions -----------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn numeric_question(
        &mut self,
        name: Option<&str>,
        varstore_name: &str,
        field_path: &str,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        min: u64,
        max: u64,
        step: u64,
        line: u32,
    ) -> Result<u16> {
        let at = self.loc(line);
        let (vsid, info, width) = self.resolve_var(varstore_name, field_path, None, at)?;
        let varid_key = format!("{varstore_name}.{field_path}");
        let qh = self.question_header(
            name,
            &varid_key,
            vsid,
            info,
            prompt,
            help,
            id,
            flags,
            QuestionKind::Normal,
            line,
        )?;

        let mut d = Delayed::new(OpCode::Numeric, line);
        d.push(&qh.to_bytes());
        match width {
            1 => {
                d.push(&(min as u8).to_le_bytes());
                d.push(&(max as u8).to_le_bytes());
                d.push(&(step as u8).to_le_bytes());
            }
            2 => {
                d.push(&(min as u16).to_le_bytes());
                d.push(&(max as u16).to_le_bytes());
                d.push(&(step as u16).to_le_bytes());
            }
            4 => {
                d.push(&(min as u32).to_le_bytes());
                d.push(&(max as u32).to_le_bytes());
                d.push(&(step as u32).to_le_bytes());
            }
            _ => {
                d.push(&min.to_le_bytes());
                d.push(&max.to_le_bytes());
                d.push(&step.to_le_bytes());
            }
        }
        let mut em = self.emitter();
        d.finish(&mut em)?;
        Ok(qh.question_id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn checkbox_question(
        &mut self,
        name: Option<&str>,
        varstore_name: &str,
        field_path: &str,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        default_flags_byte: u8,
        line: u32,
    ) -> Result<u16> {
        let at = self.loc(line);
        let (vsid, info, _width) = self.resolve_var(varstore_name, field_path, None, at)?;
        let varid_key = format!("{varstore_name}.{field_path}");
        let qh = self.question_header(
            name,
            &varid_key,
            vsid,
            info,
            prompt,
            help,
            id,
            flags,
            QuestionKind::Normal,
            line,
        )?;
        let mut body = qh.to_bytes().to_vec();
        body.push(default_flags_byte); // which default-store ids this checkbox claims via flag bits
        self.emitter().emit_fixed(OpCode::CheckBox, line, &body)?;
        Ok(qh.question_id)
    }

    // ---- one-of / ordered-list (scope-opening, options nested) ----------

    pub fn one_of_begin(
        &mut self,
        name: Option<&str>,
        varstore_name: &str,
        field_path: &str,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        line: u32,
    ) -> Result<u16> {
        let at = self.loc(line);
        let (vsid, info, width) = self.resolve_var(varstore_name, field_path, None, at)?;
        let varid_key = format!("{varstore_name}.{field_path}");
        let qh = self.question_header(
            name,
            &varid_key,
            vsid,
            info,
            prompt,
            help,
            id,
            flags,
            QuestionKind::Normal,
            line,
        )?;
        let mut body = qh.to_bytes().to_vec();
        body.push(width.min(8) as u8);
        self.emitter().emit_fixed(OpCode::OneOf, line, &body)?;
        Ok(qh.question_id)
    }

    pub fn one_of_option(
        &mut self,
        option_text: StringId,
        value: &[u8],
        flags: u8,
        line: u32,
    ) -> Result<()> {
        let mut d = Delayed::new(OpCode::OneOfOption, line);
        d.push(&option_text.to_le_bytes());
        d.push(&[flags, value.len().min(8) as u8]);
        d.push(value);
        let mut em = self.emitter();
        d.finish(&mut em)?;
        Ok(())
    }

    pub fn one_of_end(&mut self, line: u32) -> Result<()> {
        self.emitter().emit_fixed(OpCode::End, line, &[])?;
        Ok(())
    }

    pub fn ordered_list_begin(
        &mut self,
        name: Option<&str>,
        varstore_name: &str,
        field_path: &str,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        max_containers: u8,
        line: u32,
    ) -> Result<u16> {
        let at = self.loc(line);
        let (vsid, info, width) = self.resolve_var(varstore_name, field_path, None, at)?;
        let varid_key = format!("{varstore_name}.{field_path}");
        let qh = self.question_header(
            name,
            &varid_key,
            vsid,
            info,
            prompt,
            help,
            id,
            flags,
            QuestionKind::Normal,
            line,
        )?;
        let mut body = qh.to_bytes().to_vec();
        body.push(width.min(8) as u8);
        body.push(max_containers);
        self.emitter().emit_fixed(OpCode::OrderedList, line, &body)?;
        Ok(qh.question_id)
    }

    pub fn ordered_list_end(&mut self, line: u32) -> Result<()> {
        self.emitter().emit_fixed(OpCode::End, line, &[])?;
        Ok(())
    }

    // ---- date / time / ref composite questions ---------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn date_question(
        &mut self,
        varstore_year: &str,
        varstore_month: &str,
        varstore_day: &str,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        line: u32,
    ) -> Result<u16> {
        let at = self.loc(line);
        let question_id = match self.questions.register_date(
            varstore_year,
            varstore_month,
            varstore_day,
            id,
            &mut self.ids,
            &mut self.buffer,
            &mut self.pending,
            at.clone(),
        ) {
            Ok(qid) => qid,
            Err(e) => {
                self.report_domain(at.clone(), e)?;
                let qid = id.unwrap_or(0);
                self.ids.questions.mark_used_allow_collision(qid);
                qid
            }
        };
        let qh = QuestionHeader {
            prompt,
            help,
            question_id,
            varstore_id: 0,
            varstore_info: 0,
            flags,
        };
        self.emitter().emit_fixed(OpCode::Date, line, &qh.to_bytes())?;
        Ok(question_id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn time_question(
        &mut self,
        varstore_hour: &str,
        varstore_minute: &str,
        varstore_second: &str,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        line: u32,
    ) -> Result<u16> {
        let at = self.loc(line);
        let question_id = match self.questions.register_time(
            varstore_hour,
            varstore_minute,
            varstore_second,
            id,
            &mut self.ids,
            &mut self.buffer,
            &mut self.pending,
            at.clone(),
        ) {
            Ok(qid) => qid,
            Err(e) => {
                self.report_domain(at.clone(), e)?;
                let qid = id.unwrap_or(0);
                self.ids.questions.mark_used_allow_collision(qid);
                qid
            }
        };
        let qh = QuestionHeader {
            prompt,
            help,
            question_id,
            varstore_id: 0,
            varstore_info: 0,
            flags,
        };
        self.emitter().emit_fixed(OpCode::Time, line, &qh.to_bytes())?;
        Ok(question_id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn ref_question(
        &mut self,
        name: Option<&str>,
        base_varid: &str,
        prompt: StringId,
        help: StringId,
        id: Option<u16>,
        flags: u8,
        line: u32,
    ) -> Result<u16> {
        let at = self.loc(line);
        let question_id = match self.questions.register_ref(
            name,
            base_varid,
            id,
            &mut self.ids,
            &mut self.buffer,
            &mut self.pending,
            at.clone(),
        ) {
            Ok(qid) => qid,
            Err(e) => {
                self.report_domain(at.clone(), e)?;
                let qid = id.unwrap_or(0);
                self.ids.questions.mark_used_allow_collision(qid);
                qid
            }
        };
        if let Some(n) = name {
            self.pending.resolve(&mut self.buffer, n, &question_id.to_le_bytes());
        }
        let qh = QuestionHeader {
            prompt,
            help,
            question_id,
            varstore_id: 0,
            varstore_info: 0,
            flags,
        };
        let mut body = qh.to_bytes().to_vec();
        body.extend_from_slice(&[0, 0]); // form-id filled in by pending resolution
        self.emitter().emit_fixed(OpCode::Ref, line, &body)?;
        Ok(question_id)
    }

    pub fn ref_end(&mut self, line: u32) -> Result<()> {
        self.emitter().emit_fixed(OpCode::End, line, &[])?;
        Ok(())
    }

    // ---- expression scopes ------------------------------------------------

    pub fn suppress_if_begin(&mut self, line: u32) -> Result<()> {
        self.emitter().emit_fixed(OpCode::SuppressIf, line, &[])?;
        Ok(())
    }

    pub fn no_submit_if_begin(&mut self, error_text: StringId, line: u32) -> Result<()> {
        self.emitter()
            .emit_fixed(OpCode::NoSubmitIf, line, &error_text.to_le_bytes())?;
        Ok(())
    }

    pub fn inconsistent_if_begin(&mut self, error_text: StringId, line: u32) -> Result<()> {
        self.emitter()
            .emit_fixed(OpCode::InconsistentIf, line, &error_text.to_le_bytes())?;
        Ok(())
    }

    pub fn gray_out_if_begin(&mut self, line: u32) -> Result<()> {
        self.emitter().emit_fixed(OpCode::GrayOutIf, line, &[])?;
        Ok(())
    }

    pub fn disable_if_begin(&mut self, line: u32) -> Result<()> {
        self.emitter().emit_fixed(OpCode::DisableIf, line, &[])?;
        Ok(())
    }

    pub fn scope_end(&mut self, line: u32) -> Result<()> {
        self.emitter().emit_fixed(OpCode::End, line, &[])?;
        Ok(())
    }

    /// A question referenced by name inside an expression; resolves
    /// immediately if already registered, otherwise records a pending
    /// patch against the 2-byte question-id operand reserved at `addr`.
    pub fn question_ref_operand(&mut self, name: &str, line: u32) -> Result<PatchAddr> {
        let addr = self.buffer.reserve(2)?;
        match self.questions.lookup_by_name(name) {
            Some(l) => self.buffer.write(addr, &l.question_id.to_le_bytes()),
            None => {
                let at = self.loc(line);
                self.pending
                    .add(name.to_string(), addr, 2, at, format!("question id for {name:?}"));
            }
        }
        Ok(addr)
    }

    pub fn eq_id_val(&mut self, question_name: &str, value: u16, line: u32) -> Result<()> {
        let addr = self.question_ref_operand(question_name, line)?;
        let question_id = u16::from_le_bytes(self.buffer.read(addr, 2).try_into().unwrap());
        let mut body = Vec::with_capacity(4);
        body.extend_from_slice(&question_id.to_le_bytes());
        body.extend_from_slice(&value.to_le_bytes());
        self.emitter().emit_fixed(OpCode::EqIdVal, line, &body)?;
        Ok(())
    }

    pub fn eq_id_id(&mut self, question_a: &str, question_b: &str, line: u32) -> Result<()> {
        let a = self.question_ref_operand(question_a, line)?;
        let b = self.question_ref_operand(question_b, line)?;
        let a_id = u16::from_le_bytes(self.buffer.read(a, 2).try_into().unwrap());
        let b_id = u16::from_le_bytes(self.buffer.read(b, 2).try_into().unwrap());
        let mut body = Vec::with_capacity(4);
        body.extend_from_slice(&a_id.to_le_bytes());
        body.extend_from_slice(&b_id.to_le_bytes());
        self.emitter().emit_fixed(OpCode::EqIdId, line, &body)?;
        Ok(())
    }

    pub fn eq_id_val_list(&mut self, question_name: &str, values: &[u16], line: u32) -> Result<()> {
        let addr = self.question_ref_operand(question_name, line)?;
        let question_id = u16::from_le_bytes(self.buffer.read(addr, 2).try_into().unwrap());
        let mut d = Delayed::new(OpCode::EqIdValList, line);
        d.push(&question_id.to_le_bytes());
        d.push(&(values.len() as u16).to_le_bytes());
        for v in values {
            d.push(&v.to_le_bytes());
        }
        let mut em = self.emitter();
        d.finish(&mut em)?;
        Ok(())
    }

    // ---- rule ---------------------------------------------------------

    pub fn rule_begin(&mut self, name: &str, id: Option<u16>, line: u32) -> Result<u16> {
        let at = self.loc(line);
        let rule_id = match id {
            None => self.ids.rules.alloc(at.clone())?,
            Some(id) => {
                if let Err(e) = self.ids.rules.mark_used(id, at.clone()) {
                    self.report_domain(at.clone(), e)?;
                    self.ids.rules.mark_used_allow_collision(id);
                }
                id
            }
        };
        self.pending.resolve(&mut self.buffer, &format!("rule:{name}"), &rule_id.to_le_bytes());
        // the rule opcode body only has an 8-bit field for the id; the
        // shared id pool is unbounded, so ids past it get reported and
        // wrap instead of silently truncating unnoticed.
        let body_id = if rule_id > u8::MAX as u16 {
            self.report_domain(
                at,
                BuilderError::DatumShape {
                    at: self.loc(line),
                    message: format!(
                        "rule id {rule_id} exceeds the 8-bit width the rule opcode encodes it in"
                    ),
                },
            )?;
            rule_id as u8
        } else {
            rule_id as u8
        };
        self.emitter().emit_fixed(OpCode::Rule, line, &[body_id])?;
        Ok(rule_id)
    }

    pub fn rule_end(&mut self, line: u32) -> Result<()> {
        self.emitter().emit_fixed(OpCode::End, line, &[])?;
        Ok(())
    }

    // ---- default --------------------------------------------------------

    pub fn default(&mut self, default_id: u16, value: &[u8], flags: u8, line: u32) -> Result<()> {
        let value_type = crate::ifr::opcode::default_value_type_for_width(value.len());
        let mut d = Delayed::new(OpCode::Default, line);
        d.push(&default_id.to_le_bytes());
        d.push(&[value_type]);
        d.push(value);
        if flags & default_flags::DEFAULT_MFG != 0 {
            // the manufacturing-default flavor is distinguished purely by
            // which default_id was used, not by a body flag byte
        }
        let mut em = self.emitter();
        d.finish(&mut em)?;
        Ok(())
    }

    // ---- late check / question flags sanity ------------------------------

    pub fn validate_question_flags(&self, opcode: &'static str, flags: u8, line: u32) -> Result<()> {
        const SUPPORTED: u8 = question_flags::READ_ONLY
            | question_flags::CALLBACK
            | question_flags::RESET_REQUIRED
            | question_flags::LATE_CHECK
            | question_flags::RECONNECT_REQUIRED
            | question_flags::OPTIONS_ONLY;
        let unsupported = flags & !SUPPORTED;
        if unsupported != 0 {
            return Err(BuilderError::FlagsUnsupported {
                at: self.loc(line),
                opcode,
                bit: unsupported,
            });
        }
        Ok(())
    }

    // ---- finalisation ----------------------------------------------------

    /// Run the compatibility-mode record-list adjustments (if enabled),
    /// check every pending reference resolved, verify the record log and
    /// chunk buffer agree, and return the finished package bytes.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        if self.log.is_enabled() {
            let active_ids = self.defaults.active_ids();
            postprocess::synthesize_missing_defaults(&mut self.buffer, &mut self.log, &active_ids)?;
        }
        if self.compat_mode && self.log.is_enabled() {
            postprocess::adjust_inconsistent_if_to_question_scope(&mut self.buffer, &mut self.log)?;
            postprocess::adjust_late_varstores_before_first_form(&mut self.buffer, &mut self.log)?;
        }
        self.pending.check_all_resolved()?;
        if self.log.is_enabled() {
            postprocess::consistency_check(&self.buffer, &self.log)?;
        }
        if self.warnings_as_errors && !self.diagnostics.is_empty() {
            let summary = self.diagnostics.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("; ");
            return Err(BuilderError::Other(anyhow::anyhow!(
                "{} diagnostic(s) promoted to errors by --warnings-as-errors: {summary}",
                self.diagnostics.len()
            )));
        }
        Ok(crate::ifr::serialize::package_bytes(&self.buffer))
    }

    pub fn header_len_check(length: usize) -> Result<()> {
        if length > 0x7F {
            return Err(BuilderError::LengthOverflow { length });
        }
        let _ = header_bytes(OpCode::End, length, false);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_formset_round_trips_through_finish() {
        let mut b = Builder::new(false, true);
        b.form_set_begin(Guid::ZERO, 1, 2, 1).unwrap();
        b.form_begin(Some(1), 3, 2).unwrap();
        b.form_end(3).unwrap();
        b.form_set_end(4).unwrap();

        let pkg = b.finish().unwrap();
        assert_eq!(pkg[3], 0x02);
        assert!(pkg.len() > 4);
    }

    #[test]
    fn numeric_question_resolves_buffer_field_offset() {
        let mut b = Builder::new(false, true);
        b.types.declare_struct("S", b.loc(1)).unwrap();
        b.types.add_field("S", "x", "UINT16", 0, None, b.loc(1)).unwrap();
        b.varstore_buffer("MyVar", Guid::ZERO, "S", Some(0x20), 1).unwrap();

        let qid = b
            .numeric_question(Some("Q1"), "MyVar", "x", 10, 11, Some(0x5), 0, 0, 100, 1, 2)
            .unwrap();
        assert_eq!(qid, 0x5);
        assert!(b.pending.check_all_resolved().is_ok());
    }

    #[test]
    fn question_ref_operand_pending_resolves_on_later_registration() {
        let mut b = Builder::new(false, true);
        b.types.declare_struct("S", b.loc(1)).unwrap();
        b.types.add_field("S", "x", "UINT8", 0, None, b.loc(1)).unwrap();
        b.varstore_buffer("V", Guid::ZERO, "S", Some(0x10), 1).unwrap();

        // reference Q1 before it's declared
        b.eq_id_val("Q1", 5, 1).unwrap();
        assert_eq!(b.pending.pending_count(), 1);

        b.numeric_question(Some("Q1"), "V", "x", 1, 2, None, 0, 0, 10, 1, 2).unwrap();
        assert!(b.pending.check_all_resolved().is_ok());
    }
}
