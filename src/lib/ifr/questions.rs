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

//! Question name/varid registry (C5), including composite-question
//! synthesis: date/time/ref questions share one `question_id` across
//! multiple sub-records discriminated by `bitmask`.

use std::collections::HashMap;

use crate::ifr::chunked_buffer::ChunkedBuffer;
use crate::ifr::error::BuilderError;
use crate::ifr::error::Result;
use crate::ifr::error::SourceLoc;
use crate::ifr::ids::IdRegistry;
use crate::ifr::pending::PendingTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Normal,
    Date,
    Time,
    Ref,
}

pub mod bitmask {
    pub const YEAR: u8 = 0x01;
    pub const MONTH: u8 = 0x02;
    pub const DAY: u8 = 0x04;
    pub const HOUR: u8 = 0x01;
    pub const MINUTE: u8 = 0x02;
    pub const SECOND: u8 = 0x04;
    pub const QUESTION_ID: u8 = 0x01;
    pub const FORM_ID: u8 = 0x02;
    pub const FORM_SET_GUID: u8 = 0x04;
    pub const DEVICE_PATH: u8 = 0x08;
}

#[derive(Debug, Clone)]
struct QuestionRecord {
    question_id: u16,
    bitmask: u8,
    kind: QuestionKind,
}

#[derive(Default)]
pub struct QuestionDB {
    by_name: HashMap<String, usize>,
    by_varid: HashMap<String, usize>,
    records: Vec<QuestionRecord>,
    /// in compatibility mode the question-id pool is not checked for
    /// redefinition (IdRegistry §4.4)
    pub compat_mode: bool,
}

pub struct Lookup {
    pub question_id: u16,
    pub bitmask: u8,
    pub kind: QuestionKind,
}

impl QuestionDB {
    pub fn new(compat_mode: bool) -> Self {
        QuestionDB {
            compat_mode,
            ..Default::default()
        }
    }

    fn allocate_or_mark(
        &self,
        ids: &mut IdRegistry,
        id: Option<u16>,
        at: SourceLoc,
    ) -> Result<u16> {
        match id {
            None => ids.questions.alloc(at),
            Some(id) => {
                if self.compat_mode {
                    ids.questions.mark_used_allow_collision(id);
                } else {
                    ids.questions.mark_used(id, at)?;
                }
                Ok(id)
            }
        }
    }

    fn bind_varid(
        &mut self,
        varid: &str,
        question_id: u16,
        bitmask: u8,
        kind: QuestionKind,
        buffer: &mut ChunkedBuffer,
        pending: &mut PendingTable,
    ) {
        let idx = self.records.len();
        self.records.push(QuestionRecord {
            question_id,
            bitmask,
            kind,
        });
        self.by_varid.insert(varid.to_string(), idx);
        pending.resolve(buffer, varid, &question_id.to_le_bytes());
    }

    pub fn register(
        &mut self,
        name: Option<&str>,
        varid: &str,
        id: Option<u16>,
        ids: &mut IdRegistry,
        buffer: &mut ChunkedBuffer,
        pending: &mut PendingTable,
        at: SourceLoc,
    ) -> Result<u16> {
        if let Some(name) = name {
            if self.by_name.contains_key(name) {
                return Err(BuilderError::Redefined {
                    at,
                    what: "question",
                    name: name.to_string(),
                });
            }
        }
        let question_id = self.allocate_or_mark(ids, id, at)?;
        self.bind_varid(varid, question_id, 0, QuestionKind::Normal, buffer, pending);
        if let Some(name) = name {
            let idx = self.by_varid[varid];
            self.by_name.insert(name.to_string(), idx);
        }
        Ok(question_id)
    }

    pub fn register_date(
        &mut self,
        varid_year: &str,
        varid_month: &str,
        varid_day: &str,
        id: Option<u16>,
        ids: &mut IdRegistry,
        buffer: &mut ChunkedBuffer,
        pending: &mut PendingTable,
        at: SourceLoc,
    ) -> Result<u16> {
        let question_id = self.allocate_or_mark(ids, id, at)?;
        self.bind_varid(varid_year, question_id, bitmask::YEAR, QuestionKind::Date, buffer, pending);
        self.bind_varid(varid_month, question_id, bitmask::MONTH, QuestionKind::Date, buffer, pending);
        self.bind_varid(varid_day, question_id, bitmask::DAY, QuestionKind::Date, buffer, pending);
        Ok(question_id)
    }

    pub fn register_time(
        &mut self,
        varid_hour: &str,
        varid_minute: &str,
        varid_second: &str,
        id: Option<u16>,
        ids: &mut IdRegistry,
        buffer: &mut ChunkedBuffer,
        pending: &mut PendingTable,
        at: SourceLoc,
    ) -> Result<u16> {
        let question_id = self.allocate_or_mark(ids, id, at)?;
        self.bind_varid(varid_hour, question_id, bitmask::HOUR, QuestionKind::Time, buffer, pending);
        self.bind_varid(varid_minute, question_id, bitmask::MINUTE, QuestionKind::Time, buffer, pending);
        self.bind_varid(varid_second, question_id, bitmask::SECOND, QuestionKind::Time, buffer, pending);
        Ok(question_id)
    }

    pub fn register_ref(
        &mut self,
        name: Option<&str>,
        base_varid: &str,
        id: Option<u16>,
        ids: &mut IdRegistry,
        buffer: &mut ChunkedBuffer,
        pending: &mut PendingTable,
        at: SourceLoc,
    ) -> Result<u16> {
        if let Some(name) = name {
            if self.by_name.contains_key(name) {
                return Err(BuilderError::Redefined {
                    at,
                    what: "question",
                    name: name.to_string(),
                });
            }
        }
        let question_id = self.allocate_or_mark(ids, id, at)?;
        let sub = [
            (format!("{base_varid}.QuestionId"), bitmask::QUESTION_ID),
            (format!("{base_varid}.FormId"), bitmask::FORM_ID),
            (format!("{base_varid}.FormSetGuid"), bitmask::FORM_SET_GUID),
            (format!("{base_varid}.DevicePath"), bitmask::DEVICE_PATH),
        ];
        for (varid, mask) in sub {
            self.bind_varid(&varid, question_id, mask, QuestionKind::Ref, buffer, pending);
        }
        if let Some(name) = name {
            // base_varid itself isn't bound to a record; key the name off
            // the first (QuestionId) sub-record instead.
            let first = format!("{base_varid}.QuestionId");
            let idx = self.by_varid[&first];
            self.by_name.insert(name.to_string(), idx);
        }
        Ok(question_id)
    }

    /// Only used by Postprocessor: rebind every record carrying `old` to
    /// `new` and re-run pending patches for each of their varids.
    pub fn update_id(
        &mut self,
        old: u16,
        new: u16,
        buffer: &mut ChunkedBuffer,
        pending: &mut PendingTable,
    ) {
        let varids: Vec<String> = self
            .by_varid
            .iter()
            .filter(|(_, idx)| self.records[**idx].question_id == old)
            .map(|(k, _)| k.clone())
            .collect();
        for idx in self.by_varid.values_mut() {
            if self.records[*idx].question_id == old {
                self.records[*idx].question_id = new;
            }
        }
        for varid in varids {
            pending.resolve(buffer, &varid, &new.to_le_bytes());
        }
    }

    pub fn lookup_by_varid(&self, varid: &str) -> Option<Lookup> {
        self.by_varid.get(varid).map(|idx| {
            let r = &self.records[*idx];
            Lookup {
                question_id: r.question_id,
                bitmask: r.bitmask,
                kind: r.kind,
            }
        })
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<Lookup> {
        self.by_name.get(name).map(|idx| {
            let r = &self.records[*idx];
            Lookup {
                question_id: r.question_id,
                bitmask: r.bitmask,
                kind: r.kind,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLoc {
        SourceLoc { file: "t.vfr".into(), line: 1 }
    }

    #[test]
    fn register_resolves_prior_pending_entry() {
        let mut buf = ChunkedBuffer::new(64);
        let mut ids = IdRegistry::new();
        let mut pending = PendingTable::new();
        let mut db = QuestionDB::new(false);

        let addr = buf.reserve(2).unwrap();
        pending.add("Q1", addr, 2, loc(), "forward ref to Q1");

        let id = db
            .register(Some("Q1"), "Q1", Some(0x10), &mut ids, &mut buf, &mut pending, loc())
            .unwrap();
        assert_eq!(id, 0x10);
        assert_eq!(buf.read(addr, 2), &[0x10, 0x00]);
        assert!(pending.check_all_resolved().is_ok());
    }

    #[test]
    fn date_question_shares_id_across_three_bitmasks() {
        let mut buf = ChunkedBuffer::new(64);
        let mut ids = IdRegistry::new();
        let mut pending = PendingTable::new();
        let mut db = QuestionDB::new(false);

        let id = db
            .register_date("D.Year", "D.Month", "D.Day", None, &mut ids, &mut buf, &mut pending, loc())
            .unwrap();

        let y = db.lookup_by_varid("D.Year").unwrap();
        let m = db.lookup_by_varid("D.Month").unwrap();
        let d = db.lookup_by_varid("D.Day").unwrap();
        assert_eq!((y.question_id, m.question_id, d.question_id), (id, id, id));
        assert_eq!(y.bitmask, bitmask::YEAR);
        assert_eq!(m.bitmask, bitmask::MONTH);
        assert_eq!(d.bitmask, bitmask::DAY);
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut buf = ChunkedBuffer::new(64);
        let mut ids = IdRegistry::new();
        let mut pending = PendingTable::new();
        let mut db = QuestionDB::new(false);
        db.register(Some("Q1"), "Q1", None, &mut ids, &mut buf, &mut pending, loc())
            .unwrap();
        let err = db.register(Some("Q1"), "Q1b", None, &mut ids, &mut buf, &mut pending, loc());
        assert!(err.is_err());
    }
}
