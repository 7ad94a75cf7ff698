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

//! Variable-store registry (C7): buffer, EFI, and name-value stores, and
//! name(+guid)-qualified resolution to a varstore id.

use crate::ifr::error::BuilderError;
use crate::ifr::error::Result;
use crate::ifr::error::SourceLoc;
use crate::ifr::guid::Guid;

#[derive(Debug, Clone)]
pub struct BufferStore {
    pub name: String,
    pub guid: Guid,
    pub type_name: String,
    pub id: u16,
}

#[derive(Debug, Clone)]
pub struct EfiStore {
    pub name: String,
    pub guid: Guid,
    pub efi_name_string_id: u16,
    pub size_bytes: u8,
    pub id: u16,
}

#[derive(Debug, Clone)]
pub struct NameValueStore {
    pub name: String,
    pub guid: Guid,
    pub id: u16,
    pub names: Vec<u16>,
}

#[derive(Default)]
pub struct VarStoreDB {
    buffers: Vec<BufferStore>,
    efis: Vec<EfiStore>,
    name_values: Vec<NameValueStore>,
    /// in-progress `varstore-name-value` builder, started by
    /// `declare_name_begin` and closed by `name_end`
    pending_name_value: Option<NameValueStore>,
}

impl VarStoreDB {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_buffer(
        &mut self,
        name: &str,
        guid: Guid,
        type_name: &str,
        id: u16,
        at: SourceLoc,
    ) -> Result<()> {
        if self.buffers.iter().any(|b| b.name == name) {
            return Err(BuilderError::Redefined {
                at,
                what: "varstore",
                name: name.to_string(),
            });
        }
        self.buffers.push(BufferStore {
            name: name.to_string(),
            guid,
            type_name: type_name.to_string(),
            id,
        });
        Ok(())
    }

    pub fn declare_efi(
        &mut self,
        name: &str,
        guid: Guid,
        efi_name_string_id: u16,
        size_bytes: u8,
        id: u16,
        at: SourceLoc,
    ) -> Result<()> {
        if size_bytes > 8 {
            return Err(BuilderError::DatumShape {
                at,
                message: format!("efi varstore size {size_bytes} exceeds 8 bytes"),
            });
        }
        if self.efis.iter().any(|e| e.name == name) {
            return Err(BuilderError::Redefined {
                at,
                what: "varstore-efi",
                name: name.to_string(),
            });
        }
        self.efis.push(EfiStore {
            name: name.to_string(),
            guid,
            efi_name_string_id,
            size_bytes,
            id,
        });
        Ok(())
    }

    pub fn declare_name_begin(&mut self, name: &str, id: u16) {
        self.pending_name_value = Some(NameValueStore {
            name: name.to_string(),
            guid: Guid::ZERO,
            id,
            names: Vec::new(),
        });
    }

    pub fn name_add(&mut self, string_id: u16) {
        if let Some(nv) = self.pending_name_value.as_mut() {
            nv.names.push(string_id);
        }
    }

    pub fn name_end(&mut self, guid: Guid) -> Result<()> {
        let mut nv = self
            .pending_name_value
            .take()
            .ok_or_else(|| BuilderError::Other(anyhow::anyhow!("name_end without name_begin")))?;
        nv.guid = guid;
        self.name_values.push(nv);
        Ok(())
    }

    /// Walk buffer, then efi, then name-value lists looking for `name`.
    /// With a guid supplied, returns the first exact `(name, guid)` match.
    /// Without one, more than one name match across all lists is
    /// `AmbiguousVarStore`. Falls back to treating `name` as a data-type
    /// name and searching buffer stores whose element type carries it.
    pub fn resolve(
        &self,
        name: &str,
        guid: Option<Guid>,
        type_lookup: impl Fn(&str) -> bool,
        at: SourceLoc,
    ) -> Result<u16> {
        if let Some(g) = guid {
            if let Some(b) = self.buffers.iter().find(|b| b.name == name && b.guid == g) {
                return Ok(b.id);
            }
            if let Some(e) = self.efis.iter().find(|e| e.name == name && e.guid == g) {
                return Ok(e.id);
            }
            if let Some(n) = self.name_values.iter().find(|n| n.name == name && n.guid == g) {
                return Ok(n.id);
            }
            return Err(BuilderError::UndefinedReference {
                at,
                name: name.to_string(),
            });
        }

        let mut matches: Vec<u16> = Vec::new();
        matches.extend(self.buffers.iter().filter(|b| b.name == name).map(|b| b.id));
        matches.extend(self.efis.iter().filter(|e| e.name == name).map(|e| e.id));
        matches.extend(
            self.name_values
                .iter()
                .filter(|n| n.name == name)
                .map(|n| n.id),
        );

        match matches.len() {
            0 => {
                if let Some(b) = self.buffers.iter().find(|b| type_lookup(&b.type_name) && b.type_name == name) {
                    Ok(b.id)
                } else {
                    Err(BuilderError::UndefinedReference {
                        at,
                        name: name.to_string(),
                    })
                }
            }
            1 => Ok(matches[0]),
            _ => Err(BuilderError::AmbiguousVarStore {
                at,
                name: name.to_string(),
            }),
        }
    }

    pub fn buffer_type(&self, varstore_id: u16) -> Option<&str> {
        self.buffers
            .iter()
            .find(|b| b.id == varstore_id)
            .map(|b| b.type_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLoc {
        SourceLoc { file: "t.vfr".into(), line: 1 }
    }

    #[test]
    fn resolve_unique_name_without_guid() {
        let mut db = VarStoreDB::new();
        db.declare_buffer("MyVar", Guid::ZERO, "S", 0x20, loc()).unwrap();
        let id = db.resolve("MyVar", None, |_| false, loc()).unwrap();
        assert_eq!(id, 0x20);
    }

    #[test]
    fn ambiguous_name_without_guid_errors() {
        let mut db = VarStoreDB::new();
        let g1 = Guid { data1: 1, ..Guid::ZERO };
        let g2 = Guid { data1: 2, ..Guid::ZERO };
        db.declare_buffer("Dup", g1, "S", 1, loc()).unwrap();
        db.declare_efi("Dup", g2, 10, 4, 2, loc()).unwrap();
        assert!(db.resolve("Dup", None, |_| false, loc()).is_err());
    }

    #[test]
    fn guid_qualified_lookup_disambiguates() {
        let mut db = VarStoreDB::new();
        let g1 = Guid { data1: 1, ..Guid::ZERO };
        let g2 = Guid { data1: 2, ..Guid::ZERO };
        db.declare_buffer("Dup", g1, "S", 1, loc()).unwrap();
        db.declare_efi("Dup", g2, 10, 4, 2, loc()).unwrap();
        assert_eq!(db.resolve("Dup", Some(g2), |_| false, loc()).unwrap(), 2);
    }
}
