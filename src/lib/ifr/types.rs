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

//! User-defined C-like type system (C6): struct-like types with packing
//! rules, arrays and bit-fields, used to decode a dotted `varstore` field
//! reference into `(offset, width, type)`.

use std::collections::HashMap;

use crate::ifr::error::BuilderError;
use crate::ifr::error::Result;
use crate::ifr::error::SourceLoc;

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub type_name: String,
    pub offset: usize,
    /// 0 means scalar (not an array)
    pub array_count: usize,
    pub bit_width: Option<u8>,
    pub bit_offset: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct TypeRecord {
    pub name: String,
    pub align: usize,
    pub total_size: usize,
    pub fields: Vec<Field>,
    pub builtin: bool,
}

pub struct Resolved {
    pub offset: usize,
    pub width: usize,
    pub type_name: String,
    pub total_size: usize,
    pub bit_width: Option<u8>,
    pub bit_offset: Option<u8>,
}

pub const DEFAULT_PACK_ALIGN: usize = 8;

pub struct TypeDB {
    types: HashMap<String, TypeRecord>,
    pack_stack: Vec<(usize, Option<u32>)>,
}

impl TypeDB {
    pub fn new() -> Self {
        let mut db = TypeDB {
            types: HashMap::new(),
            pack_stack: vec![(DEFAULT_PACK_ALIGN, None)],
        };
        db.inject_builtins();
        db
    }

    fn define_builtin(&mut self, name: &str, size: usize, align: usize) {
        self.types.insert(
            name.to_string(),
            TypeRecord {
                name: name.to_string(),
                align,
                total_size: size,
                fields: Vec::new(),
                builtin: true,
            },
        );
    }

    fn inject_builtins(&mut self) {
        self.define_builtin("UINT8", 1, 1);
        self.define_builtin("UINT16", 2, 2);
        self.define_builtin("UINT32", 4, 4);
        self.define_builtin("UINT64", 8, 8);
        self.define_builtin("BOOLEAN", 1, 1);
        // year:u16 + month:u8 + day:u8
        self.define_builtin("EFI_HII_DATE", 4, 2);
        // hour/minute/second: u8 each
        self.define_builtin("EFI_HII_TIME", 3, 1);
        // question_id:u16 + form_id:u16 + guid:16 (device path length is
        // carried out-of-band by the `ref` opcode body, not modeled here)
        self.define_builtin("EFI_HII_REF", 20, 2);
    }

    pub fn current_pack_align(&self) -> usize {
        self.pack_stack.last().unwrap().0
    }

    pub fn push_pack(&mut self, n: Option<usize>, id: Option<u32>) {
        let align = n
            .map(Self::normalize_pack)
            .unwrap_or_else(|| self.current_pack_align());
        self.pack_stack.push((align, id));
    }

    pub fn pop_pack(&mut self, id: Option<u32>) -> Result<()> {
        if self.pack_stack.len() == 1 {
            return Err(BuilderError::Other(anyhow::anyhow!(
                "pack pop with nothing pushed"
            )));
        }
        let (_, pushed_id) = self.pack_stack.pop().unwrap();
        if let (Some(want), Some(got)) = (id, pushed_id) {
            if want != got {
                return Err(BuilderError::Other(anyhow::anyhow!(
                    "mismatched #pragma pack id: pushed {got}, popped {want}"
                )));
            }
        }
        Ok(())
    }

    pub fn assign_pack(&mut self, n: usize) {
        let align = Self::normalize_pack(n);
        *self.pack_stack.last_mut().unwrap() = (align, self.pack_stack.last().unwrap().1);
    }

    pub fn show_pack(&self) -> usize {
        self.current_pack_align()
    }

    fn normalize_pack(n: usize) -> usize {
        match n {
            1 | 2 | 4 | 8 | 16 => n,
            _ => DEFAULT_PACK_ALIGN,
        }
    }

    pub fn declare_struct(&mut self, name: &str, at: SourceLoc) -> Result<()> {
        if self.types.contains_key(name) {
            return Err(BuilderError::Redefined {
                at,
                what: "type",
                name: name.to_string(),
            });
        }
        self.types.insert(
            name.to_string(),
            TypeRecord {
                name: name.to_string(),
                align: 1,
                total_size: 0,
                fields: Vec::new(),
                builtin: false,
            },
        );
        Ok(())
    }

    pub fn add_field(
        &mut self,
        struct_name: &str,
        field_name: &str,
        field_type_name: &str,
        array_count: usize,
        bit_width: Option<u8>,
        at: SourceLoc,
    ) -> Result<()> {
        let field_type = self
            .types
            .get(field_type_name)
            .cloned()
            .ok_or_else(|| BuilderError::UndefinedReference {
                at: at.clone(),
                name: field_type_name.to_string(),
            })?;

        if let Some(bits) = bit_width {
            let container_bits = (field_type.total_size * 8) as u8;
            if bits > container_bits || bits > 32 {
                return Err(BuilderError::DatumShape {
                    at,
                    message: format!(
                        "bit-field width {bits} exceeds container width {container_bits}"
                    ),
                });
            }
        }

        let pack_align = self.current_pack_align();
        let st = self
            .types
            .get_mut(struct_name)
            .ok_or_else(|| BuilderError::UndefinedReference {
                at: at.clone(),
                name: struct_name.to_string(),
            })?;

        let align = pack_align.min(field_type.align).max(1);
        let aligned_offset = Self::align_up(st.total_size, align);

        let bit_offset = if bit_width.is_some() {
            Some(((aligned_offset * 8) % 32) as u8)
        } else {
            None
        };

        st.fields.push(Field {
            name: field_name.to_string(),
            type_name: field_type_name.to_string(),
            offset: aligned_offset,
            array_count,
            bit_width,
            bit_offset,
        });

        let count = array_count.max(1);
        st.total_size = aligned_offset + field_type.total_size * count;
        st.align = pack_align.min(st.align.max(field_type.align)).max(1);
        Ok(())
    }

    fn align_up(offset: usize, align: usize) -> usize {
        if align == 0 {
            return offset;
        }
        (offset + align - 1) / align * align
    }

    pub fn lookup(&self, name: &str) -> Option<&TypeRecord> {
        self.types.get(name)
    }

    /// Resolve a dotted/bracketed varid string such as `S.field[2].sub`
    /// into `(offset, width, type, total_size)`, per property 7.
    pub fn resolve(&self, varid: &str, at: SourceLoc) -> Result<Resolved> {
        let mut segments = Self::tokenize(varid);
        if segments.is_empty() {
            return Err(BuilderError::DatumShape {
                at,
                message: "empty varid".into(),
            });
        }
        let head = segments.remove(0);
        let mut ty = self
            .types
            .get(&head)
            .ok_or_else(|| BuilderError::UndefinedReference {
                at: at.clone(),
                name: head.clone(),
            })?;
        let mut offset = 0usize;
        let mut last_field: Option<&Field> = None;

        for seg in &segments {
            let (field_name, index) = Self::split_index(seg);
            let field = ty
                .fields
                .iter()
                .find(|f| f.name == field_name)
                .ok_or_else(|| BuilderError::UndefinedReference {
                    at: at.clone(),
                    name: format!("{}.{field_name}", ty.name),
                })?;
            if let Some(idx) = index {
                if field.array_count == 0 || idx >= field.array_count {
                    return Err(BuilderError::DatumShape {
                        at,
                        message: format!(
                            "array index {idx} out of range for {field_name}[{}]",
                            field.array_count
                        ),
                    });
                }
            }
            let field_type =
                self.types
                    .get(&field.type_name)
                    .ok_or_else(|| BuilderError::UndefinedReference {
                        at: at.clone(),
                        name: field.type_name.clone(),
                    })?;
            offset += field.offset + field_type.total_size * index.unwrap_or(0);
            ty = field_type;
            last_field = Some(field);
        }

        let (width, bit_width, bit_offset) = match last_field {
            Some(f) => (ty.total_size, f.bit_width, f.bit_offset),
            None => (ty.total_size, None, None),
        };

        Ok(Resolved {
            offset,
            width,
            type_name: ty.name.clone(),
            total_size: ty.total_size,
            bit_width,
            bit_offset,
        })
    }

    fn tokenize(varid: &str) -> Vec<String> {
        varid
            .split('.')
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn split_index(segment: &str) -> (String, Option<usize>) {
        if let Some(open) = segment.find('[') {
            let name = segment[..open].to_string();
            let idx_str = segment[open + 1..segment.len() - 1].to_string();
            (name, idx_str.parse().ok())
        } else {
            (segment.to_string(), None)
        }
    }
}

impl Default for TypeDB {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLoc {
        SourceLoc { file: "t.vfr".into(), line: 1 }
    }

    #[test]
    fn builtins_are_preregistered() {
        let db = TypeDB::new();
        assert_eq!(db.lookup("UINT32").unwrap().total_size, 4);
        assert_eq!(db.lookup("EFI_HII_DATE").unwrap().total_size, 4);
    }

    #[test]
    fn struct_field_offsets_respect_alignment() {
        let mut db = TypeDB::new();
        db.declare_struct("S", loc()).unwrap();
        db.add_field("S", "a", "UINT8", 0, None, loc()).unwrap();
        db.add_field("S", "b", "UINT32", 0, None, loc()).unwrap();
        let s = db.lookup("S").unwrap();
        assert_eq!(s.fields[0].offset, 0);
        assert_eq!(s.fields[1].offset, 4);
        assert_eq!(s.total_size, 8);
    }

    #[test]
    fn resolve_nested_array_field() {
        let mut db = TypeDB::new();
        db.declare_struct("Inner", loc()).unwrap();
        db.add_field("Inner", "sub", "UINT16", 0, None, loc()).unwrap();

        db.declare_struct("S", loc()).unwrap();
        db.add_field("S", "field", "Inner", 4, None, loc()).unwrap();

        let r = db.resolve("S.field[2].sub", loc()).unwrap();
        // S.field.offset(0) + Inner.size(2)*2 + Inner.resolve("sub").offset(0)
        assert_eq!(r.offset, 0 + 2 * 2 + 0);
        assert_eq!(r.width, 2);
    }

    #[test]
    fn undefined_field_is_reported() {
        let mut db = TypeDB::new();
        db.declare_struct("S", loc()).unwrap();
        db.add_field("S", "a", "UINT8", 0, None, loc()).unwrap();
        assert!(db.resolve("S.missing", loc()).is_err());
    }

    #[test]
    fn pack_push_pop_round_trips_with_matching_id() {
        let mut db = TypeDB::new();
        db.push_pack(Some(1), Some(7));
        assert_eq!(db.current_pack_align(), 1);
        assert!(db.pop_pack(Some(7)).is_ok());
        assert_eq!(db.current_pack_align(), DEFAULT_PACK_ALIGN);
    }
}
