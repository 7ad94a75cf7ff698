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

use thiserror::Error;

/// Source-line coordinate resolved through the scope record table
/// (populated from `# lineno "file"` markers by the excluded preprocessor
/// front end; the builder only ever consumes the resulting pairs).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
}

impl std::fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Error, Debug)]
pub enum BuilderError {
    #[error("{at}: redefinition of {what} {name:?}")]
    Redefined {
        at: SourceLoc,
        what: &'static str,
        name: String,
    },

    #[error("{at}: undefined reference to {name:?}")]
    UndefinedReference { at: SourceLoc, name: String },

    #[error("{at}: {namespace} id space exhausted")]
    Exhausted {
        at: SourceLoc,
        namespace: &'static str,
    },

    #[error("{at}: unsupported flag bit 0x{bit:02X} on {opcode}")]
    FlagsUnsupported {
        at: SourceLoc,
        opcode: &'static str,
        bit: u8,
    },

    #[error("{at}: {message}")]
    DatumShape { at: SourceLoc, message: String },

    #[error("{at}: varstore {name:?} is ambiguous without a guid")]
    AmbiguousVarStore { at: SourceLoc, name: String },

    #[error("unresolved pending reference to {key:?}, declared at {at}: {message}")]
    PendingUnassigned {
        at: SourceLoc,
        key: String,
        message: String,
    },

    #[error("postprocessor could not locate anchor for {step}: {message}")]
    AdjustFailure { step: &'static str, message: String },

    #[error(
        "internal error: record log and chunk buffer diverge at byte offset {offset} after postprocessing"
    )]
    RecordBufferMismatch { offset: usize },

    #[error("opcode length {length} exceeds the 7-bit length field")]
    LengthOverflow { length: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BuilderError>;

impl BuilderError {
    /// Per the error-handling policy: redefinition, undefined-reference,
    /// flags-unsupported, datum-shape, and ambiguous-varstore are domain
    /// errors — reported as a [`Diagnostic`] and the builder carries on.
    /// Everything else (resource exhaustion, pending-unassigned,
    /// adjust-failure, record/buffer mismatch, length overflow, and
    /// anything wrapped via `anyhow`) is fatal and aborts the compile.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BuilderError::Redefined { .. }
                | BuilderError::UndefinedReference { .. }
                | BuilderError::FlagsUnsupported { .. }
                | BuilderError::DatumShape { .. }
                | BuilderError::AmbiguousVarStore { .. }
        )
    }
}

/// A non-fatal domain error recorded during parse; per the error-handling
/// policy, redefinition/undefined-reference/flags/datum-shape errors are
/// reported but do not stop the builder. Fatal kinds (resource exhaustion,
/// pending-unassigned, adjust-failure, record/buffer mismatch) short-circuit
/// via `BuilderError`/`Result` directly instead of being collected here.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub at: SourceLoc,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.at, self.message)
    }
}

/// Maps a cumulative preprocessed-source line number back to `(file,
/// file_line)` via breakpoints recorded from `# lineno "file"` markers.
/// Grounded on the "scope record table" named in the error-handling design.
#[derive(Debug, Default, Clone)]
pub struct LineMap {
    // (cumulative_line_at_marker, file_line_at_marker, file_name)
    breaks: Vec<(u32, u32, String)>,
}

impl LineMap {
    pub fn new() -> Self {
        Self { breaks: Vec::new() }
    }

    pub fn mark(&mut self, cumulative_line: u32, file_line: u32, file: impl Into<String>) {
        self.breaks.push((cumulative_line, file_line, file.into()));
    }

    pub fn resolve(&self, cumulative_line: u32) -> SourceLoc {
        match self
            .breaks
            .binary_search_by_key(&cumulative_line, |(c, _, _)| *c)
        {
            Ok(idx) => {
                let (c, l, f) = &self.breaks[idx];
                SourceLoc {
                    file: f.clone(),
                    line: l + (cumulative_line - c),
                }
            }
            Err(0) => SourceLoc {
                file: "<input>".to_string(),
                line: cumulative_line,
            },
            Err(idx) => {
                let (c, l, f) = &self.breaks[idx - 1];
                SourceLoc {
                    file: f.clone(),
                    line: l + (cumulative_line - c),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_map_resolves_across_markers() {
        let mut map = LineMap::new();
        map.mark(0, 1, "vfr.i");
        map.mark(10, 1, "included.vfh");
        map.mark(12, 11, "vfr.i");

        assert_eq!(map.resolve(3), SourceLoc { file: "vfr.i".into(), line: 4 });
        assert_eq!(map.resolve(11), SourceLoc { file: "included.vfh".into(), line: 2 });
        assert_eq!(map.resolve(15), SourceLoc { file: "vfr.i".into(), line: 14 });
    }
}
