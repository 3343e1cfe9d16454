//! Finds pragma-delimited regions in a source file.
//!
//! A begin marker carries the mapping header on the rest of its line; the
//! region it annotates runs to the next end marker. Several consecutive
//! begin markers may share one terminator, so their bodies overlap.

use std::ops::Range;
use std::path::Path;

use regex::Regex;

use crate::error::RewriteError;
use crate::rewrite::dialect::Dialect;

pub const BEGIN_MARKER: &str = "@lockstep-begin";
pub const END_MARKER: &str = "@lockstep-end";
pub const INIT_MARKER: &str = "@lockstep-init";
pub const FINALIZE_MARKER: &str = "@lockstep-finalize";

/// Quick pre-filter used by repo discovery.
pub fn is_annotated(text: &str) -> bool {
    text.contains("@lockstep-")
}

/// One annotated region: raw header text plus the body span it governs.
#[derive(Debug, Clone)]
pub struct ScannedBlock {
    pub header: String,
    /// Byte offset of the header text, for error reporting.
    pub header_offset: usize,
    /// Span from the end of the begin-marker line to the start of the end
    /// marker line.
    pub body: Range<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Init,
    Finalize,
}

/// A single-line directive outside any block.
#[derive(Debug, Clone)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// Span of the whole marker line (without the trailing newline).
    pub span: Range<usize>,
    pub indent: String,
    /// Remainder of the line, e.g. `comm=comm`.
    pub rest: String,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub blocks: Vec<ScannedBlock>,
    pub directives: Vec<Directive>,
}

pub fn scan(path: &Path, text: &str, dialect: Dialect) -> Result<ScanResult, RewriteError> {
    let pattern = format!(
        r"(?m)^([ \t]*){}@lockstep-(begin|end|init|finalize)\b[ \t]*(.*?)[ \t]*\r?$",
        regex::escape(dialect.comment_leader())
    );
    let marker = Regex::new(&pattern).expect("marker pattern is valid");

    let mut result = ScanResult::default();
    // Begin markers waiting for their terminator; several may share one.
    let mut pending: Vec<usize> = Vec::new();

    for caps in marker.captures_iter(text) {
        let whole = caps.get(0).expect("match");
        let indent = caps.get(1).expect("indent").as_str();
        let kind = caps.get(2).expect("kind").as_str();
        let rest = caps.get(3).expect("rest").as_str();

        match kind {
            "begin" => {
                pending.push(result.blocks.len());
                result.blocks.push(ScannedBlock {
                    header: rest.to_string(),
                    header_offset: caps.get(3).expect("rest").start(),
                    body: whole.end()..whole.end(),
                });
            }
            "end" => {
                if !rest.is_empty() {
                    return Err(RewriteError::parse(
                        path,
                        whole.start(),
                        "end marker does not take a header",
                    ));
                }
                if pending.is_empty() {
                    return Err(RewriteError::parse(
                        path,
                        whole.start(),
                        "end marker without a matching begin",
                    ));
                }
                for idx in pending.drain(..) {
                    result.blocks[idx].body.end = whole.start();
                }
            }
            "init" | "finalize" => {
                if !pending.is_empty() {
                    return Err(RewriteError::parse(
                        path,
                        whole.start(),
                        format!("{} directive inside an open block", kind),
                    ));
                }
                result.directives.push(Directive {
                    kind: if kind == "init" {
                        DirectiveKind::Init
                    } else {
                        DirectiveKind::Finalize
                    },
                    span: whole.start()..whole.end(),
                    indent: indent.to_string(),
                    rest: rest.to_string(),
                });
            }
            _ => unreachable!(),
        }
    }

    if let Some(&idx) = pending.first() {
        let block = &result.blocks[idx];
        return Err(RewriteError::parse(
            path,
            block.header_offset,
            "unterminated block: begin marker has no matching end",
        ));
    }

    Ok(result)
}
