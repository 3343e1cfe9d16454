//! Call-site location and argument extraction.
//!
//! Works directly on source text with balanced-paren counting. String
//! literals get no special treatment; dialect line continuations are
//! stripped transparently while byte offsets stay exact.

use std::collections::HashMap;

use crate::rewrite::dialect::Dialect;

pub fn is_ident_byte(b: u8) -> bool {
    b == b'_' || b.is_ascii_alphanumeric()
}

/// Extraction failure, positioned for error reporting by the caller.
#[derive(Debug)]
pub struct ArgError {
    pub offset: usize,
    pub reason: String,
}

/// An argument-decomposed call: top-level comma-split expressions and the
/// byte offset just past the closing parenthesis.
#[derive(Debug, PartialEq, Eq)]
pub struct ExtractedCall {
    pub args: Vec<String>,
    pub end: usize,
}

/// Length of a continuation sequence starting at `i`, if any.
///
/// Scripting dialect: backslash-newline. Array dialect: `&`, optional
/// whitespace, newline, optional leading `&` on the next line. The object
/// dialect needs none (newlines are legal inside parentheses anyway).
fn continuation_end(text: &str, i: usize, dialect: Dialect) -> Option<usize> {
    let b = text.as_bytes();
    match dialect {
        Dialect::Python => {
            if b[i] == b'\\' {
                if b.get(i + 1) == Some(&b'\n') {
                    return Some(i + 2);
                }
                if b.get(i + 1) == Some(&b'\r') && b.get(i + 2) == Some(&b'\n') {
                    return Some(i + 3);
                }
            }
            None
        }
        Dialect::Fortran => {
            if b[i] != b'&' {
                return None;
            }
            let mut j = i + 1;
            while j < b.len() && (b[j] == b' ' || b[j] == b'\t' || b[j] == b'\r') {
                j += 1;
            }
            if j >= b.len() || b[j] != b'\n' {
                return None;
            }
            j += 1;
            while j < b.len() && (b[j] == b' ' || b[j] == b'\t') {
                j += 1;
            }
            if j < b.len() && b[j] == b'&' {
                j += 1;
            }
            Some(j)
        }
        Dialect::Cpp => None,
    }
}

/// Find the opening parenthesis following `from`, skipping whitespace and
/// continuations. The object dialect also tolerates bare newlines here.
pub fn opening_paren(text: &str, mut from: usize, dialect: Dialect) -> Option<usize> {
    let b = text.as_bytes();
    while from < b.len() {
        if let Some(j) = continuation_end(text, from, dialect) {
            from = j;
            continue;
        }
        match b[from] {
            b' ' | b'\t' => from += 1,
            b'\n' | b'\r' if dialect == Dialect::Cpp => from += 1,
            b'(' => return Some(from),
            _ => return None,
        }
    }
    None
}

/// Extract the argument list of the call whose opening parenthesis is at
/// `open`. Only balanced-paren counting is used; commas split arguments at
/// nesting depth one.
pub fn extract(text: &str, open: usize, dialect: Dialect) -> Result<ExtractedCall, ArgError> {
    let b = text.as_bytes();
    if b.get(open) != Some(&b'(') {
        return Err(ArgError {
            offset: open,
            reason: "expected `(`".into(),
        });
    }

    let mut depth = 0usize;
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut i = open;

    while i < b.len() {
        if let Some(j) = continuation_end(text, i, dialect) {
            // A continuation reads as a single space inside an argument.
            if !cur.is_empty() && !cur.ends_with(' ') {
                cur.push(' ');
            }
            i = j;
            continue;
        }
        match b[i] {
            b'(' => {
                depth += 1;
                if depth > 1 {
                    cur.push('(');
                }
                i += 1;
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    let last = cur.trim();
                    if !(args.is_empty() && last.is_empty()) {
                        args.push(last.to_string());
                    }
                    return Ok(ExtractedCall { args, end: i + 1 });
                }
                cur.push(')');
                i += 1;
            }
            b',' if depth == 1 => {
                args.push(cur.trim().to_string());
                cur.clear();
                i += 1;
            }
            _ => {
                let ch = text[i..].chars().next().expect("in bounds");
                cur.push(ch);
                i += ch.len_utf8();
            }
        }
    }

    Err(ArgError {
        offset: open,
        reason: "unbalanced parentheses in argument list".into(),
    })
}

/// Bind extracted arguments against the known signatures for an operation,
/// longest signature first. Returns `None` when no known arity matches.
pub fn bind_signature<'s>(
    signatures: &[&[&'s str]],
    args: &[String],
) -> Option<HashMap<&'s str, String>> {
    for sig in signatures {
        if sig.len() == args.len() {
            return Some(
                sig.iter()
                    .copied()
                    .zip(args.iter().cloned())
                    .collect::<HashMap<_, _>>(),
            );
        }
    }
    None
}

/// A located method-style call site: `recv.Method(`.
#[derive(Debug)]
pub struct MethodCall {
    pub recv: String,
    /// Byte offset of the receiver identifier (start of the replace span).
    pub start: usize,
    pub open: usize,
}

/// Find the next `recv.method(` at or after `from`. When `recv_filter` is
/// given, only calls on that receiver match.
pub fn find_method_call(
    text: &str,
    method: &str,
    recv_filter: Option<&str>,
    from: usize,
    dialect: Dialect,
) -> Option<MethodCall> {
    let b = text.as_bytes();
    for (rel, _) in text[from..].match_indices(method) {
        let at = from + rel;
        // Token boundaries around the method name.
        if at > 0 && is_ident_byte(b[at - 1]) {
            continue;
        }
        let after = at + method.len();
        if after < b.len() && is_ident_byte(b[after]) {
            continue;
        }
        // `.` then the receiver identifier, scanning backwards over spaces.
        let mut k = at;
        while k > 0 && (b[k - 1] == b' ' || b[k - 1] == b'\t') {
            k -= 1;
        }
        if k == 0 || b[k - 1] != b'.' {
            continue;
        }
        k -= 1;
        while k > 0 && (b[k - 1] == b' ' || b[k - 1] == b'\t') {
            k -= 1;
        }
        let ident_end = k;
        while k > 0 && is_ident_byte(b[k - 1]) {
            k -= 1;
        }
        if k == ident_end {
            continue;
        }
        let recv = &text[k..ident_end];
        if let Some(filter) = recv_filter {
            if recv != filter {
                continue;
            }
        }
        if let Some(open) = opening_paren(text, after, dialect) {
            return Some(MethodCall {
                recv: recv.to_string(),
                start: k,
                open,
            });
        }
    }
    None
}

/// A located subroutine-style call site: `call proc(`.
#[derive(Debug)]
pub struct ProcCall {
    /// Byte offset of the `call` keyword (start of the replace span).
    pub start: usize,
    pub open: usize,
}

/// Find the next `call proc(` at or after `from` (array dialect).
pub fn find_proc_call(text: &str, proc: &str, from: usize) -> Option<ProcCall> {
    let b = text.as_bytes();
    for (rel, _) in text[from..].match_indices(proc) {
        let at = from + rel;
        if at > 0 && is_ident_byte(b[at - 1]) {
            continue;
        }
        let after = at + proc.len();
        if after < b.len() && is_ident_byte(b[after]) {
            continue;
        }
        // Backwards over whitespace to the `call` keyword.
        let mut k = at;
        while k > 0 && (b[k - 1] == b' ' || b[k - 1] == b'\t') {
            k -= 1;
        }
        let kw_end = k;
        while k > 0 && is_ident_byte(b[k - 1]) {
            k -= 1;
        }
        if !text[k..kw_end].eq_ignore_ascii_case("call") {
            continue;
        }
        if let Some(open) = opening_paren(text, after, Dialect::Fortran) {
            return Some(ProcCall { start: k, open });
        }
    }
    None
}

/// Identifier assigned by the statement that contains the call starting at
/// `stmt_start`, e.g. the `engine` of `engine = io.Open(...)`. Declarations
/// in front of the identifier (object dialect) are tolerated.
pub fn leading_assignment(text: &str, stmt_start: usize) -> Option<String> {
    let mut line_start = text[..stmt_start].rfind('\n').map(|p| p + 1).unwrap_or(0);
    if let Some(p) = text[line_start..stmt_start].rfind(';') {
        line_start += p + 1;
    }
    let prefix = text[line_start..stmt_start].trim_end();
    let without_eq = prefix.strip_suffix('=')?;
    // Reject compound assignment and comparison operators.
    if without_eq.ends_with(['=', '<', '>', '!', '+', '-', '*', '/', '%', '&', '|', '^']) {
        return None;
    }
    let lhs = without_eq.trim_end();
    let b = lhs.as_bytes();
    let mut k = b.len();
    while k > 0 && is_ident_byte(b[k - 1]) {
        k -= 1;
    }
    if k == b.len() {
        return None;
    }
    Some(lhs[k..].to_string())
}
