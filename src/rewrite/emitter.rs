//! Dialect-specific text templates for the uniform coupling API.

use std::collections::HashMap;

use regex::Regex;

use crate::rewrite::dialect::{Dialect, TransportOp};
use crate::rewrite::header::MappingOptions;

/// Placeholder token substituted with the repo-wide distinct group count
/// once every file has been scanned (array dialect descriptor sizing).
pub const NGROUPS_PLACEHOLDER: &str = "LOCKSTEP_NGROUPS";

fn call(dialect: Dialect, name: &str, args: &[&str]) -> String {
    let joined = args.join(", ");
    match dialect {
        Dialect::Python => format!("lockstep.{}({})", name, joined),
        Dialect::Cpp => format!("lockstep::{}({})", name, joined),
        Dialect::Fortran => format!("call lockstep_{}({})", name, joined),
    }
}

/// Render the replacement text for one resolved call site.
///
/// `dest` is the destination group token as written in the header (quotes
/// preserved); `bound` are the original call's arguments keyed by signature
/// name. The left-hand side of any assignment is not part of the replaced
/// span, so it survives verbatim.
pub fn emit(
    op: TransportOp,
    dialect: Dialect,
    dest: &str,
    bound: &HashMap<&str, String>,
    opts: &MappingOptions,
) -> String {
    let status = bound.get("status").map(String::as_str);
    let sep = dialect.statement_separator();
    match op {
        TransportOp::Declare => {
            let mut args = vec![dest];
            if let Some(s) = status {
                args.push(s);
            }
            call(dialect, "declare_io", &args)
        }
        TransportOp::Open => {
            let target = bound.get("target").map(String::as_str).unwrap_or("");
            let mode = bound.get("mode").map(String::as_str).unwrap_or("");
            let mut args = vec![dest, target, mode];
            if let Some(c) = bound.get("comm") {
                args.push(c.as_str());
            }
            if let Some(s) = status {
                args.push(s);
            }
            let mut text = call(dialect, "open", &args);
            if !opts.explicit_steps {
                // The annotated code never manages steps itself; the first
                // step begins as soon as the group opens.
                let mut begin_args = vec![dest];
                if let Some(s) = status {
                    begin_args.push(s);
                }
                text.push_str(sep);
                text.push_str(&call(dialect, "begin_step", &begin_args));
            }
            text
        }
        TransportOp::BeginStep => {
            let mut args = vec![dest];
            let timeout = bound
                .get("timeout")
                .map(String::as_str)
                .or(opts.timeout.as_deref());
            if let Some(t) = timeout {
                args.push(t);
            }
            if let Some(s) = status {
                args.push(s);
            }
            call(dialect, "begin_step", &args)
        }
        TransportOp::EndStep => {
            let mut args = vec![dest];
            if let Some(s) = status {
                args.push(s);
            }
            call(dialect, "end_step", &args)
        }
        TransportOp::Close => {
            let mut args = vec![dest];
            if let Some(s) = status {
                args.push(s);
            }
            let close_call = call(dialect, "close", &args);
            if !opts.explicit_steps {
                // Mirror of the implicit begin-step on open.
                let mut text = call(dialect, "end_step", &args);
                text.push_str(sep);
                text.push_str(&close_call);
                text
            } else {
                close_call
            }
        }
    }
}

/// Replacement for an `@lockstep-init` directive line.
pub fn emit_init(dialect: Dialect, comm: Option<&str>) -> String {
    let args: Vec<&str> = comm.into_iter().collect();
    let text = call(dialect, "initialize", &args);
    match dialect {
        Dialect::Cpp => format!("{};", text),
        _ => text,
    }
}

/// Replacement for an `@lockstep-finalize` directive line.
pub fn emit_finalize(dialect: Dialect) -> String {
    let text = call(dialect, "finalize", &[]);
    match dialect {
        Dialect::Cpp => format!("{};", text),
        _ => text,
    }
}

/// Substitute the descriptor-count placeholder, respecting token boundaries.
pub fn substitute_group_count(text: &str, count: usize) -> String {
    let pattern = Regex::new(&format!(r"\b{}\b", NGROUPS_PLACEHOLDER)).expect("valid pattern");
    pattern.replace_all(text, count.to_string()).into_owned()
}
