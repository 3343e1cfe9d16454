//! Pragma header grammar.
//!
//! A header is a semicolon-separated list of mapping groups; each group is a
//! comma-separated list of `key OP value` entries. The operator selects the
//! aliasing tier, tried in strict precedence order so the longer arrows win:
//! `--->` engine handle, `-->` IO handle, `->` group name, `=` side-channel
//! option.

use std::fmt;
use std::path::Path;

use crate::error::RewriteError;

/// Aliasing tier through which a rule identifies the object being renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Name,
    IoHandle,
    EngineHandle,
}

impl Tier {
    pub fn operator(self) -> &'static str {
        match self {
            Tier::Name => "->",
            Tier::IoHandle => "-->",
            Tier::EngineHandle => "--->",
        }
    }
}

/// One tier-qualified entry: rename `source` (seen in code) to the
/// destination group `dest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    pub tier: Tier,
    pub source: String,
    pub dest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingOptions {
    /// `step=off` means the annotated code never manages step numbers
    /// itself; open/close gain implicit begin/end steps.
    pub explicit_steps: bool,
    /// Timeout literal threaded into emitted begin-step calls.
    pub timeout: Option<String>,
}

impl Default for MappingOptions {
    fn default() -> Self {
        MappingOptions {
            explicit_steps: true,
            timeout: None,
        }
    }
}

/// One semicolon-separated header group: at most one rule per tier, plus
/// options, all naming the same destination group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMapping {
    pub rules: Vec<MappingRule>,
    pub options: MappingOptions,
}

impl GroupMapping {
    pub fn rule(&self, tier: Tier) -> Option<&MappingRule> {
        self.rules.iter().find(|r| r.tier == tier)
    }

    /// Destination group token, as written (possibly quoted).
    pub fn dest(&self) -> &str {
        &self.rules[0].dest
    }

    /// Destination group logical name (quotes stripped).
    pub fn dest_name(&self) -> &str {
        unquote(self.dest())
    }
}

impl fmt::Display for GroupMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rules = self.rules.clone();
        rules.sort_by_key(|r| r.tier);
        let mut first = true;
        for r in rules {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}{}{}", r.source, r.tier.operator(), r.dest)?;
            first = false;
        }
        if !self.options.explicit_steps {
            write!(f, ", step=off")?;
        }
        if let Some(t) = &self.options.timeout {
            write!(f, ", timeout={}", t)?;
        }
        Ok(())
    }
}

/// Serialize a parsed header back to its canonical text form.
pub fn serialize(mappings: &[GroupMapping]) -> String {
    mappings
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Strip one layer of matching quotes.
pub fn unquote(token: &str) -> &str {
    let bytes = token.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &token[1..token.len() - 1];
        }
    }
    token
}

pub fn parse(path: &Path, offset: usize, header: &str) -> Result<Vec<GroupMapping>, RewriteError> {
    if header.trim().is_empty() {
        return Err(RewriteError::parse(path, offset, "empty pragma header"));
    }

    let mut mappings = Vec::new();
    for group_text in header.split(';') {
        let group_text = group_text.trim();
        if group_text.is_empty() {
            continue;
        }

        let mut mapping = GroupMapping {
            rules: Vec::new(),
            options: MappingOptions::default(),
        };

        for entry in group_text.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            parse_entry(path, offset, entry, &mut mapping)?;
        }

        if mapping.rules.is_empty() {
            return Err(RewriteError::parse(
                path,
                offset,
                format!("no tier-qualified entry in `{}`", group_text),
            ));
        }

        // All entries of one group must agree on the destination.
        let dest = mapping.dest_name().to_string();
        if let Some(other) = mapping.rules.iter().find(|r| unquote(&r.dest) != dest) {
            return Err(RewriteError::AmbiguousMapping {
                file: path.to_path_buf(),
                offset,
                symbol: group_text.to_string(),
                first: mapping.rules[0].dest.clone(),
                second: other.dest.clone(),
            });
        }

        mappings.push(mapping);
    }

    if mappings.is_empty() {
        return Err(RewriteError::parse(path, offset, "empty pragma header"));
    }

    Ok(mappings)
}

fn parse_entry(
    path: &Path,
    offset: usize,
    entry: &str,
    mapping: &mut GroupMapping,
) -> Result<(), RewriteError> {
    // Longest operator first so `--->` is never mistaken for `-->` plus `>`.
    for tier in [Tier::EngineHandle, Tier::IoHandle, Tier::Name] {
        let op = tier.operator();
        if let Some(pos) = entry.find(op) {
            let source = entry[..pos].trim();
            let dest = entry[pos + op.len()..].trim();
            if source.is_empty() || dest.is_empty() {
                return Err(RewriteError::parse(
                    path,
                    offset,
                    format!("malformed mapping entry `{}`", entry),
                ));
            }
            let rule = MappingRule {
                tier,
                source: source.to_string(),
                dest: dest.to_string(),
            };
            if let Some(existing) = mapping.rule(tier) {
                if *existing != rule {
                    return Err(RewriteError::AmbiguousMapping {
                        file: path.to_path_buf(),
                        offset,
                        symbol: source.to_string(),
                        first: existing.dest.clone(),
                        second: rule.dest,
                    });
                }
                return Ok(()); // exact duplicate, keep one
            }
            mapping.rules.push(rule);
            return Ok(());
        }
    }

    if let Some(pos) = entry.find('=') {
        let key = entry[..pos].trim();
        let value = entry[pos + 1..].trim();
        match key {
            "step" => match value {
                "off" => mapping.options.explicit_steps = false,
                "on" => mapping.options.explicit_steps = true,
                _ => {
                    return Err(RewriteError::parse(
                        path,
                        offset,
                        format!("step option takes on/off, got `{}`", value),
                    ))
                }
            },
            "timeout" => mapping.options.timeout = Some(value.to_string()),
            _ => {
                return Err(RewriteError::parse(
                    path,
                    offset,
                    format!("unknown option `{}`", key),
                ))
            }
        }
        return Ok(());
    }

    Err(RewriteError::parse(
        path,
        offset,
        format!("entry `{}` has no mapping operator", entry),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(header: &str) -> Vec<GroupMapping> {
        parse(Path::new("t.py"), 0, header).expect("header should parse")
    }

    #[test]
    fn tier_precedence() {
        let m = parse_ok("engine--->\"G\"");
        assert_eq!(m[0].rules[0].tier, Tier::EngineHandle);
        assert_eq!(m[0].rules[0].source, "engine");
        assert_eq!(m[0].dest_name(), "G");

        let m = parse_ok("io-->\"G\"");
        assert_eq!(m[0].rules[0].tier, Tier::IoHandle);

        let m = parse_ok("\"Old\"->\"New\"");
        assert_eq!(m[0].rules[0].tier, Tier::Name);
        assert_eq!(m[0].rules[0].source, "\"Old\"");
        assert_eq!(m[0].dest_name(), "New");
    }

    #[test]
    fn groups_and_options() {
        let m = parse_ok("\"A\"->\"A\", io-->\"A\", step=off; eng--->\"B\", timeout=10.0");
        assert_eq!(m.len(), 2);
        assert_eq!(m[0].rules.len(), 2);
        assert!(!m[0].options.explicit_steps);
        assert_eq!(m[1].options.timeout.as_deref(), Some("10.0"));
    }

    #[test]
    fn no_tier_entry_is_fatal() {
        assert!(parse(Path::new("t.py"), 0, "step=off").is_err());
        assert!(parse(Path::new("t.py"), 0, "").is_err());
    }

    #[test]
    fn conflicting_tier_rules_are_ambiguous() {
        let err = parse(Path::new("t.py"), 0, "io-->\"A\", io-->\"B\"").unwrap_err();
        assert!(matches!(err, RewriteError::AmbiguousMapping { .. }));
    }

    #[test]
    fn mixed_destinations_in_one_group_are_ambiguous() {
        let err = parse(Path::new("t.py"), 0, "\"N\"->\"A\", io-->\"B\"").unwrap_err();
        assert!(matches!(err, RewriteError::AmbiguousMapping { .. }));
    }

    #[test]
    fn serialize_then_parse_is_idempotent() {
        let original = parse_ok("io-->\"A\", \"A\"->\"A\", step=off; eng--->\"B\"");
        let text = serialize(&original);
        let reparsed = parse_ok(&text);
        // Canonical order may differ from input order; compare as sets.
        assert_eq!(original.len(), reparsed.len());
        for (a, b) in original.iter().zip(&reparsed) {
            let mut ra = a.rules.clone();
            let mut rb = b.rules.clone();
            ra.sort_by_key(|r| r.tier);
            rb.sort_by_key(|r| r.tier);
            assert_eq!(ra, rb);
            assert_eq!(a.options, b.options);
        }
    }
}
