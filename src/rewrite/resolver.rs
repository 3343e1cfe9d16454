//! Tier resolution: turns the mapping rules of each pragma block into actual
//! text rewrites.
//!
//! Every mapping runs a forward chain (declare -> open -> begin/end/close),
//! recording the handle each rewritten statement produces, and a reverse
//! chain that finds the earlier statement which produced a handle when only
//! a suffix of the chain is visible in the block. The three tier passes
//! repeat until none of them advances, since rewriting one tier can expose a
//! match for an adjacent one. Each successful match removes a raw transport
//! call from the text, so the iteration terminates.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::Path;

use tracing::warn;

use crate::error::RewriteError;
use crate::rewrite::args::{self, extract, leading_assignment};
use crate::rewrite::dialect::{Dialect, TransportApi, TransportOp};
use crate::rewrite::emitter;
use crate::rewrite::header::{unquote, GroupMapping, MappingOptions, Tier};
use crate::rewrite::scanner::{Directive, DirectiveKind};

/// One scanned block with its parsed header.
#[derive(Debug)]
pub struct Block {
    pub body: Range<usize>,
    pub header_offset: usize,
    pub mappings: Vec<GroupMapping>,
}

pub struct Resolved {
    pub text: String,
    /// Logical names of the groups whose mappings were processed, in
    /// discovery order.
    pub groups: Vec<String>,
}

pub struct Resolver<'a> {
    path: &'a Path,
    dialect: Dialect,
    api: TransportApi,
    text: String,
    blocks: Vec<Block>,
    directives: Vec<Directive>,
    only: &'a [String],
    skip: &'a [String],
}

/// How a candidate call site is matched against the chain state.
#[derive(Clone, Copy)]
enum MatchBy<'x> {
    /// The call's group-name argument equals this token (quotes ignored).
    NameArg(&'x str),
    /// The call is made through this handle.
    Receiver(&'x str),
    /// The call's result is assigned to this handle.
    Assign(&'x str),
}

/// Per-mapping resolver state, built up as tiers are matched.
struct ChainState {
    dest: String,
    opts: MappingOptions,
    name_source: Option<String>,
    ios: Vec<String>,
    engines: Vec<String>,
    satisfied_declare: HashSet<String>,
    satisfied_open: HashSet<String>,
}

impl ChainState {
    fn new(mapping: &GroupMapping) -> ChainState {
        let mut state = ChainState {
            dest: mapping.dest().to_string(),
            opts: mapping.options.clone(),
            name_source: None,
            ios: Vec::new(),
            engines: Vec::new(),
            satisfied_declare: HashSet::new(),
            satisfied_open: HashSet::new(),
        };
        for rule in &mapping.rules {
            match rule.tier {
                Tier::Name => state.name_source = Some(rule.source.clone()),
                Tier::IoHandle => state.ios.push(rule.source.clone()),
                Tier::EngineHandle => state.engines.push(rule.source.clone()),
            }
        }
        state
    }

    fn add_io(&mut self, io: String) {
        if !self.ios.contains(&io) {
            self.ios.push(io);
        }
    }

    fn add_engine(&mut self, engine: String) {
        if !self.engines.contains(&engine) {
            self.engines.push(engine);
        }
    }
}

struct FoundCall {
    start: usize,
    end: usize,
    bound: HashMap<&'static str, String>,
    recv: Option<String>,
    lhs: Option<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        path: &'a Path,
        dialect: Dialect,
        text: String,
        blocks: Vec<Block>,
        directives: Vec<Directive>,
        only: &'a [String],
        skip: &'a [String],
    ) -> Resolver<'a> {
        Resolver {
            path,
            dialect,
            api: TransportApi::for_dialect(dialect),
            text,
            blocks,
            directives,
            only,
            skip,
        }
    }

    pub fn run(mut self) -> Result<Resolved, RewriteError> {
        self.check_ambiguity()?;

        let mut groups: Vec<String> = Vec::new();
        for block_idx in 0..self.blocks.len() {
            for mapping_idx in 0..self.blocks[block_idx].mappings.len() {
                let mapping = self.blocks[block_idx].mappings[mapping_idx].clone();
                let dest_name = mapping.dest_name().to_string();
                if self.skip.iter().any(|g| *g == dest_name) {
                    continue;
                }
                if !self.only.is_empty() && !self.only.iter().any(|g| *g == dest_name) {
                    continue;
                }

                let mut chain = ChainState::new(&mapping);
                let mut matched_any = false;
                loop {
                    let mut progress = false;
                    progress |= self.pass_name(block_idx, &mut chain)?;
                    progress |= self.pass_io(block_idx, &mut chain)?;
                    progress |= self.pass_engine(block_idx, &mut chain)?;
                    if !progress {
                        break;
                    }
                    matched_any = true;
                }

                if !matched_any {
                    let sources: Vec<&str> =
                        mapping.rules.iter().map(|r| r.source.as_str()).collect();
                    warn!(
                        file = %self.path.display(),
                        group = %dest_name,
                        sources = ?sources,
                        "mapping rule matched no call site"
                    );
                }

                if !groups.contains(&dest_name) {
                    groups.push(dest_name);
                }
            }
        }

        self.rewrite_directives()?;

        Ok(Resolved {
            text: self.text,
            groups,
        })
    }

    /// Two different destinations claimed for one tier/source pair within a
    /// block must never be guessed around.
    fn check_ambiguity(&self) -> Result<(), RewriteError> {
        for block in &self.blocks {
            let mut seen: HashMap<(Tier, &str), &str> = HashMap::new();
            for mapping in &block.mappings {
                for rule in &mapping.rules {
                    let dest = unquote(&rule.dest);
                    match seen.get(&(rule.tier, rule.source.as_str())) {
                        Some(prev) if *prev != dest => {
                            return Err(RewriteError::AmbiguousMapping {
                                file: self.path.to_path_buf(),
                                offset: block.header_offset,
                                symbol: rule.source.clone(),
                                first: (*prev).to_string(),
                                second: dest.to_string(),
                            });
                        }
                        _ => {
                            seen.insert((rule.tier, rule.source.as_str()), dest);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Forward pass for the Name tier: declare calls matching the source
    /// group name, rewritten in place; the assigned IO handle joins the
    /// chain.
    fn pass_name(&mut self, block_idx: usize, chain: &mut ChainState) -> Result<bool, RewriteError> {
        let Some(src) = chain.name_source.clone() else {
            return Ok(false);
        };
        let mut progress = false;
        loop {
            let body = self.blocks[block_idx].body.clone();
            let Some(found) =
                self.find_call(TransportOp::Declare, MatchBy::NameArg(&src), body)?
            else {
                break;
            };
            let io = self.io_of_declare(&found);
            self.apply(TransportOp::Declare, &found, chain);
            if let Some(io) = io {
                chain.satisfied_declare.insert(io.clone());
                chain.add_io(io);
            }
            progress = true;
        }
        Ok(progress)
    }

    /// Forward + reverse pass for the IO tier: open calls through a known IO
    /// handle, and (reverse) the earlier declare that produced a handle that
    /// is only visible at this tier.
    fn pass_io(&mut self, block_idx: usize, chain: &mut ChainState) -> Result<bool, RewriteError> {
        let mut progress = false;
        for io in chain.ios.clone() {
            // Forward: open calls inside the block.
            loop {
                let body = self.blocks[block_idx].body.clone();
                let Some(found) =
                    self.find_call(TransportOp::Open, MatchBy::Receiver(&io), body)?
                else {
                    break;
                };
                let engine = self.engine_of_open(&found);
                self.apply(TransportOp::Open, &found, chain);
                if let Some(engine) = engine {
                    chain.satisfied_open.insert(engine.clone());
                    chain.add_engine(engine);
                }
                progress = true;
            }

            // Reverse: the declare that produced this handle, somewhere in
            // the already-processed text before the end of this block.
            if !chain.satisfied_declare.contains(&io) {
                let upto = 0..self.blocks[block_idx].body.end;
                if let Some(found) =
                    self.find_call(TransportOp::Declare, MatchBy::Assign(&io), upto)?
                {
                    self.apply(TransportOp::Declare, &found, chain);
                    chain.satisfied_declare.insert(io.clone());
                    progress = true;
                }
            }
        }
        Ok(progress)
    }

    /// Forward + reverse pass for the Engine tier: step and close calls on a
    /// known engine handle, and (reverse) the earlier open that produced it.
    fn pass_engine(
        &mut self,
        block_idx: usize,
        chain: &mut ChainState,
    ) -> Result<bool, RewriteError> {
        let mut progress = false;
        for engine in chain.engines.clone() {
            for op in [TransportOp::BeginStep, TransportOp::EndStep, TransportOp::Close] {
                loop {
                    let body = self.blocks[block_idx].body.clone();
                    let Some(found) = self.find_call(op, MatchBy::Receiver(&engine), body)? else {
                        break;
                    };
                    self.apply(op, &found, chain);
                    progress = true;
                }
            }

            if !chain.satisfied_open.contains(&engine) {
                let upto = 0..self.blocks[block_idx].body.end;
                if let Some(found) =
                    self.find_call(TransportOp::Open, MatchBy::Assign(&engine), upto)?
                {
                    let io = self.io_of_open(&found);
                    self.apply(TransportOp::Open, &found, chain);
                    chain.satisfied_open.insert(engine.clone());
                    if let Some(io) = io {
                        chain.add_io(io);
                    }
                    progress = true;
                }
            }
        }
        Ok(progress)
    }

    /// IO handle produced by a declare call site.
    fn io_of_declare(&self, found: &FoundCall) -> Option<String> {
        if self.dialect.is_call_style() {
            found.bound.get("io").cloned()
        } else {
            found.lhs.clone()
        }
    }

    /// Engine handle produced by an open call site.
    fn engine_of_open(&self, found: &FoundCall) -> Option<String> {
        if self.dialect.is_call_style() {
            found.bound.get("engine").cloned()
        } else {
            found.lhs.clone()
        }
    }

    /// IO handle an open call goes through.
    fn io_of_open(&self, found: &FoundCall) -> Option<String> {
        if self.dialect.is_call_style() {
            found.bound.get("io").cloned()
        } else {
            found.recv.clone()
        }
    }

    fn find_call(
        &self,
        op: TransportOp,
        match_by: MatchBy<'_>,
        search: Range<usize>,
    ) -> Result<Option<FoundCall>, RewriteError> {
        if self.dialect.is_call_style() {
            self.find_proc_style(op, match_by, search)
        } else {
            self.find_method_style(op, match_by, search)
        }
    }

    fn find_method_style(
        &self,
        op: TransportOp,
        match_by: MatchBy<'_>,
        search: Range<usize>,
    ) -> Result<Option<FoundCall>, RewriteError> {
        let token = self.api.token(op);
        let recv_filter = match match_by {
            MatchBy::Receiver(r) => Some(r),
            _ => None,
        };
        let mut from = search.start;
        while from < search.end {
            let Some(m) =
                args::find_method_call(&self.text, token, recv_filter, from, self.dialect)
            else {
                return Ok(None);
            };
            if m.start >= search.end {
                return Ok(None);
            }
            let call = extract(&self.text, m.open, self.dialect)
                .map_err(|e| RewriteError::parse(self.path, e.offset, e.reason))?;
            let Some(bound) =
                args::bind_signature(TransportApi::signatures(self.dialect, op), &call.args)
            else {
                warn!(
                    file = %self.path.display(),
                    op = token,
                    arity = call.args.len(),
                    "call site with unknown arity left untouched"
                );
                from = m.open + 1;
                continue;
            };
            let lhs = leading_assignment(&self.text, m.start);
            let matched = match match_by {
                MatchBy::Receiver(_) => true,
                MatchBy::NameArg(name) => bound
                    .get("name")
                    .is_some_and(|n| unquote(n) == unquote(name)),
                MatchBy::Assign(target) => lhs.as_deref() == Some(target),
            };
            if !matched {
                from = m.open + 1;
                continue;
            }
            return Ok(Some(FoundCall {
                start: m.start,
                end: call.end,
                bound,
                recv: Some(m.recv),
                lhs,
            }));
        }
        Ok(None)
    }

    fn find_proc_style(
        &self,
        op: TransportOp,
        match_by: MatchBy<'_>,
        search: Range<usize>,
    ) -> Result<Option<FoundCall>, RewriteError> {
        let token = self.api.token(op);
        let mut from = search.start;
        while from < search.end {
            let Some(p) = args::find_proc_call(&self.text, token, from) else {
                return Ok(None);
            };
            if p.start >= search.end {
                return Ok(None);
            }
            let call = extract(&self.text, p.open, self.dialect)
                .map_err(|e| RewriteError::parse(self.path, e.offset, e.reason))?;
            let Some(bound) =
                args::bind_signature(TransportApi::signatures(self.dialect, op), &call.args)
            else {
                warn!(
                    file = %self.path.display(),
                    op = token,
                    arity = call.args.len(),
                    "call site with unknown arity left untouched"
                );
                from = p.open + 1;
                continue;
            };
            let handle_key = match (op, match_by) {
                (TransportOp::Declare, _) => "io",
                (TransportOp::Open, MatchBy::Assign(_)) => "engine",
                (TransportOp::Open, _) => "io",
                _ => "engine",
            };
            let matched = match match_by {
                MatchBy::NameArg(name) => bound
                    .get("name")
                    .is_some_and(|n| unquote(n) == unquote(name)),
                MatchBy::Receiver(handle) | MatchBy::Assign(handle) => {
                    bound.get(handle_key).is_some_and(|h| h == handle)
                }
            };
            if !matched {
                from = p.open + 1;
                continue;
            }
            return Ok(Some(FoundCall {
                start: p.start,
                end: call.end,
                bound,
                recv: None,
                lhs: None,
            }));
        }
        Ok(None)
    }

    fn apply(&mut self, op: TransportOp, found: &FoundCall, chain: &ChainState) {
        let replacement = emitter::emit(op, self.dialect, &chain.dest, &found.bound, &chain.opts);
        self.splice(found.start..found.end, &replacement);
    }

    fn rewrite_directives(&mut self) -> Result<(), RewriteError> {
        for idx in 0..self.directives.len() {
            let directive = self.directives[idx].clone();
            let replacement = match directive.kind {
                DirectiveKind::Init => {
                    let comm = parse_init_options(self.path, &directive)?;
                    emitter::emit_init(self.dialect, comm.as_deref())
                }
                DirectiveKind::Finalize => {
                    if !directive.rest.is_empty() {
                        return Err(RewriteError::parse(
                            self.path,
                            directive.span.start,
                            "finalize directive takes no options",
                        ));
                    }
                    emitter::emit_finalize(self.dialect)
                }
            };
            let text = format!("{}{}", directive.indent, replacement);
            self.splice(directive.span.clone(), &text);
        }
        Ok(())
    }

    /// Replace a span and keep every tracked span consistent.
    fn splice(&mut self, range: Range<usize>, replacement: &str) {
        let delta = replacement.len() as isize - (range.end - range.start) as isize;
        self.text.replace_range(range.clone(), replacement);

        let shift = |r: &mut Range<usize>| {
            if r.start >= range.end {
                r.start = (r.start as isize + delta) as usize;
                r.end = (r.end as isize + delta) as usize;
            } else if r.start <= range.start && r.end >= range.end {
                r.end = (r.end as isize + delta) as usize;
            }
        };
        for block in &mut self.blocks {
            shift(&mut block.body);
        }
        for directive in &mut self.directives {
            shift(&mut directive.span);
        }
    }
}

fn parse_init_options(
    path: &Path,
    directive: &Directive,
) -> Result<Option<String>, RewriteError> {
    let mut comm = None;
    for entry in directive.rest.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once('=') {
            Some(("comm", value)) => comm = Some(value.trim().to_string()),
            _ => {
                return Err(RewriteError::parse(
                    path,
                    directive.span.start,
                    format!("unknown init option `{}`", entry),
                ))
            }
        }
    }
    Ok(comm)
}
