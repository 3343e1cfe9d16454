//! Build-time source rewriter: comment pragmas to uniform coupling calls.

pub mod args;
pub mod dialect;
pub mod emitter;
pub mod header;
pub mod manifest;
pub mod resolver;
pub mod scanner;

use std::fs;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info};

use crate::error::RewriteError;
use dialect::Dialect;
use resolver::{Block, Resolved, Resolver};

pub use scanner::is_annotated;

#[derive(Debug, Default, Clone)]
pub struct RewriteOptions {
    /// Groups to leave untouched.
    pub skip: Vec<String>,
    /// When non-empty, only these groups are rewritten.
    pub only: Vec<String>,
}

pub struct RewriteOutput {
    pub text: String,
    /// Logical group names discovered in this file, in order.
    pub groups: Vec<String>,
}

/// Rewrite one source text. Pure: nothing touches the filesystem.
pub fn rewrite_source(
    path: &Path,
    text: &str,
    dialect: Dialect,
    options: &RewriteOptions,
) -> Result<RewriteOutput, RewriteError> {
    let scanned = scanner::scan(path, text, dialect)?;
    debug!(
        file = %path.display(),
        blocks = scanned.blocks.len(),
        directives = scanned.directives.len(),
        "scanned"
    );

    let mut blocks = Vec::with_capacity(scanned.blocks.len());
    for raw in scanned.blocks {
        let mappings = header::parse(path, raw.header_offset, &raw.header)?;
        blocks.push(Block {
            body: raw.body,
            header_offset: raw.header_offset,
            mappings,
        });
    }

    let resolver = Resolver::new(
        path,
        dialect,
        text.to_string(),
        blocks,
        scanned.directives,
        &options.only,
        &options.skip,
    );
    let resolved: Resolved = resolver.run()?;

    Ok(RewriteOutput {
        text: resolved.text,
        groups: resolved.groups,
    })
}

/// Rewrite one annotated file into `dest`.
///
/// The output is staged in a temporary file beside the destination and
/// persisted only on full success, so a fatal error never leaves a
/// partially-rewritten file behind.
pub fn rewrite_file(
    source: &Path,
    dest: &Path,
    options: &RewriteOptions,
) -> Result<Vec<String>, RewriteError> {
    let dialect = Dialect::from_path(source).ok_or_else(|| {
        RewriteError::parse(source, 0, "unrecognized source dialect for this file")
    })?;
    let text = fs::read_to_string(source)?;
    let output = rewrite_source(source, &text, dialect, options)?;

    let dir = dest.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = dir {
        fs::create_dir_all(dir)?;
    }
    let mut staged = tempfile::NamedTempFile::new_in(dir.unwrap_or(Path::new(".")))?;
    staged.write_all(output.text.as_bytes())?;
    staged
        .persist(dest)
        .map_err(|e| RewriteError::Io(e.error))?;

    info!(
        source = %source.display(),
        dest = %dest.display(),
        groups = output.groups.len(),
        "rewrote file"
    );
    Ok(output.groups)
}
