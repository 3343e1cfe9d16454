use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use lockstep::rewrite::dialect::Dialect;
use lockstep::rewrite::emitter::substitute_group_count;
use lockstep::rewrite::manifest::Manifest;
use lockstep::rewrite::{is_annotated, rewrite_file, RewriteOptions};

#[derive(Parser)]
#[command(name = "lockstep", version, about = "Rewrite coupling pragmas into uniform coupling calls")]
struct Cli {
    /// Verbose diagnostics.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rewrite one annotated source file.
    RewriteFile {
        source: PathBuf,
        dest: PathBuf,
        /// Comma-separated group names to leave untouched.
        #[arg(long, value_delimiter = ',')]
        skip: Vec<String>,
    },
    /// Rewrite every annotated file under a directory tree and write the
    /// group manifest the runtime sizes its tables from.
    RewriteRepo {
        dir: PathBuf,
        outdir: PathBuf,
        /// Mirror the whole tree into OUTDIR, copying unannotated files too.
        #[arg(long)]
        mimic: bool,
        /// Comma-separated group names to rewrite exclusively.
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,
        /// Comma-separated group names to leave untouched.
        #[arg(long, value_delimiter = ',')]
        skip: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    match cli.command {
        Command::RewriteFile { source, dest, skip } => {
            let options = RewriteOptions {
                skip,
                only: Vec::new(),
            };
            let groups = rewrite_file(&source, &dest, &options)
                .with_context(|| format!("rewriting {}", source.display()))?;
            println!("{} -> {} ({} groups)", source.display(), dest.display(), groups.len());
            Ok(())
        }
        Command::RewriteRepo {
            dir,
            outdir,
            mimic,
            only,
            skip,
        } => rewrite_repo(&dir, &outdir, mimic, RewriteOptions { skip, only }),
    }
}

fn source_globs() -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in [
        "*.py", "*.cpp", "*.cxx", "*.cc", "*.hpp", "*.hxx", "*.h", "*.f90", "*.F90", "*.f03",
        "*.F03",
    ] {
        builder.add(Glob::new(pattern).expect("valid glob"));
    }
    builder.build().expect("glob set builds")
}

fn rewrite_repo(dir: &Path, outdir: &Path, mimic: bool, options: RewriteOptions) -> Result<()> {
    let globs = source_globs();
    fs::create_dir_all(outdir)
        .with_context(|| format!("creating output directory {}", outdir.display()))?;
    let outdir_canonical = outdir.canonicalize()?;

    let mut groups: Vec<String> = Vec::new();
    let mut rewritten = 0usize;
    let mut array_outputs: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.path().canonicalize().map_or(true, |p| p != outdir_canonical))
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let rel = path.strip_prefix(dir).expect("walked under dir");
        let dest = outdir.join(rel);

        let is_source = path
            .file_name()
            .map(|name| globs.is_match(Path::new(name)))
            .unwrap_or(false);
        let annotated = is_source
            && fs::read_to_string(path)
                .map(|text| is_annotated(&text))
                .unwrap_or(false);

        if annotated {
            let file_groups = rewrite_file(path, &dest, &options)
                .with_context(|| format!("rewriting {}", path.display()))?;
            for group in file_groups {
                if !groups.contains(&group) {
                    groups.push(group);
                }
            }
            if Dialect::from_path(path) == Some(Dialect::Fortran) {
                array_outputs.push(dest);
            }
            rewritten += 1;
        } else if mimic {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(path, &dest)
                .with_context(|| format!("copying {}", path.display()))?;
            debug!(file = %rel.display(), "copied unannotated file");
        }
    }

    // Descriptor-count placeholders can only be filled in once the whole
    // tree has been scanned.
    for path in &array_outputs {
        let text = fs::read_to_string(path)?;
        let substituted = substitute_group_count(&text, groups.len());
        if substituted != text {
            fs::write(path, substituted)?;
        }
    }

    let manifest_path = Manifest::new(groups.clone()).write(outdir)?;
    println!(
        "rewrote {} files, {} groups; manifest at {}",
        rewritten,
        groups.len(),
        manifest_path.display()
    );
    Ok(())
}
