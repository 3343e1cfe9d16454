use std::fs;
use std::path::Path;
use std::process::Command;

use lockstep::error::RewriteError;
use lockstep::rewrite::args;
use lockstep::rewrite::dialect::Dialect;
use lockstep::rewrite::header;
use lockstep::rewrite::manifest::{Manifest, MANIFEST_NAME};
use lockstep::rewrite::{rewrite_source, RewriteOptions};

fn rewrite_py(text: &str) -> Result<(String, Vec<String>), RewriteError> {
    rewrite_source(
        Path::new("test.py"),
        text,
        Dialect::Python,
        &RewriteOptions::default(),
    )
    .map(|out| (out.text, out.groups))
}

#[test]
fn header_parse_serialize_roundtrip_is_idempotent() {
    let headers = [
        "\"solver\"->\"couple\"",
        "io-->\"G\", step=off",
        "engine--->\"G\", timeout=10.0",
        "\"A\"->\"A\", a_io-->\"A\"; b_eng--->\"B\", step=off",
    ];
    for text in headers {
        let first = header::parse(Path::new("t.py"), 0, text).expect("parse");
        let canonical = header::serialize(&first);
        let second = header::parse(Path::new("t.py"), 0, &canonical).expect("reparse");
        assert_eq!(
            header::serialize(&second),
            canonical,
            "serialization must be stable for `{text}`"
        );
        assert_eq!(first.len(), second.len(), "no mapping lost for `{text}`");
        for (a, b) in first.iter().zip(&second) {
            let mut ra = a.rules.clone();
            let mut rb = b.rules.clone();
            ra.sort_by_key(|r| r.tier);
            rb.sort_by_key(|r| r.tier);
            assert_eq!(ra, rb, "no rule lost or duplicated for `{text}`");
            assert_eq!(a.options, b.options);
        }
    }
}

#[test]
fn python_forward_chain_rewrites_all_five_operations() {
    let input = r#"#@lockstep-begin "solver"->"couple"
io = adios.DeclareIO("solver")
engine = io.Open("solver.bp", Mode.Write, comm)
engine.BeginStep()
engine.Put(v, data)
engine.EndStep()
engine.Close()
#@lockstep-end
"#;
    let expected = r#"#@lockstep-begin "solver"->"couple"
io = lockstep.declare_io("couple")
engine = lockstep.open("couple", "solver.bp", Mode.Write, comm)
lockstep.begin_step("couple")
engine.Put(v, data)
lockstep.end_step("couple")
lockstep.close("couple")
#@lockstep-end
"#;
    let (output, groups) = rewrite_py(input).expect("rewrite");
    assert_eq!(output, expected);
    assert_eq!(groups, vec!["couple"]);
}

#[test]
fn step_off_inlines_implicit_begin_and_end() {
    let input = r#"#@lockstep-begin "solver"->"solver", step=off
io = adios.DeclareIO("solver")
engine = io.Open("solver.bp", Mode.Write)
engine.Put(v, data)
engine.Close()
#@lockstep-end
"#;
    let (output, _) = rewrite_py(input).expect("rewrite");
    assert!(output.contains(
        "engine = lockstep.open(\"solver\", \"solver.bp\", Mode.Write); lockstep.begin_step(\"solver\")"
    ));
    assert!(output.contains("lockstep.end_step(\"solver\"); lockstep.close(\"solver\")"));
}

#[test]
fn reverse_chain_rewrites_statements_before_the_block() {
    let input = r#"import adios

io = adios.DeclareIO("G")
engine = io.Open("G.bp", Mode.Read)

#@lockstep-begin engine--->"G"
status = engine.BeginStep(StepMode.Read, 10.0)
engine.EndStep()
engine.Close()
#@lockstep-end
"#;
    let expected = r#"import adios

io = lockstep.declare_io("G")
engine = lockstep.open("G", "G.bp", Mode.Read)

#@lockstep-begin engine--->"G"
status = lockstep.begin_step("G", 10.0)
lockstep.end_step("G")
lockstep.close("G")
#@lockstep-end
"#;
    let (output, _) = rewrite_py(input).expect("rewrite");
    assert_eq!(output, expected);
}

/// The same three-tier chain split across blocks in either order must land
/// on the same set of rewritten statements.
#[test]
fn chain_converges_regardless_of_block_order() {
    let declare_block = "#@lockstep-begin \"G\"->\"H\"\nio = adios.DeclareIO(\"G\")\n#@lockstep-end\n";
    let open_block = "#@lockstep-begin io-->\"H\"\nengine = io.Open(\"G.bp\", Mode.Read, comm)\n#@lockstep-end\n";
    let engine_block = "#@lockstep-begin engine--->\"H\"\nstatus = engine.BeginStep(StepMode.Read, 5.0)\nengine.EndStep()\nengine.Close()\n#@lockstep-end\n";

    let forward = format!("{declare_block}{open_block}{engine_block}");
    let suffix_first = format!("{engine_block}{declare_block}{open_block}");

    let rewritten = [
        "io = lockstep.declare_io(\"H\")",
        "engine = lockstep.open(\"H\", \"G.bp\", Mode.Read, comm)",
        "status = lockstep.begin_step(\"H\", 5.0)",
        "lockstep.end_step(\"H\")",
        "lockstep.close(\"H\")",
    ];
    let raw = [
        "adios.DeclareIO",
        "io.Open",
        "engine.BeginStep",
        "engine.EndStep",
        "engine.Close",
    ];

    for source in [&forward, &suffix_first] {
        let (output, groups) = rewrite_py(source).expect("rewrite");
        for call in rewritten {
            assert!(output.contains(call), "missing `{call}` in:\n{output}");
        }
        for leftover in raw {
            assert!(!output.contains(leftover), "raw `{leftover}` left in:\n{output}");
        }
        assert_eq!(groups, vec!["H"]);
    }
}

/// Re-joining extracted arguments and re-extracting keeps the argument
/// count for every signature length, with and without continuations.
#[test]
fn argument_extraction_roundtrips() {
    for n in 2..=6usize {
        let names: Vec<String> = (0..n).map(|i| format!("arg{i}")).collect();

        let plain = format!("f({})", names.join(", "));
        let with_py_continuation = format!("f({})", names.join(", \\\n    "));
        let with_f_continuation = format!("f({})", names.join(", &\n    & "));

        for (text, dialect) in [
            (&plain, Dialect::Python),
            (&plain, Dialect::Cpp),
            (&plain, Dialect::Fortran),
            (&with_py_continuation, Dialect::Python),
            (&with_f_continuation, Dialect::Fortran),
        ] {
            let open = text.find('(').expect("paren");
            let call = args::extract(text, open, dialect).expect("extract");
            assert_eq!(call.args.len(), n, "count for {text:?}");

            let rejoined = format!("({})", call.args.join(", "));
            let again = args::extract(&rejoined, 0, dialect).expect("re-extract");
            assert_eq!(again.args.len(), n, "roundtrip count for {text:?}");
            assert_eq!(again.args, call.args);
        }
    }
}

#[test]
fn conflicting_destinations_are_a_hard_error() {
    let input = "#@lockstep-begin io-->\"A\"; io-->\"B\"\nengine = io.Open(\"f\", m)\n#@lockstep-end\n";
    let err = rewrite_py(input).expect_err("must not guess");
    assert!(matches!(err, RewriteError::AmbiguousMapping { .. }));
}

#[test]
fn unterminated_block_fails_without_output() {
    let input = "#@lockstep-begin io-->\"A\"\nengine = io.Open(\"f\", m)\n";
    let err = rewrite_py(input).expect_err("dangling begin");
    match err {
        RewriteError::Parse { offset, .. } => {
            assert!(offset > 0, "offset should point at the begin marker")
        }
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn skipped_groups_are_left_untouched() {
    let input = r#"#@lockstep-begin "solver"->"couple"
io = adios.DeclareIO("solver")
#@lockstep-end
"#;
    let out = rewrite_source(
        Path::new("t.py"),
        input,
        Dialect::Python,
        &RewriteOptions {
            skip: vec!["couple".to_string()],
            only: Vec::new(),
        },
    )
    .expect("rewrite");
    assert_eq!(out.text, input);
    assert!(out.groups.is_empty());
}

#[test]
fn dead_mapping_rule_is_not_fatal() {
    let input = "#@lockstep-begin zzz-->\"Z\"\nx = 1\n#@lockstep-end\n";
    let (output, groups) = rewrite_py(input).expect("non-fatal");
    assert_eq!(output, input);
    assert_eq!(groups, vec!["Z"]);
}

#[test]
fn fortran_chain_with_continuation() {
    let input = r#"!@lockstep-begin "field"->"plasma"
call transport_declare_io(fio, adios, "field", ierr)
call transport_open(eng, fio, "field.bp", &
     & write_mode, comm, ierr)
call transport_begin_step(eng, append_mode, ierr)
call transport_end_step(eng, ierr)
call transport_close(eng, ierr)
!@lockstep-end
"#;
    let expected = r#"!@lockstep-begin "field"->"plasma"
call lockstep_declare_io("plasma", ierr)
call lockstep_open("plasma", "field.bp", write_mode, comm, ierr)
call lockstep_begin_step("plasma", ierr)
call lockstep_end_step("plasma", ierr)
call lockstep_close("plasma", ierr)
!@lockstep-end
"#;
    let out = rewrite_source(
        Path::new("t.F90"),
        input,
        Dialect::Fortran,
        &RewriteOptions::default(),
    )
    .expect("rewrite");
    assert_eq!(out.text, expected);
    assert_eq!(out.groups, vec!["plasma"]);
}

#[test]
fn cpp_engine_block() {
    let input = r#"//@lockstep-begin reader--->"G"
auto status = reader.BeginStep(StepMode::Read, 10.0);
reader.EndStep();
reader.Close();
//@lockstep-end
"#;
    let out = rewrite_source(
        Path::new("t.cpp"),
        input,
        Dialect::Cpp,
        &RewriteOptions::default(),
    )
    .expect("rewrite");
    assert!(out.text.contains("auto status = lockstep::begin_step(\"G\", 10.0);"));
    assert!(out.text.contains("lockstep::end_step(\"G\");"));
    assert!(out.text.contains("lockstep::close(\"G\");"));
}

#[test]
fn python_continuation_inside_rewritten_call() {
    let input = "#@lockstep-begin io-->\"G\"\nengine = io.Open(\"g.bp\", \\\n    Mode.Read)\n#@lockstep-end\n";
    let (output, _) = rewrite_py(input).expect("rewrite");
    assert!(output.contains("engine = lockstep.open(\"G\", \"g.bp\", Mode.Read)"));
}

#[test]
fn init_and_finalize_directives_are_rewritten() {
    let input = "    #@lockstep-init comm=comm\nrun()\n#@lockstep-finalize\n";
    let (output, _) = rewrite_py(input).expect("rewrite");
    assert!(output.contains("    lockstep.initialize(comm)"));
    assert!(output.contains("lockstep.finalize()"));
    assert!(!output.contains("@lockstep-init"));
}

#[test]
fn consecutive_begin_markers_share_one_terminator() {
    let input = r#"#@lockstep-begin a_io-->"A"
#@lockstep-begin b_io-->"B"
ea = a_io.Open("a.bp", Mode.Write)
eb = b_io.Open("b.bp", Mode.Write)
#@lockstep-end
"#;
    let (output, groups) = rewrite_py(input).expect("rewrite");
    assert!(output.contains("ea = lockstep.open(\"A\", \"a.bp\", Mode.Write)"));
    assert!(output.contains("eb = lockstep.open(\"B\", \"b.bp\", Mode.Write)"));
    assert_eq!(groups, vec!["A", "B"]);
}

#[test]
fn repo_mode_writes_manifest_and_fills_descriptor_count() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let indir = scratch.path().join("in");
    let outdir = scratch.path().join("out");
    fs::create_dir_all(indir.join("sim")).expect("mkdir");

    fs::write(
        indir.join("sim/writer.py"),
        "#@lockstep-begin \"conc\"->\"conc\"\nio = adios.DeclareIO(\"conc\")\n#@lockstep-end\n",
    )
    .expect("write");
    fs::write(
        indir.join("sim/solver.F90"),
        "!@lockstep-init\ncall lockstep_setup(LOCKSTEP_NGROUPS, ierr)\n!@lockstep-begin \"mesh\"->\"mesh\"\ncall transport_declare_io(mio, adios, \"mesh\", ierr)\n!@lockstep-end\n",
    )
    .expect("write");
    fs::write(indir.join("README.md"), "plain file\n").expect("write");

    let status = Command::new(env!("CARGO_BIN_EXE_lockstep"))
        .arg("rewrite-repo")
        .arg(&indir)
        .arg(&outdir)
        .arg("--mimic")
        .status()
        .expect("run binary");
    assert!(status.success());

    let py = fs::read_to_string(outdir.join("sim/writer.py")).expect("rewritten py");
    assert!(py.contains("lockstep.declare_io(\"conc\")"));

    let f90 = fs::read_to_string(outdir.join("sim/solver.F90")).expect("rewritten f90");
    assert!(f90.contains("call lockstep_setup(2, ierr)"), "in:\n{f90}");
    assert!(f90.contains("call lockstep_declare_io(\"mesh\", ierr)"));
    assert!(f90.contains("call lockstep_initialize()"));

    assert!(outdir.join("README.md").exists(), "mimic copies plain files");

    let manifest = Manifest::load(&outdir.join(MANIFEST_NAME)).expect("manifest");
    assert_eq!(manifest.ngroups, 2);
    assert!(manifest.groups.contains(&"conc".to_string()));
    assert!(manifest.groups.contains(&"mesh".to_string()));
}

#[test]
fn rewrite_file_refuses_to_leave_partial_output() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let source = scratch.path().join("bad.py");
    let dest = scratch.path().join("bad-out.py");
    fs::write(&source, "#@lockstep-begin io-->\"A\"\nnever terminated\n").expect("write");

    let err = lockstep::rewrite::rewrite_file(&source, &dest, &RewriteOptions::default())
        .expect_err("unterminated block");
    assert!(matches!(err, RewriteError::Parse { .. }));
    assert!(!dest.exists(), "no partially-rewritten file may appear");
}
