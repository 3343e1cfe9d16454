use std::path::Path;

/// Host-language dialects the rewriter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Python,
    Cpp,
    Fortran,
}

impl Dialect {
    /// Detect the dialect from a file extension, `None` for anything else.
    pub fn from_path(path: &Path) -> Option<Dialect> {
        let ext = path.extension()?.to_str()?;
        match ext {
            "py" => Some(Dialect::Python),
            "cpp" | "cxx" | "cc" | "hpp" | "hxx" | "h" => Some(Dialect::Cpp),
            "f90" | "F90" | "f03" | "F03" => Some(Dialect::Fortran),
            _ => None,
        }
    }

    /// Comment leader that introduces a pragma line.
    pub fn comment_leader(self) -> &'static str {
        match self {
            Dialect::Python => "#",
            Dialect::Cpp => "//",
            Dialect::Fortran => "!",
        }
    }

    /// Whether transport operations are subroutine calls (`call foo(...)`)
    /// rather than method calls on a handle object.
    pub fn is_call_style(self) -> bool {
        matches!(self, Dialect::Fortran)
    }

    /// Statement separator used when a template inlines two calls.
    pub fn statement_separator(self) -> &'static str {
        "; "
    }
}

/// Transport operations the rewriter recognizes and replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOp {
    Declare,
    Open,
    BeginStep,
    EndStep,
    Close,
}

impl TransportOp {
    pub const ALL: [TransportOp; 5] = [
        TransportOp::Declare,
        TransportOp::Open,
        TransportOp::BeginStep,
        TransportOp::EndStep,
        TransportOp::Close,
    ];
}

/// Textual API of the transport library as it appears in host sources.
///
/// Method names are shared by the scripting and object dialects (both expose
/// the transport through handle objects); the array dialect uses free
/// subroutines with a trailing status argument.
pub struct TransportApi {
    pub declare: &'static str,
    pub open: &'static str,
    pub begin_step: &'static str,
    pub end_step: &'static str,
    pub close: &'static str,
}

impl TransportApi {
    pub fn for_dialect(dialect: Dialect) -> TransportApi {
        match dialect {
            Dialect::Python | Dialect::Cpp => TransportApi {
                declare: "DeclareIO",
                open: "Open",
                begin_step: "BeginStep",
                end_step: "EndStep",
                close: "Close",
            },
            Dialect::Fortran => TransportApi {
                declare: "transport_declare_io",
                open: "transport_open",
                begin_step: "transport_begin_step",
                end_step: "transport_end_step",
                close: "transport_close",
            },
        }
    }

    pub fn token(&self, op: TransportOp) -> &'static str {
        match op {
            TransportOp::Declare => self.declare,
            TransportOp::Open => self.open,
            TransportOp::BeginStep => self.begin_step,
            TransportOp::EndStep => self.end_step,
            TransportOp::Close => self.close,
        }
    }

    /// Known argument signatures for an operation, longest first.
    ///
    /// Argument lists may legitimately be shorter than the longest form
    /// (the trailing status argument and the peer-group argument are both
    /// optional), so binding tries these in order.
    pub fn signatures(dialect: Dialect, op: TransportOp) -> &'static [&'static [&'static str]] {
        use TransportOp::*;
        match (dialect, op) {
            (Dialect::Python | Dialect::Cpp, Declare) => &[&["name"]],
            (Dialect::Python | Dialect::Cpp, Open) => {
                &[&["target", "mode", "comm"], &["target", "mode"]]
            }
            (Dialect::Python | Dialect::Cpp, BeginStep) => {
                &[&["policy", "timeout"], &["policy"], &[]]
            }
            (Dialect::Python | Dialect::Cpp, EndStep) => &[&[]],
            (Dialect::Python | Dialect::Cpp, Close) => &[&[]],
            (Dialect::Fortran, Declare) => {
                &[&["io", "owner", "name", "status"], &["io", "owner", "name"]]
            }
            (Dialect::Fortran, Open) => &[
                &["engine", "io", "target", "mode", "comm", "status"],
                &["engine", "io", "target", "mode", "status"],
            ],
            (Dialect::Fortran, BeginStep) => &[
                &["engine", "policy", "timeout", "status"],
                &["engine", "policy", "status"],
                &["engine", "status"],
            ],
            (Dialect::Fortran, EndStep) => &[&["engine", "status"], &["engine"]],
            (Dialect::Fortran, Close) => &[&["engine", "status"], &["engine"]],
        }
    }
}
