//! The static (operating system, architecture) build matrix.

use std::fmt;

use thiserror::Error;

/// Per-OS build configuration. The architectures share everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    /// Value of the toolchain's target-OS variable (`GOOS`).
    pub operating_system: &'static str,
    /// Values of the toolchain's target-architecture variable (`GOARCH`).
    pub architectures: &'static [&'static str],
    /// Compressor executable, looked up on `PATH`.
    pub compress_binary: &'static str,
    /// Whether the compressor takes the archive name before the input
    /// (`zip out.zip in`) rather than compressing in place (`gzip in`).
    pub include_target_parameter: bool,
    /// Appended to the binary name to get the archive name.
    pub compress_extension: &'static str,
    /// Appended to every binary built for this OS (`.exe`).
    pub extension: &'static str,
}

impl BuildTarget {
    /// Arguments for compressing `binary` into `archive`.
    pub fn compress_args(&self, binary: &str, archive: &str) -> Vec<String> {
        if self.include_target_parameter {
            vec![archive.to_string(), binary.to_string()]
        } else {
            vec![binary.to_string()]
        }
    }
}

const GZIP: &str = "gzip";
const GZ: &str = ".gz";

/// Every target the release is built for.
pub static VALID_BUILDS: &[BuildTarget] = &[
    BuildTarget {
        operating_system: "linux",
        architectures: &[
            "386", "amd64", "arm", "arm64", "mips", "mips64", "mips64le", "mipsle", "ppc64",
            "ppc64le", "s390x",
        ],
        compress_binary: GZIP,
        include_target_parameter: false,
        compress_extension: GZ,
        extension: "",
    },
    BuildTarget {
        operating_system: "darwin",
        architectures: &["386", "amd64", "arm", "arm64"],
        compress_binary: GZIP,
        include_target_parameter: false,
        compress_extension: GZ,
        extension: "",
    },
    BuildTarget {
        operating_system: "nacl",
        architectures: &["386", "amd64p32", "arm"],
        compress_binary: GZIP,
        include_target_parameter: false,
        compress_extension: GZ,
        extension: "",
    },
    BuildTarget {
        operating_system: "netbsd",
        architectures: &["386", "amd64", "arm"],
        compress_binary: GZIP,
        include_target_parameter: false,
        compress_extension: GZ,
        extension: "",
    },
    BuildTarget {
        operating_system: "openbsd",
        architectures: &["386", "amd64", "arm"],
        compress_binary: GZIP,
        include_target_parameter: false,
        compress_extension: GZ,
        extension: "",
    },
    BuildTarget {
        operating_system: "plan9",
        architectures: &["386", "amd64", "arm"],
        compress_binary: GZIP,
        include_target_parameter: false,
        compress_extension: GZ,
        extension: "",
    },
    BuildTarget {
        operating_system: "solaris",
        architectures: &["amd64"],
        compress_binary: GZIP,
        include_target_parameter: false,
        compress_extension: GZ,
        extension: "",
    },
    BuildTarget {
        operating_system: "dragonfly",
        architectures: &["amd64"],
        compress_binary: GZIP,
        include_target_parameter: false,
        compress_extension: GZ,
        extension: "",
    },
    BuildTarget {
        operating_system: "windows",
        architectures: &["386", "amd64"],
        compress_binary: "zip",
        include_target_parameter: true,
        compress_extension: ".zip",
        extension: ".exe",
    },
];

/// One (operating system, architecture) pair scheduled for a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    /// Shared per-OS configuration.
    pub target: &'static BuildTarget,
    /// Target architecture for this job.
    pub arch: &'static str,
}

impl Cell {
    /// Target operating system.
    pub fn os(&self) -> &'static str {
        self.target.operating_system
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target.operating_system, self.arch)
    }
}

/// Invalid matrix selection.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MatrixError {
    /// An OS filter named an OS the matrix does not contain.
    #[error("Unknown operating system: {0}")]
    UnknownOs(String),
}

/// The set of targets a run builds.
#[derive(Debug, Clone)]
pub struct Matrix {
    targets: Vec<&'static BuildTarget>,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::from_targets(VALID_BUILDS)
    }
}

impl Matrix {
    /// A matrix over exactly `targets`.
    pub fn from_targets(targets: &'static [BuildTarget]) -> Self {
        Self {
            targets: targets.iter().collect(),
        }
    }

    /// Restrict the matrix to the named operating systems.
    ///
    /// An empty filter keeps every target. Names are matched exactly.
    pub fn only(self, operating_systems: &[String]) -> Result<Self, MatrixError> {
        if operating_systems.is_empty() {
            return Ok(self);
        }
        if let Some(unknown) = operating_systems
            .iter()
            .find(|os| !self.targets.iter().any(|t| t.operating_system == os.as_str()))
        {
            return Err(MatrixError::UnknownOs(unknown.clone()));
        }

        let targets = self
            .targets
            .into_iter()
            .filter(|t| operating_systems.iter().any(|os| os == t.operating_system))
            .collect();
        Ok(Self { targets })
    }

    /// Selected targets, in matrix order.
    pub fn targets(&self) -> &[&'static BuildTarget] {
        &self.targets
    }

    /// Every cell, in matrix order.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        self.targets.iter().copied().flat_map(|target| {
            target
                .architectures
                .iter()
                .map(move |&arch| Cell { target, arch })
        })
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.targets.iter().map(|t| t.architectures.len()).sum()
    }

    /// No cells selected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
