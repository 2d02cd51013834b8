//! The registry of supported languages and their toolchain invocations.

use serde::{Deserialize, Serialize};

/// A supported execution language.
///
/// Exactly one language ([`Language::Python`]) is interactive: it runs
/// against a long-lived pre-warmed interpreter and may carry session state
/// across requests. Every other language executes one-shot in a fresh
/// sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    /// Python, the interactive language.
    #[serde(rename = "py")]
    Python,
    /// JavaScript via node.
    #[serde(rename = "js")]
    JavaScript,
    /// TypeScript via deno.
    #[serde(rename = "ts")]
    TypeScript,
    /// Go.
    #[serde(rename = "go")]
    Go,
    /// Java.
    #[serde(rename = "java")]
    Java,
    /// C.
    #[serde(rename = "c")]
    C,
    /// C++.
    #[serde(rename = "cpp")]
    Cpp,
    /// PHP.
    #[serde(rename = "php")]
    Php,
    /// Rust.
    #[serde(rename = "rs")]
    Rust,
    /// R.
    #[serde(rename = "r")]
    R,
    /// Fortran 90.
    #[serde(rename = "f90")]
    Fortran,
    /// D.
    #[serde(rename = "d")]
    D,
}

/// How a non-interactive language is executed inside its sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Toolchain {
    /// The source file is handed directly to a runner.
    Interpreted {
        /// Argument vector for the runner, relative to the scratch root.
        run: Vec<String>,
    },
    /// A compile invocation produces an executable which is then run.
    ///
    /// Both invocations happen inside the same sandbox; a compile failure
    /// short-circuits with the compiler's output and no run attempt.
    Compiled {
        /// Argument vector for the compile step.
        compile: Vec<String>,
        /// Argument vector for the run step.
        run: Vec<String>,
    },
}

impl Language {
    /// All supported languages, in tag order.
    pub const ALL: [Self; 12] = [
        Self::Python,
        Self::JavaScript,
        Self::TypeScript,
        Self::Go,
        Self::Java,
        Self::C,
        Self::Cpp,
        Self::Php,
        Self::Rust,
        Self::R,
        Self::Fortran,
        Self::D,
    ];

    /// Parse a wire tag (`py`, `js`, ...) into a language.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|l| l.tag() == tag)
    }

    /// The wire tag for this language.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::JavaScript => "js",
            Self::TypeScript => "ts",
            Self::Go => "go",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Php => "php",
            Self::Rust => "rs",
            Self::R => "r",
            Self::Fortran => "f90",
            Self::D => "d",
        }
    }

    /// Returns true for the interactive, pool-backed language.
    pub fn is_interactive(self) -> bool {
        matches!(self, Self::Python)
    }

    /// Name of the source file staged into the scratch directory.
    pub fn source_file(self) -> &'static str {
        match self {
            Self::Python => "main.py",
            Self::JavaScript => "main.js",
            Self::TypeScript => "main.ts",
            Self::Go => "main.go",
            Self::Java => "Main.java",
            Self::C => "main.c",
            Self::Cpp => "main.cpp",
            Self::Php => "main.php",
            Self::Rust => "main.rs",
            Self::R => "main.r",
            Self::Fortran => "main.f90",
            Self::D => "main.d",
        }
    }

    /// Toolchain invocations for one-shot execution.
    ///
    /// Paths are relative to the scratch root, which is the working
    /// directory inside the sandbox. The interactive language has no
    /// one-shot toolchain; it is driven over the framed protocol instead.
    pub fn toolchain(self) -> Option<Toolchain> {
        let argv = |parts: &[&str]| parts.iter().map(ToString::to_string).collect::<Vec<_>>();

        match self {
            Self::Python => None,
            Self::JavaScript => Some(Toolchain::Interpreted {
                run: argv(&["node", "main.js"]),
            }),
            Self::TypeScript => Some(Toolchain::Interpreted {
                run: argv(&["deno", "run", "--allow-read=.", "--allow-write=.", "main.ts"]),
            }),
            Self::Php => Some(Toolchain::Interpreted {
                run: argv(&["php", "main.php"]),
            }),
            Self::R => Some(Toolchain::Interpreted {
                run: argv(&["Rscript", "main.r"]),
            }),
            Self::Go => Some(Toolchain::Compiled {
                compile: argv(&["go", "build", "-o", "main", "main.go"]),
                run: argv(&["./main"]),
            }),
            Self::Java => Some(Toolchain::Compiled {
                compile: argv(&["javac", "Main.java"]),
                run: argv(&["java", "-cp", ".", "Main"]),
            }),
            Self::C => Some(Toolchain::Compiled {
                compile: argv(&["gcc", "-O2", "-o", "main", "main.c"]),
                run: argv(&["./main"]),
            }),
            Self::Cpp => Some(Toolchain::Compiled {
                compile: argv(&["g++", "-O2", "-o", "main", "main.cpp"]),
                run: argv(&["./main"]),
            }),
            Self::Rust => Some(Toolchain::Compiled {
                compile: argv(&["rustc", "-O", "-o", "main", "main.rs"]),
                run: argv(&["./main"]),
            }),
            Self::Fortran => Some(Toolchain::Compiled {
                compile: argv(&["gfortran", "-O2", "-o", "main", "main.f90"]),
                run: argv(&["./main"]),
            }),
            Self::D => Some(Toolchain::Compiled {
                compile: argv(&["dmd", "-of=main", "main.d"]),
                run: argv(&["./main"]),
            }),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trip() {
        for lang in Language::ALL {
            assert_eq!(Language::from_tag(lang.tag()), Some(lang));
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        assert_eq!(Language::from_tag("cobol"), None);
        assert_eq!(Language::from_tag(""), None);
        assert_eq!(Language::from_tag("PY"), None);
    }

    #[test]
    fn only_python_is_interactive() {
        let interactive: Vec<_> = Language::ALL
            .iter()
            .filter(|l| l.is_interactive())
            .collect();
        assert_eq!(interactive, vec![&Language::Python]);
    }

    #[test]
    fn python_has_no_oneshot_toolchain() {
        assert!(Language::Python.toolchain().is_none());
    }

    #[test]
    fn compiled_languages_have_two_invocations() {
        for lang in [Language::C, Language::Cpp, Language::Go, Language::Java] {
            match lang.toolchain() {
                Some(Toolchain::Compiled { compile, run }) => {
                    assert!(!compile.is_empty());
                    assert!(!run.is_empty());
                }
                other => panic!("{lang} expected compiled toolchain, got {other:?}"),
            }
        }
    }

    #[test]
    fn serde_uses_wire_tags() {
        let json = serde_json::to_string(&Language::Cpp).unwrap();
        assert_eq!(json, "\"cpp\"");
        let parsed: Language = serde_json::from_str("\"f90\"").unwrap();
        assert_eq!(parsed, Language::Fortran);
    }
}
