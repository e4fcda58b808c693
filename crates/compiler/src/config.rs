//! Compiler configuration
//!
//! `CompileOptions` carries everything the pipeline and the external C
//! toolchain invocation need. Defaults can come from an optional
//! `linescript.toml` project manifest; explicit CLI flags always win.

use crate::optimizer::DEFAULT_PASSES;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Code generation backend. `Asm` is reserved and reported unsupported at
/// pipeline time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Auto,
    C,
    Asm,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Auto => "auto",
            Backend::C => "c",
            Backend::Asm => "asm",
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Backend::Auto),
            "c" => Ok(Backend::C),
            "asm" => Ok(Backend::Asm),
            other => Err(format!("unknown backend '{}' (expected auto|c|asm)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// C compiler command.
    pub cc: String,
    pub backend: Backend,
    /// Optimizer pass budget.
    pub passes: u32,
    pub max_speed: bool,
    pub target: String,
    pub sysroot: String,
    pub linker: String,
    pub keep_c: bool,
    pub cache_dir: Option<PathBuf>,
    pub no_cache: bool,
    /// Active CLI flags matching user `flag name()` declarations.
    pub active_flags: Vec<String>,
    /// Tokens forwarded verbatim to the produced binary in run mode.
    pub run_args: Vec<String>,
    pub output: Option<PathBuf>,
    pub emit_typed_ir: Option<PathBuf>,
    pub consume_typed_ir: Option<PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            cc: "clang".to_string(),
            backend: Backend::Auto,
            passes: DEFAULT_PASSES,
            max_speed: false,
            target: String::new(),
            sysroot: String::new(),
            linker: String::new(),
            keep_c: false,
            cache_dir: None,
            no_cache: false,
            active_flags: Vec::new(),
            run_args: Vec::new(),
            output: None,
            emit_typed_ir: None,
            consume_typed_ir: None,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        CompileOptions::default()
    }

    pub fn with_cc(mut self, cc: impl Into<String>) -> Self {
        self.cc = cc.into();
        self
    }

    pub fn with_passes(mut self, passes: u32) -> Self {
        self.passes = passes;
        self
    }

    pub fn with_max_speed(mut self, max_speed: bool) -> Self {
        self.max_speed = max_speed;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Fill unset values from a project manifest.
    pub fn apply_manifest(&mut self, manifest: &ProjectManifest, explicit: &ExplicitFlags) {
        let Some(build) = &manifest.build else {
            return;
        };
        if !explicit.cc {
            if let Some(cc) = &build.cc {
                self.cc = cc.clone();
            }
        }
        if !explicit.passes {
            if let Some(passes) = build.passes {
                self.passes = passes;
            }
        }
        if !explicit.cache_dir {
            if let Some(dir) = &build.cache_dir {
                self.cache_dir = Some(PathBuf::from(dir));
            }
        }
        if !explicit.max_speed {
            if let Some(max_speed) = build.max_speed {
                self.max_speed = max_speed;
            }
        }
    }
}

/// Which options the user set explicitly on the command line (manifest
/// values must not override them).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitFlags {
    pub cc: bool,
    pub passes: bool,
    pub cache_dir: bool,
    pub max_speed: bool,
}

/// `linescript.toml`, looked up next to the first input file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectManifest {
    pub build: Option<BuildSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    pub cc: Option<String>,
    pub passes: Option<u32>,
    pub cache_dir: Option<String>,
    pub max_speed: Option<bool>,
}

pub const MANIFEST_NAME: &str = "linescript.toml";

/// Load the manifest from the given directory, if present.
pub fn load_manifest(dir: &Path) -> Result<Option<ProjectManifest>, String> {
    let path = dir.join(MANIFEST_NAME);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("failed to read '{}': {}", path.display(), e)),
    };
    toml::from_str(&text)
        .map(Some)
        .map_err(|e| format!("invalid manifest '{}': {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_parses_known_names() {
        assert_eq!("auto".parse::<Backend>().unwrap(), Backend::Auto);
        assert_eq!("c".parse::<Backend>().unwrap(), Backend::C);
        assert_eq!("asm".parse::<Backend>().unwrap(), Backend::Asm);
        assert!("llvm".parse::<Backend>().is_err());
    }

    #[test]
    fn defaults_match_the_documented_surface() {
        let options = CompileOptions::default();
        assert_eq!(options.cc, "clang");
        assert_eq!(options.passes, DEFAULT_PASSES);
        assert!(!options.max_speed);
    }

    #[test]
    fn manifest_fills_unset_values_only() {
        let manifest: ProjectManifest = toml::from_str(
            "[build]\ncc = \"gcc\"\npasses = 20\nmax_speed = true\n",
        )
        .unwrap();
        let mut options = CompileOptions::default();
        let explicit = ExplicitFlags {
            cc: true,
            ..ExplicitFlags::default()
        };
        options.apply_manifest(&manifest, &explicit);
        // cc was explicit on the command line and survives.
        assert_eq!(options.cc, "clang");
        assert_eq!(options.passes, 20);
        assert!(options.max_speed);
    }

    #[test]
    fn unknown_manifest_keys_are_rejected() {
        let result: Result<ProjectManifest, _> = toml::from_str("[build]\nccc = \"x\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn missing_manifest_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_manifest(dir.path()).unwrap().is_none());
    }

    #[test]
    fn manifest_loads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_NAME), "[build]\npasses = 5\n").unwrap();
        let manifest = load_manifest(dir.path()).unwrap().unwrap();
        assert_eq!(manifest.build.unwrap().passes, Some(5));
    }
}
