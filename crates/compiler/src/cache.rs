//! Typed-IR cache
//!
//! The cacheable output of the frontend+optimizer+codegen pipeline is a
//! JSON bundle of the generated C plus two hashes. The source hash is an
//! FNV-1a-64 of each input path concatenated with that file's bytes; the
//! config hash additionally mixes the C compiler command, backend choice,
//! max-speed flag, pass budget, target triple, sysroot, and linker.
//!
//! A cache hit (bundle present for the config hash, rebuild not forced)
//! lets the driver skip straight to C compilation.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const TYPED_IR_FORMAT: &str = "linescript-typed-ir-v1";

/// The persisted bundle. Unknown top-level fields are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypedIrBundle {
    pub format: String,
    pub source_hash: String,
    pub config_hash: String,
    pub c_code: String,
}

impl TypedIrBundle {
    pub fn new(source_hash: String, config_hash: String, c_code: String) -> Self {
        TypedIrBundle {
            format: TYPED_IR_FORMAT.to_string(),
            source_hash,
            config_hash,
            c_code,
        }
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("failed to encode typed IR: {}", e))
    }

    pub fn from_json(text: &str) -> Result<Self, String> {
        let bundle: TypedIrBundle = serde_json::from_str(text)
            .map_err(|e| format!("failed to parse typed IR bundle: {}", e))?;
        if bundle.format != TYPED_IR_FORMAT {
            return Err(format!(
                "unsupported typed IR format '{}' (expected '{}')",
                bundle.format, TYPED_IR_FORMAT
            ));
        }
        Ok(bundle)
    }
}

/// FNV-1a-64 streaming hasher.
pub struct Fnv1a64 {
    state: u64,
}

impl Fnv1a64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    pub fn new() -> Self {
        Fnv1a64 {
            state: Self::OFFSET,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= u64::from(*byte);
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }

    pub fn finish(&self) -> u64 {
        self.state
    }
}

impl Default for Fnv1a64 {
    fn default() -> Self {
        Fnv1a64::new()
    }
}

/// Hash the input set: each path, then that file's bytes.
pub fn source_hash(sources: &[(PathBuf, String)]) -> String {
    let mut hasher = Fnv1a64::new();
    for (path, text) in sources {
        hasher.update(path.to_string_lossy().as_bytes());
        hasher.update(text.as_bytes());
    }
    format!("{:016x}", hasher.finish())
}

/// Build configuration mixed into the config hash.
#[derive(Debug, Clone, Default)]
pub struct ConfigKey {
    pub cc: String,
    pub backend: String,
    pub max_speed: bool,
    pub passes: u32,
    pub target: String,
    pub sysroot: String,
    pub linker: String,
}

pub fn config_hash(source_hash: &str, key: &ConfigKey) -> String {
    let mut hasher = Fnv1a64::new();
    hasher.update(source_hash.as_bytes());
    hasher.update(key.cc.as_bytes());
    hasher.update(key.backend.as_bytes());
    hasher.update(&[u8::from(key.max_speed)]);
    hasher.update(&key.passes.to_le_bytes());
    hasher.update(key.target.as_bytes());
    hasher.update(key.sysroot.as_bytes());
    hasher.update(key.linker.as_bytes());
    format!("{:016x}", hasher.finish())
}

/// Cache directory: `$XDG_CACHE_HOME/linescript` or `~/.cache/linescript`.
pub fn default_cache_dir() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        let path = PathBuf::from(xdg);
        if path.is_absolute() {
            return Some(path.join("linescript"));
        }
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".cache").join("linescript"))
}

pub fn bundle_path(cache_dir: &Path, config_hash: &str) -> PathBuf {
    cache_dir.join(format!("{}.json", config_hash))
}

/// Load a cached bundle, verifying both hashes still match.
pub fn load(cache_dir: &Path, source_hash: &str, config_hash: &str) -> Option<TypedIrBundle> {
    let path = bundle_path(cache_dir, config_hash);
    let text = fs::read_to_string(path).ok()?;
    let bundle = TypedIrBundle::from_json(&text).ok()?;
    if bundle.source_hash != source_hash || bundle.config_hash != config_hash {
        return None;
    }
    Some(bundle)
}

pub fn store(cache_dir: &Path, bundle: &TypedIrBundle) -> Result<(), String> {
    fs::create_dir_all(cache_dir)
        .map_err(|e| format!("failed to create cache directory: {}", e))?;
    let path = bundle_path(cache_dir, &bundle.config_hash);
    fs::write(&path, bundle.to_json()?)
        .map_err(|e| format!("failed to write cache bundle '{}': {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a64_matches_reference_vectors() {
        // Standard FNV-1a test vectors.
        let mut h = Fnv1a64::new();
        h.update(b"");
        assert_eq!(h.finish(), 0xcbf29ce484222325);
        let mut h = Fnv1a64::new();
        h.update(b"a");
        assert_eq!(h.finish(), 0xaf63dc4c8601ec8c);
        let mut h = Fnv1a64::new();
        h.update(b"foobar");
        assert_eq!(h.finish(), 0x85944171f73967e8);
    }

    #[test]
    fn source_hash_changes_with_any_byte() {
        let a = source_hash(&[(PathBuf::from("x.lsc"), "println(1)".to_string())]);
        let b = source_hash(&[(PathBuf::from("x.lsc"), "println(2)".to_string())]);
        let c = source_hash(&[(PathBuf::from("y.lsc"), "println(1)".to_string())]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        // And is stable for identical input.
        let a2 = source_hash(&[(PathBuf::from("x.lsc"), "println(1)".to_string())]);
        assert_eq!(a, a2);
    }

    #[test]
    fn config_hash_mixes_every_field() {
        let base = ConfigKey {
            cc: "clang".to_string(),
            backend: "c".to_string(),
            max_speed: false,
            passes: 12,
            target: String::new(),
            sysroot: String::new(),
            linker: String::new(),
        };
        let h0 = config_hash("abc", &base);
        for change in [
            ConfigKey { cc: "gcc".to_string(), ..base.clone() },
            ConfigKey { backend: "auto".to_string(), ..base.clone() },
            ConfigKey { max_speed: true, ..base.clone() },
            ConfigKey { passes: 32, ..base.clone() },
            ConfigKey { target: "aarch64-linux".to_string(), ..base.clone() },
            ConfigKey { sysroot: "/opt".to_string(), ..base.clone() },
            ConfigKey { linker: "lld".to_string(), ..base.clone() },
        ] {
            assert_ne!(h0, config_hash("abc", &change));
        }
        assert_ne!(h0, config_hash("abd", &base));
    }

    #[test]
    fn bundle_round_trips_through_json() {
        let bundle = TypedIrBundle::new(
            "1111".to_string(),
            "2222".to_string(),
            "int main(void) { return 0; }\n".to_string(),
        );
        let json = bundle.to_json().unwrap();
        let back = TypedIrBundle::from_json(&json).unwrap();
        assert_eq!(bundle, back);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let json = r#"{"format":"linescript-typed-ir-v1","source_hash":"a","config_hash":"b","c_code":"c","extra":1}"#;
        assert!(TypedIrBundle::from_json(json).is_err());
    }

    #[test]
    fn wrong_format_is_rejected() {
        let json = r#"{"format":"linescript-typed-ir-v2","source_hash":"a","config_hash":"b","c_code":"c"}"#;
        let err = TypedIrBundle::from_json(json).unwrap_err();
        assert!(err.contains("unsupported typed IR format"));
    }

    #[test]
    fn store_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = TypedIrBundle::new("s".to_string(), "c0ffee".to_string(), "X".to_string());
        store(dir.path(), &bundle).unwrap();
        let loaded = load(dir.path(), "s", "c0ffee").unwrap();
        assert_eq!(loaded, bundle);
    }

    #[test]
    fn stale_source_hash_misses() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = TypedIrBundle::new("old".to_string(), "key".to_string(), "X".to_string());
        store(dir.path(), &bundle).unwrap();
        assert!(load(dir.path(), "new", "key").is_none());
    }
}
