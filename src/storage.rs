//! Profile storage: one DSL file per profile, guarded by a content hash.
//!
//! The hash returned by [`ProfileStore::load_config`] is an opaque
//! optimistic-concurrency token. Saving with a token that no longer matches
//! the stored content fails with [`StoreError::Conflict`].

use crate::config::EngineConfig;
use crate::error::StoreError;
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Text a profile starts with when nothing is stored yet.
pub const DEFAULT_TEMPLATE: &str = "// New keymap profile\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    pub source: String,
    /// Empty when the profile does not exist yet.
    pub hash: String,
}

pub trait ProfileStore {
    fn load_config(&self, profile: &str) -> Result<LoadedConfig, StoreError>;

    /// Store `source` if the current content still hashes to `expected_hash`.
    /// Returns the new token.
    fn save_config(&self, profile: &str, source: &str, expected_hash: &str) -> Result<String, StoreError>;
}

/// SHA-256 of the text, lower-case hex.
pub fn content_hash(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Letters, digits, `-`, `_` and inner `.`; at most 64 characters.
pub fn check_profile_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// `<root>/<profile>.<extension>` files.
#[derive(Debug, Clone)]
pub struct FsProfileStore {
    root: PathBuf,
    extension: String,
    default_template: String,
}

impl FsProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsProfileStore {
            root: root.into(),
            extension: "rhai".to_string(),
            default_template: DEFAULT_TEMPLATE.to_string(),
        }
    }

    /// Store under `root` using the extension and template from `config`.
    pub fn from_config(root: impl Into<PathBuf>, config: &EngineConfig) -> Self {
        let store = Self::new(root).with_extension(config.profile_extension.as_str());
        match &config.default_template {
            Some(template) => store.with_default_template(template.as_str()),
            None => store,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_default_template(mut self, template: impl Into<String>) -> Self {
        self.default_template = template.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile_path(&self, profile: &str) -> Result<PathBuf, StoreError> {
        check_profile_name(profile)?;
        Ok(self.root.join(format!("{}.{}", profile, self.extension)))
    }

    fn read(path: &Path) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl ProfileStore for FsProfileStore {
    fn load_config(&self, profile: &str) -> Result<LoadedConfig, StoreError> {
        let path = self.profile_path(profile)?;
        match Self::read(&path)? {
            Some(source) => {
                let hash = content_hash(&source);
                tracing::info!(profile, path = %path.display(), bytes = source.len(), "loaded profile");
                Ok(LoadedConfig { source, hash })
            }
            None => {
                tracing::info!(profile, "profile not found; using default template");
                Ok(LoadedConfig {
                    source: self.default_template.clone(),
                    hash: String::new(),
                })
            }
        }
    }

    fn save_config(&self, profile: &str, source: &str, expected_hash: &str) -> Result<String, StoreError> {
        let path = self.profile_path(profile)?;
        let current = Self::read(&path)?.map(|text| content_hash(&text)).unwrap_or_default();
        if current != expected_hash {
            tracing::warn!(profile, "profile changed on disk; refusing to overwrite");
            return Err(StoreError::Conflict {
                profile: profile.to_string(),
            });
        }

        std::fs::create_dir_all(&self.root)?;
        let tmp = self.root.join(format!(".{}.{}.tmp", profile, self.extension));
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(source.as_bytes())?;
            file.sync_all()?;
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        let hash = content_hash(source);
        tracing::info!(profile, path = %path.display(), bytes = source.len(), "saved profile");
        Ok(hash)
    }
}

/// In-memory store for tests and benchmarks.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: RefCell<HashMap<String, String>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(self, profile: &str, source: &str) -> Self {
        self.profiles
            .borrow_mut()
            .insert(profile.to_string(), source.to_string());
        self
    }

    pub fn get(&self, profile: &str) -> Option<String> {
        self.profiles.borrow().get(profile).cloned()
    }
}

impl ProfileStore for MemoryProfileStore {
    fn load_config(&self, profile: &str) -> Result<LoadedConfig, StoreError> {
        check_profile_name(profile)?;
        Ok(match self.get(profile) {
            Some(source) => LoadedConfig {
                hash: content_hash(&source),
                source,
            },
            None => LoadedConfig {
                source: DEFAULT_TEMPLATE.to_string(),
                hash: String::new(),
            },
        })
    }

    fn save_config(&self, profile: &str, source: &str, expected_hash: &str) -> Result<String, StoreError> {
        check_profile_name(profile)?;
        let current = self.get(profile).map(|s| content_hash(&s)).unwrap_or_default();
        if current != expected_hash {
            return Err(StoreError::Conflict {
                profile: profile.to_string(),
            });
        }
        self.profiles
            .borrow_mut()
            .insert(profile.to_string(), source.to_string());
        Ok(content_hash(source))
    }
}
