//! Asset domain model.
//!
//! Assets are stimulus artifacts attached to nodes. They are addressed by an
//! [`AssetKey`] derived from what produces them, so that identical inputs
//! map to one materialized artifact.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// How an asset comes into existence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetDeclaration {
    /// A source file on local disk, keyed by its content.
    File {
        path: PathBuf,
        #[serde(default)]
        persistent: bool,
    },
    /// Produced by a registered generator from JSON parameters.
    Generated {
        generator: String,
        #[serde(default)]
        params: Value,
        #[serde(default)]
        is_folder: bool,
        #[serde(default)]
        persistent: bool,
    },
    /// Already hosted elsewhere; only validated.
    External { url: String },
}

impl AssetDeclaration {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File {
            path: path.into(),
            persistent: false,
        }
    }

    pub fn generated(generator: impl Into<String>, params: Value) -> Self {
        Self::Generated {
            generator: generator.into(),
            params,
            is_folder: false,
            persistent: false,
        }
    }

    pub fn external(url: impl Into<String>) -> Self {
        Self::External { url: url.into() }
    }

    /// Keep the artifact and its key mapping across restarts.
    #[must_use]
    pub fn cached(mut self) -> Self {
        match &mut self {
            Self::File { persistent, .. } | Self::Generated { persistent, .. } => *persistent = true,
            Self::External { .. } => {}
        }
        self
    }

    /// Mark a generated asset as producing a directory of files.
    #[must_use]
    pub fn folder(mut self) -> Self {
        if let Self::Generated { is_folder, .. } = &mut self {
            *is_folder = true;
        }
        self
    }

    pub fn is_persistent(&self) -> bool {
        match self {
            Self::File { persistent, .. } | Self::Generated { persistent, .. } => *persistent,
            Self::External { .. } => true,
        }
    }

    /// Short human-readable label for logs and errors.
    pub fn label(&self) -> String {
        match self {
            Self::File { path, .. } => format!("file:{}", path.display()),
            Self::Generated { generator, .. } => format!("generated:{generator}"),
            Self::External { url } => format!("external:{url}"),
        }
    }
}

/// Content/parameter-derived identity of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetKey(String);

impl AssetKey {
    pub fn for_content(bytes: &[u8]) -> Self {
        Self(format!("file-{:x}", Sha256::digest(bytes)))
    }

    /// `params` is serialized canonically (object keys sorted).
    pub fn for_generated(generator: &str, params: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(generator.as_bytes());
        hasher.update([0u8]);
        hasher.update(params.to_string().as_bytes());
        Self(format!("gen-{:x}", hasher.finalize()))
    }

    pub fn for_url(url: &str) -> Self {
        Self(format!("ext-{:x}", Sha256::digest(url.as_bytes())))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a ready asset lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Storage-relative path (or the URL itself for external assets)
    pub path: String,
    /// Public URL for display
    pub url: String,
    pub is_folder: bool,
}

/// Materialization progress of an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializationState {
    Unmaterialized,
    InProgress,
    Ready,
}

/// Cache-side view of one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub key: AssetKey,
    pub state: MaterializationState,
    pub location: Option<Location>,
    pub persistent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_key_ignores_param_order() {
        let a: Value = serde_json::from_str(r#"{"stim_name":"iso_800ms","list_iois":[800,800]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"list_iois":[800,800],"stim_name":"iso_800ms"}"#).unwrap();
        assert_eq!(
            AssetKey::for_generated("iso", &a),
            AssetKey::for_generated("iso", &b)
        );
        assert_ne!(
            AssetKey::for_generated("iso", &a),
            AssetKey::for_generated("music", &a)
        );
    }

    #[test]
    fn test_content_key_prefix() {
        let key = AssetKey::for_content(b"abc");
        assert!(key.as_str().starts_with("file-"));
        assert_eq!(key.as_str().len(), "file-".len() + 64);
    }

    #[test]
    fn test_declaration_builders() {
        let decl = AssetDeclaration::generated("iso", json!({"n": 1})).cached().folder();
        assert!(decl.is_persistent());
        assert!(matches!(decl, AssetDeclaration::Generated { is_folder: true, .. }));
        assert!(!AssetDeclaration::file("a.mp3").is_persistent());
    }

    #[test]
    fn test_declaration_yaml() {
        let yaml = "kind: external\nurl: https://example.org/rules.png\n";
        let decl: AssetDeclaration = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(decl.label(), "external:https://example.org/rules.png");
    }
}
