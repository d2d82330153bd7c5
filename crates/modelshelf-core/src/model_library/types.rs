//! Core types for the local model library.

use super::filename::Filename;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of installed model.
///
/// Every type has its own default installation directory and a distinct
/// spelling in the remote catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Checkpoint,
    Embedding,
    Hypernetwork,
    Lora,
    Lycoris,
    Vae,
}

impl ModelType {
    pub const ALL: [ModelType; 6] = [
        ModelType::Checkpoint,
        ModelType::Embedding,
        ModelType::Hypernetwork,
        ModelType::Lora,
        ModelType::Lycoris,
        ModelType::Vae,
    ];

    /// Upper-case key used in scan store keys and image names.
    pub fn key_name(&self) -> &'static str {
        match self {
            ModelType::Checkpoint => "CHECKPOINT",
            ModelType::Embedding => "EMBEDDING",
            ModelType::Hypernetwork => "HYPERNETWORK",
            ModelType::Lora => "LORA",
            ModelType::Lycoris => "LYCORIS",
            ModelType::Vae => "VAE",
        }
    }

    /// Parse an upper-case key name.
    pub fn from_key_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.key_name() == name)
    }

    /// Spelling of this type in catalog responses.
    pub fn catalog_name(&self) -> &'static str {
        match self {
            ModelType::Checkpoint => "Checkpoint",
            ModelType::Embedding => "TextualInversion",
            ModelType::Hypernetwork => "Hypernetwork",
            ModelType::Lora => "LORA",
            ModelType::Lycoris => "LoCon",
            ModelType::Vae => "VAE",
        }
    }

    /// Map a catalog type name to a local type.
    pub fn from_catalog_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.catalog_name() == name)
    }

    /// Directory below the library root where this type is installed.
    pub fn default_subdir(&self) -> &'static str {
        match self {
            ModelType::Checkpoint => "models/Stable-diffusion",
            ModelType::Embedding => "embeddings",
            ModelType::Hypernetwork => "models/hypernetworks",
            ModelType::Lora => "models/Lora",
            ModelType::Lycoris => "models/LyCORIS",
            ModelType::Vae => "models/VAE",
        }
    }

    /// Human-readable label.
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Checkpoint => "Checkpoint",
            ModelType::Embedding => "Embedding",
            ModelType::Hypernetwork => "Hypernetwork",
            ModelType::Lora => "LoRA",
            ModelType::Lycoris => "LyCORIS",
            ModelType::Vae => "VAE",
        }
    }

    /// Base of the image names of the model called `name`: `{TYPE}_{name}`.
    pub fn image_key(&self, name: &str) -> String {
        format!("{}_{}", self.key_name(), name)
    }

    /// Companion types ride along with a primary model version and may be
    /// categorized differently from it in the catalog.
    pub fn is_companion_type(&self) -> bool {
        matches!(self, ModelType::Vae)
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_name())
    }
}

impl std::str::FromStr for ModelType {
    type Err = crate::ShelfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Self::from_key_name(&upper)
            .or_else(|| Self::from_catalog_name(s))
            .ok_or_else(|| crate::ShelfError::validation("model_type", format!("unknown type {s:?}")))
    }
}

/// Identity of one installed model: its type plus its filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub model_type: ModelType,
    pub filename: Filename,
}

impl ModelKey {
    pub fn new(model_type: ModelType, filename: Filename) -> Self {
        Self {
            model_type,
            filename,
        }
    }

    /// Parse a `{TYPE}/{filename}` store key.
    pub fn parse(key: &str) -> Option<Self> {
        let (ty, name) = key.split_once('/')?;
        let model_type = ModelType::from_key_name(ty)?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(model_type, Filename::parse(name)))
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model_type.key_name(), self.filename)
    }
}

/// Where a handle stands relative to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    /// No scan record yet.
    NotScanned,
    /// Scanned, but not linked to a catalog model.
    Scanned,
    /// Linked, and one installed sibling is the latest version.
    Latest,
    /// Linked, the catalog has a newer version that is not installed.
    Outdated,
    /// Linked and not the latest, but a sibling covers the latest version.
    Previous,
}

impl ScanState {
    pub fn label(&self) -> &'static str {
        match self {
            ScanState::NotScanned => "Not Scanned",
            ScanState::Scanned => "Scanned",
            ScanState::Latest => "Latest",
            ScanState::Outdated => "Outdated",
            ScanState::Previous => "Previous",
        }
    }
}

/// Companion (VAE) presence for a handle whose version declares one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanionState {
    None,
    Present,
    Missing,
}

/// Summary status shown in listings, e.g. `Latest I +V`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub scan: ScanState,
    /// Some other handle declares this one as its companion.
    pub included: bool,
    pub companion: CompanionState,
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scan.label())?;
        if self.included {
            f.write_str(" I")?;
        }
        match self.companion {
            CompanionState::Present => f.write_str(" +V"),
            CompanionState::Missing => f.write_str(" -V"),
            CompanionState::None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_roundtrip() {
        for ty in ModelType::ALL {
            assert_eq!(ModelType::from_key_name(ty.key_name()), Some(ty));
            assert_eq!(ModelType::from_catalog_name(ty.catalog_name()), Some(ty));
        }
        assert_eq!("lora".parse::<ModelType>().unwrap(), ModelType::Lora);
        assert_eq!("TextualInversion".parse::<ModelType>().unwrap(), ModelType::Embedding);
        assert!("Poses".parse::<ModelType>().is_err());
    }

    #[test]
    fn test_model_key_display_and_parse() {
        let key = ModelKey::new(ModelType::Lora, Filename::parse("detail.v2.safetensors"));
        assert_eq!(key.to_string(), "LORA/detail.v2.safetensors");
        assert_eq!(ModelKey::parse("LORA/detail.v2.safetensors"), Some(key));
        assert_eq!(ModelKey::parse("BOGUS/x.pt"), None);
        assert_eq!(ModelKey::parse("VAE/"), None);
    }

    #[test]
    fn test_status_string() {
        let status = ModelStatus {
            scan: ScanState::Latest,
            included: true,
            companion: CompanionState::Missing,
        };
        assert_eq!(status.to_string(), "Latest I -V");

        let status = ModelStatus {
            scan: ScanState::NotScanned,
            included: false,
            companion: CompanionState::None,
        };
        assert_eq!(status.to_string(), "Not Scanned");
    }
}
