//! Module and save descriptors.
//!
//! The resource manager does not read module or save-game formats itself. A
//! [`ModuleCatalog`] turns a module identity or a save location into a
//! [`ModuleDescriptor`]: where the module lives, which HAK packs it mounts (in
//! declared order), its campaign and its custom string table.
//!
//! [`FsModuleCatalog`] reads JSON sidecars written by an external metadata
//! extractor:
//!
//! ```text
//! modules/
//!   Alpha.mod
//!   Alpha.module.json        # sidecar for a packed module
//!   Beta/
//!     module.json            # sidecar for a directory module
//! saves/
//!   000001 - Quicksave/
//!     savegame.json          # { "module": "Alpha", "campaign": "Main" }
//! ```
//!
//! A module without a sidecar mounts no HAKs and has no campaign.

use crate::error::{Error, Result};
use crate::layout::{GameLayout, ModuleLocation};
use crate::utils::find_child_ci;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Everything needed to mount a module's tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    pub identity: String,
    pub location: ModuleLocation,
    /// HAK pack names in declared order; the first declared wins.
    #[serde(default)]
    pub haks: Vec<String>,
    #[serde(default)]
    pub campaign: Option<String>,
    #[serde(default)]
    pub custom_tlk: Option<String>,
}

impl ModuleDescriptor {
    /// Key for the module context cache. Two descriptors share a key only if they
    /// would mount the same tiers.
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.identity.to_ascii_lowercase(),
            self.location.path(),
            self.haks.join(",").to_ascii_lowercase(),
            self.campaign.as_deref().unwrap_or_default().to_ascii_lowercase(),
            self.custom_tlk.as_deref().unwrap_or_default().to_ascii_lowercase()
        )
    }
}

/// Resolves module identities and save locations.
pub trait ModuleCatalog: Send + Sync {
    fn describe_module(&self, identity: &str) -> Result<ModuleDescriptor>;

    fn describe_save(&self, location: &Utf8Path) -> Result<ModuleDescriptor>;
}

/// Module sidecar contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleInfo {
    #[serde(default)]
    pub haks: Vec<String>,
    #[serde(default)]
    pub campaign: Option<String>,
    #[serde(default)]
    pub custom_tlk: Option<String>,
}

/// Save sidecar contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveInfo {
    pub module: String,
    /// Overrides the module's own campaign when present.
    #[serde(default)]
    pub campaign: Option<String>,
}

pub const SAVE_SIDECAR: &str = "savegame.json";
const DIRECTORY_MODULE_SIDECAR: &str = "module.json";

/// [`ModuleCatalog`] backed by JSON sidecars and a [`GameLayout`].
#[derive(Debug, Clone)]
pub struct FsModuleCatalog {
    layout: GameLayout,
}

impl FsModuleCatalog {
    pub fn new(layout: GameLayout) -> Self {
        Self { layout }
    }

    fn sidecar_path(location: &ModuleLocation) -> Option<Utf8PathBuf> {
        match location {
            ModuleLocation::Archive(path) => {
                let parent = path.parent()?;
                let stem = path.file_stem()?;
                find_child_ci(parent, &format!("{stem}.module.json"))
            }
            ModuleLocation::Directory(path) => find_child_ci(path, DIRECTORY_MODULE_SIDECAR),
        }
    }

    fn read_module_info(location: &ModuleLocation) -> Result<ModuleInfo> {
        let Some(path) = Self::sidecar_path(location) else {
            tracing::debug!("No sidecar for module {}", location.path());
            return Ok(ModuleInfo::default());
        };
        let contents = std::fs::read_to_string(path.as_std_path())?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl ModuleCatalog for FsModuleCatalog {
    fn describe_module(&self, identity: &str) -> Result<ModuleDescriptor> {
        let location = self
            .layout
            .find_module(identity)
            .ok_or_else(|| Error::ModuleNotFound(identity.to_string()))?;
        let info = Self::read_module_info(&location)?;

        Ok(ModuleDescriptor {
            identity: identity.to_string(),
            location,
            haks: info.haks,
            campaign: info.campaign,
            custom_tlk: info.custom_tlk,
        })
    }

    fn describe_save(&self, location: &Utf8Path) -> Result<ModuleDescriptor> {
        let sidecar = find_child_ci(location, SAVE_SIDECAR)
            .ok_or_else(|| Error::SaveNotFound(location.to_path_buf()))?;
        let contents = std::fs::read_to_string(sidecar.as_std_path())?;
        let save: SaveInfo = serde_json::from_str(&contents)?;

        let mut descriptor = self.describe_module(&save.module)?;
        if save.campaign.is_some() {
            descriptor.campaign = save.campaign;
        }
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Utf8PathBuf, FsModuleCatalog) {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let install = root.join("install");
        let user = root.join("user");
        fs::create_dir_all(install.join("Modules/Beta")).unwrap();
        fs::create_dir_all(user.join("modules")).unwrap();
        fs::write(user.join("modules/Alpha.mod"), b"MOD V1.0").unwrap();
        let catalog = FsModuleCatalog::new(GameLayout::new(install, user));
        (dir, root, catalog)
    }

    #[test]
    fn test_packed_module_sidecar() {
        let (_dir, root, catalog) = setup();
        fs::write(
            root.join("user/modules/Alpha.module.json"),
            r#"{ "haks": ["rules", "art"], "campaign": "Main", "customTlk": "alpha" }"#,
        )
        .unwrap();

        let descriptor = catalog.describe_module("alpha").unwrap();
        assert_eq!(
            descriptor.location,
            ModuleLocation::Archive(root.join("user/modules/Alpha.mod"))
        );
        assert_eq!(descriptor.haks, ["rules", "art"]);
        assert_eq!(descriptor.campaign.as_deref(), Some("Main"));
        assert_eq!(descriptor.custom_tlk.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_directory_module_without_sidecar() {
        let (_dir, root, catalog) = setup();
        let descriptor = catalog.describe_module("Beta").unwrap();
        assert_eq!(
            descriptor.location,
            ModuleLocation::Directory(root.join("install/Modules/Beta"))
        );
        assert!(descriptor.haks.is_empty());
        assert!(descriptor.campaign.is_none());
    }

    #[test]
    fn test_unknown_module() {
        let (_dir, _root, catalog) = setup();
        assert!(matches!(
            catalog.describe_module("Gamma"),
            Err(Error::ModuleNotFound(_))
        ));
    }

    #[test]
    fn test_malformed_sidecar_is_an_error() {
        let (_dir, root, catalog) = setup();
        fs::write(root.join("install/Modules/Beta/module.json"), "{ not json").unwrap();
        assert!(matches!(catalog.describe_module("Beta"), Err(Error::Json(_))));
    }

    #[test]
    fn test_save_overrides_campaign() {
        let (_dir, root, catalog) = setup();
        fs::write(
            root.join("user/modules/Alpha.module.json"),
            r#"{ "campaign": "Main" }"#,
        )
        .unwrap();
        let save_dir = root.join("user/saves/000001");
        fs::create_dir_all(&save_dir).unwrap();
        fs::write(
            save_dir.join(SAVE_SIDECAR),
            r#"{ "module": "Alpha", "campaign": "Side" }"#,
        )
        .unwrap();

        let descriptor = catalog.describe_save(&save_dir).unwrap();
        assert_eq!(descriptor.identity, "Alpha");
        assert_eq!(descriptor.campaign.as_deref(), Some("Side"));

        assert!(matches!(
            catalog.describe_save(&root.join("user/saves/missing")),
            Err(Error::SaveNotFound(_))
        ));
    }

    #[test]
    fn test_cache_key_tracks_mounts() {
        let (_dir, _root, catalog) = setup();
        let a = catalog.describe_module("alpha").unwrap();
        let mut b = a.clone();
        assert_eq!(a.cache_key(), b.cache_key());
        b.haks.push("extra".into());
        assert_ne!(a.cache_key(), b.cache_key());
    }
}
