//! On-disk layout of a game installation and its user directory.
//!
//! Every lookup is case-insensitive on each path component: content is authored on
//! case-insensitive filesystems, so `Data/2DA.zip` and `data/2da.zip` are the same.

use crate::error::{Error, Result};
use crate::utils::{find_child_ci, utf8_path};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// Where a module's own resources live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleLocation {
    /// A packed `<name>.mod` ERF.
    Archive(Utf8PathBuf),
    /// An unpacked `<name>/` directory module.
    Directory(Utf8PathBuf),
}

impl ModuleLocation {
    pub fn path(&self) -> &Utf8Path {
        match self {
            ModuleLocation::Archive(path) | ModuleLocation::Directory(path) => path,
        }
    }
}

/// Roots of a game installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLayout {
    /// Read-only installation directory (holds `Data/`, `dialog.tlk`).
    pub install_root: Utf8PathBuf,
    /// Per-user directory (holds `override/`, `modules/`, `hak/`).
    pub user_root: Utf8PathBuf,
    /// Directory with one sub-directory per installed workshop item.
    pub workshop_root: Option<Utf8PathBuf>,
}

impl GameLayout {
    pub fn new(install_root: impl Into<Utf8PathBuf>, user_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            user_root: user_root.into(),
            workshop_root: None,
        }
    }

    pub fn with_workshop_root(mut self, workshop_root: impl Into<Utf8PathBuf>) -> Self {
        self.workshop_root = Some(workshop_root.into());
        self
    }

    /// Check that the install root exists and carries a `Data` directory.
    pub fn validate(&self) -> Result<()> {
        if !self.install_root.is_dir() {
            return Err(Error::InvalidInstallDir(format!(
                "{} is not a directory",
                self.install_root
            )));
        }
        if self.data_dir().is_none() {
            return Err(Error::InvalidInstallDir(format!(
                "Data not found in {}",
                self.install_root
            )));
        }
        Ok(())
    }

    fn data_dir(&self) -> Option<Utf8PathBuf> {
        find_child_ci(&self.install_root, "Data").filter(|p| p.is_dir())
    }

    /// Base data archives in mount order: ascending lowercase file name, so later
    /// archives (`2da_x1.zip`, `2da_x2.zip`) override earlier ones (`2da.zip`).
    pub fn base_archives(&self) -> Vec<Utf8PathBuf> {
        let Some(data) = self.data_dir() else {
            return Vec::new();
        };
        let mut archives: Vec<(String, Utf8PathBuf)> = list_dir(&data)
            .into_iter()
            .filter(|p| p.is_file())
            .filter(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("zip")))
            .filter_map(|p| Some((p.file_name()?.to_ascii_lowercase(), p)))
            .collect();
        archives.sort();
        archives.into_iter().map(|(_, p)| p).collect()
    }

    /// The base string table, `<install>/dialog.tlk`.
    pub fn dialog_tlk(&self) -> Option<Utf8PathBuf> {
        find_child_ci(&self.install_root, "dialog.tlk").filter(|p| p.is_file())
    }

    pub fn user_override_dir(&self) -> Utf8PathBuf {
        find_child_ci(&self.user_root, "override").unwrap_or_else(|| self.user_root.join("override"))
    }

    /// Workshop item directories, ascending by name. Later items override earlier ones.
    pub fn workshop_items(&self) -> Vec<Utf8PathBuf> {
        let Some(root) = &self.workshop_root else {
            return Vec::new();
        };
        let mut items: Vec<Utf8PathBuf> = list_dir(root).into_iter().filter(|p| p.is_dir()).collect();
        items.sort_by_key(|p| p.file_name().map(str::to_ascii_lowercase));
        items
    }

    /// Locate a module by identity, user modules first. A packed `.mod` wins over a
    /// directory of the same name.
    pub fn find_module(&self, identity: &str) -> Option<ModuleLocation> {
        let file_name = format!("{identity}.mod");
        for dir in self.search_dirs("modules") {
            if let Some(archive) = find_child_ci(&dir, &file_name).filter(|p| p.is_file()) {
                return Some(ModuleLocation::Archive(archive));
            }
            if let Some(directory) = find_child_ci(&dir, identity).filter(|p| p.is_dir()) {
                return Some(ModuleLocation::Directory(directory));
            }
        }
        None
    }

    pub fn find_hak(&self, name: &str) -> Option<Utf8PathBuf> {
        let file_name = format!("{name}.hak");
        self.search_dirs("hak")
            .into_iter()
            .find_map(|dir| find_child_ci(&dir, &file_name).filter(|p| p.is_file()))
    }

    /// Every place a HAK named `name` could appear, in search order, whether or not
    /// it exists yet.
    pub fn hak_candidates(&self, name: &str) -> Vec<Utf8PathBuf> {
        let file_name = format!("{name}.hak");
        [&self.user_root, &self.install_root]
            .into_iter()
            .map(|root| {
                let dir = find_child_ci(root, "hak").unwrap_or_else(|| root.join("hak"));
                find_child_ci(&dir, &file_name).unwrap_or_else(|| dir.join(&file_name))
            })
            .collect()
    }

    pub fn find_campaign(&self, name: &str) -> Option<Utf8PathBuf> {
        self.search_dirs("Campaigns")
            .into_iter()
            .find_map(|dir| find_child_ci(&dir, name).filter(|p| p.is_dir()))
    }

    /// Locate a custom string table; `name` may omit the `.tlk` extension.
    pub fn find_tlk(&self, name: &str) -> Option<Utf8PathBuf> {
        let file_name = if name.to_ascii_lowercase().ends_with(".tlk") {
            name.to_string()
        } else {
            format!("{name}.tlk")
        };
        self.search_dirs("tlk")
            .into_iter()
            .find_map(|dir| find_child_ci(&dir, &file_name).filter(|p| p.is_file()))
    }

    pub fn default_snapshot_dir(&self) -> Utf8PathBuf {
        self.user_root.join("cache").join("resman")
    }

    /// `<user>/<name>` then `<install>/<name>`, whichever exist.
    fn search_dirs(&self, name: &str) -> Vec<Utf8PathBuf> {
        [&self.user_root, &self.install_root]
            .into_iter()
            .filter_map(|root| find_child_ci(root, name))
            .filter(|p| p.is_dir())
            .collect()
    }
}

fn list_dir(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    match std::fs::read_dir(dir.as_std_path()) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter_map(|e| utf8_path(e.path()))
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to list {}: {}", dir, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Utf8Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_base_archive_order() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let install = root.join("install");
        touch(&install.join("Data/2DA_X1.zip"));
        touch(&install.join("Data/2da.zip"));
        touch(&install.join("Data/2da_x2.zip"));
        touch(&install.join("Data/readme.txt"));

        let layout = GameLayout::new(&install, root.join("user"));
        layout.validate().unwrap();
        let names: Vec<_> = layout
            .base_archives()
            .iter()
            .map(|p| p.file_name().unwrap().to_string())
            .collect();
        assert_eq!(names, ["2da.zip", "2DA_X1.zip", "2da_x2.zip"]);
    }

    #[test]
    fn test_validate_rejects_missing_data() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let layout = GameLayout::new(&root, root.join("user"));
        assert!(matches!(layout.validate(), Err(Error::InvalidInstallDir(_))));
        let layout = GameLayout::new(root.join("missing"), root.join("user"));
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_find_module_prefers_user_dir() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let install = root.join("install");
        let user = root.join("user");
        touch(&install.join("Modules/Alpha.mod"));
        touch(&user.join("modules/alpha.mod"));
        std::fs::create_dir_all(install.join("Modules/Beta")).unwrap();

        let layout = GameLayout::new(&install, &user);
        assert_eq!(
            layout.find_module("ALPHA"),
            Some(ModuleLocation::Archive(user.join("modules/alpha.mod")))
        );
        assert_eq!(
            layout.find_module("beta"),
            Some(ModuleLocation::Directory(install.join("Modules/Beta")))
        );
        assert_eq!(layout.find_module("gamma"), None);
    }

    #[test]
    fn test_find_hak_tlk_and_campaign() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let install = root.join("install");
        let user = root.join("user");
        touch(&user.join("hak/Rules.hak"));
        touch(&install.join("tlk/custom.tlk"));
        std::fs::create_dir_all(install.join("Campaigns/Main")).unwrap();

        let layout = GameLayout::new(&install, &user);
        assert_eq!(layout.find_hak("rules"), Some(user.join("hak/Rules.hak")));
        assert_eq!(layout.find_tlk("custom"), Some(install.join("tlk/custom.tlk")));
        assert_eq!(layout.find_tlk("CUSTOM.TLK"), Some(install.join("tlk/custom.tlk")));
        assert_eq!(layout.find_campaign("main"), Some(install.join("Campaigns/Main")));
        assert_eq!(layout.find_hak("missing"), None);
    }

    #[test]
    fn test_hak_candidates_cover_both_roots() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let install = root.join("install");
        let user = root.join("user");
        touch(&install.join("HAK/other.hak"));

        let layout = GameLayout::new(&install, &user);
        assert_eq!(
            layout.hak_candidates("ghost"),
            vec![user.join("hak/ghost.hak"), install.join("HAK/ghost.hak")]
        );
    }

    #[test]
    fn test_workshop_items_sorted() {
        let dir = tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let workshop = root.join("workshop");
        for item in ["200", "100", "Zed", "abc"] {
            std::fs::create_dir_all(workshop.join(item)).unwrap();
        }
        touch(&workshop.join("stray.txt"));

        let layout = GameLayout::new(&root, &root).with_workshop_root(&workshop);
        let items: Vec<_> = layout
            .workshop_items()
            .iter()
            .map(|p| p.file_name().unwrap().to_string())
            .collect();
        assert_eq!(items, ["100", "200", "abc", "Zed"]);
    }
}
