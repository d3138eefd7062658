//! Normalized resource names.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Extension carried by rule tables.
pub const TABLE_EXTENSION: &str = "2da";
/// Extension carried by string tables.
pub const STRING_TABLE_EXTENSION: &str = "tlk";

/// Extensions of container files. These are mounted as archives, never indexed as
/// loose resources.
const CONTAINER_EXTENSIONS: &[&str] = &["hak", "mod", "erf", "sav", "zip"];

/// Broad resource family, derived from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Table,
    StringTable,
    Other,
}

/// A case-insensitive resource identifier of the form `stem.ext`, stored lowercase.
///
/// Names never contain path separators; two files that differ only in directory or
/// letter case are the same resource.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceName(String);

impl ResourceName {
    /// Normalize `raw` into a resource name.
    ///
    /// Accepts a bare file name (`"Classes.2DA"`); surrounding whitespace is trimmed.
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim().to_ascii_lowercase();
        let valid = !name.contains(['/', '\\'])
            && name
                .rsplit_once('.')
                .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty());
        if valid {
            Ok(Self(name))
        } else {
            Err(Error::InvalidResourceName(raw.to_string()))
        }
    }

    /// Name for a file found on disk, or `None` when the file is not a loose
    /// resource (no extension, or a container such as `.hak`).
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let name = Self::parse(file_name).ok()?;
        (!CONTAINER_EXTENSIONS.contains(&name.extension())).then_some(name)
    }

    /// Rule table name; `.2da` is appended unless already present.
    pub fn table(stem: &str) -> Result<Self> {
        Self::with_extension(stem, TABLE_EXTENSION)
    }

    /// String table name; `.tlk` is appended unless already present.
    pub fn string_table(stem: &str) -> Result<Self> {
        Self::with_extension(stem, STRING_TABLE_EXTENSION)
    }

    fn with_extension(stem: &str, ext: &str) -> Result<Self> {
        let trimmed = stem.trim();
        let has_ext = trimmed
            .rsplit_once('.')
            .is_some_and(|(_, e)| e.eq_ignore_ascii_case(ext));
        if has_ext {
            Self::parse(trimmed)
        } else {
            Self::parse(&format!("{trimmed}.{ext}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn stem(&self) -> &str {
        self.0.rsplit_once('.').map_or(&self.0, |(stem, _)| stem)
    }

    pub fn extension(&self) -> &str {
        self.0.rsplit_once('.').map_or("", |(_, ext)| ext)
    }

    pub fn kind(&self) -> ResourceKind {
        match self.extension() {
            TABLE_EXTENSION => ResourceKind::Table,
            STRING_TABLE_EXTENSION => ResourceKind::StringTable,
            _ => ResourceKind::Other,
        }
    }
}

/// True for extensions mounted as archive containers.
pub fn is_container_extension(ext: &str) -> bool {
    CONTAINER_EXTENSIONS
        .iter()
        .any(|c| c.eq_ignore_ascii_case(ext))
}

impl TryFrom<String> for ResourceName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ResourceName> for String {
    fn from(name: ResourceName) -> Self {
        name.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let name = ResourceName::parse("  Classes.2DA ").unwrap();
        assert_eq!(name.as_str(), "classes.2da");
        assert_eq!(name.stem(), "classes");
        assert_eq!(name.extension(), "2da");
        assert_eq!(name.kind(), ResourceKind::Table);
    }

    #[test]
    fn test_table_suffix() {
        assert_eq!(ResourceName::table("Feat").unwrap().as_str(), "feat.2da");
        assert_eq!(ResourceName::table("feat.2DA").unwrap().as_str(), "feat.2da");
        assert_eq!(
            ResourceName::string_table("custom").unwrap().kind(),
            ResourceKind::StringTable
        );
    }

    #[test]
    fn test_rejects_paths_and_bare_stems() {
        assert!(ResourceName::parse("override/classes.2da").is_err());
        assert!(ResourceName::parse("classes").is_err());
        assert!(ResourceName::parse(".2da").is_err());
        assert!(ResourceName::table("").is_err());
    }

    #[test]
    fn test_containers_are_not_loose_resources() {
        assert!(ResourceName::from_file_name("mymod.hak").is_none());
        assert!(ResourceName::from_file_name("2DA.ZIP").is_none());
        assert!(ResourceName::from_file_name("readme").is_none());
        assert!(ResourceName::from_file_name("spells.2da").is_some());
    }

    #[test]
    fn test_serde_validates() {
        let name: ResourceName = serde_json::from_str("\"Feat.2da\"").unwrap();
        assert_eq!(name.as_str(), "feat.2da");
        assert!(serde_json::from_str::<ResourceName>("\"a/b.2da\"").is_err());
    }
}
