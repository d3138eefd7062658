//! Fingerprints of the global source set.
//!
//! A [`CacheFingerprint`] summarizes everything that decides which global table
//! wins: the install root, the base archives (name, size, mtime) and every visible
//! loose resource in the custom, workshop and user override tiers (name, winning
//! path, size, mtime). All inputs are kept in sorted maps, so filesystem enumeration order
//! never leaks into the value.
//!
//! There are two ways to collect the inputs:
//!
//! - [`FingerprintInputs::from_listing`]: directory listings and `stat` calls only.
//!   Used on every start-up to validate the snapshot.
//! - [`FingerprintInputs::from_indexes`]: derived from fully scanned
//!   [`SourceIndex`]es. Used before committing a rebuilt snapshot.
//!
//! Both feed the same encoder and agree bit-for-bit on an unchanged file set; a
//! snapshot is only committed when they do.

use crate::context::GlobalSources;
use crate::index::{Container, SourceIndex};
use crate::name::ResourceName;
use crate::scanner::{list_roots, visible_files, ScanEnv};
use crate::tier::SourceTier;
use crate::utils::FileStamp;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

const FINGERPRINT_DOMAIN: &[u8] = b"gda-resman/fingerprint/1";

/// Deterministic summary of the global source set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheFingerprint(pub u64);

impl fmt::Display for CacheFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Sorted fingerprint inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintInputs {
    install_root: String,
    /// Lowercase archive file name → stamp (`None` when it could not be read).
    archives: BTreeMap<String, Option<FileStamp>>,
    /// Tier → name → (path of the winning file, stamp).
    loose: BTreeMap<SourceTier, BTreeMap<ResourceName, (String, FileStamp)>>,
}

impl FingerprintInputs {
    pub fn new(install_root: &Utf8Path) -> Self {
        Self {
            install_root: install_root.as_str().to_string(),
            ..Self::default()
        }
    }

    pub fn add_archive(&mut self, path: &Utf8Path, stamp: Option<FileStamp>) {
        let key = path.file_name().unwrap_or(path.as_str()).to_ascii_lowercase();
        self.archives.insert(key, stamp);
    }

    pub fn add_loose(&mut self, tier: SourceTier, name: ResourceName, path: &Utf8Path, stamp: FileStamp) {
        self.loose
            .entry(tier)
            .or_default()
            .insert(name, (path.as_str().to_string(), stamp));
    }

    /// Fast form: list the global sources without opening any container.
    pub fn from_listing(sources: &GlobalSources, env: &ScanEnv) -> Self {
        let mut inputs = Self::new(&sources.install_root);
        for archive in &sources.base_archives {
            inputs.add_archive(archive, FileStamp::of(archive).ok());
        }
        for (tier, roots) in sources.loose_tiers() {
            let listings = list_roots(roots, env);
            for (name, file) in visible_files(&listings) {
                inputs.add_loose(tier, name.clone(), &file.path, file.stamp);
            }
        }
        inputs
    }

    /// Full form: collect from scanned indexes. `base` is the base install index;
    /// `loose` holds the custom, workshop and user override indexes.
    pub fn from_indexes<'a>(
        install_root: &Utf8Path,
        base: &SourceIndex,
        loose: impl IntoIterator<Item = &'a SourceIndex>,
    ) -> Self {
        let mut inputs = Self::new(install_root);
        for container in base.containers() {
            inputs.add_archive(&container.path, container.stamp);
        }
        for index in loose {
            for (name, location) in index.entries() {
                if let Container::File(path) = &location.container {
                    inputs.add_loose(index.tier(), name.clone(), path, location.stamp);
                }
            }
        }
        inputs
    }

    pub fn fingerprint(&self) -> CacheFingerprint {
        let mut buf = Vec::with_capacity(64 + self.loose.values().map(|m| m.len() * 40).sum::<usize>());
        push_bytes(&mut buf, FINGERPRINT_DOMAIN);
        push_bytes(&mut buf, self.install_root.as_bytes());

        push_u64(&mut buf, self.archives.len() as u64);
        for (name, stamp) in &self.archives {
            push_bytes(&mut buf, name.as_bytes());
            match stamp {
                Some(stamp) => {
                    buf.push(1);
                    push_stamp(&mut buf, stamp);
                }
                None => buf.push(0),
            }
        }

        push_u64(&mut buf, self.loose.len() as u64);
        for (tier, names) in &self.loose {
            push_bytes(&mut buf, tier.tag().as_bytes());
            push_u64(&mut buf, names.len() as u64);
            for (name, (path, stamp)) in names {
                push_bytes(&mut buf, name.as_str().as_bytes());
                push_bytes(&mut buf, path.as_bytes());
                push_stamp(&mut buf, stamp);
            }
        }

        CacheFingerprint(xxh3_64(&buf))
    }

    /// Number of visible loose resources across all tiers.
    pub fn loose_count(&self) -> usize {
        self.loose.values().map(BTreeMap::len).sum()
    }
}

fn push_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    push_u64(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn push_stamp(buf: &mut Vec<u8>, stamp: &FileStamp) {
    push_u64(buf, stamp.size);
    push_u64(buf, stamp.mtime);
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn name(s: &str) -> ResourceName {
        ResourceName::parse(s).unwrap()
    }

    fn stamp(size: u64) -> FileStamp {
        FileStamp { size, mtime: 1_000 }
    }

    fn user_file(name: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("/home/player/override/{name}"))
    }

    fn inputs_for(names: &[String]) -> FingerprintInputs {
        let mut inputs = FingerprintInputs::new(Utf8Path::new("/games/nwn2"));
        inputs.add_archive(Utf8Path::new("/games/nwn2/Data/2da.zip"), Some(stamp(10)));
        for n in names {
            inputs.add_loose(SourceTier::UserOverrideDir, name(n), &user_file(n), stamp(1));
        }
        inputs
    }

    #[test]
    fn test_display_is_fixed_width_hex() {
        assert_eq!(CacheFingerprint(0xab).to_string(), "00000000000000ab");
    }

    #[test]
    fn test_install_root_matters() {
        let a = FingerprintInputs::new(Utf8Path::new("/a")).fingerprint();
        let b = FingerprintInputs::new(Utf8Path::new("/b")).fingerprint();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tier_assignment_matters() {
        let mut a = FingerprintInputs::new(Utf8Path::new("/a"));
        a.add_loose(SourceTier::UserOverrideDir, name("feat.2da"), &user_file("feat.2da"), stamp(1));
        let mut b = FingerprintInputs::new(Utf8Path::new("/a"));
        b.add_loose(SourceTier::WorkshopOverride, name("feat.2da"), &user_file("feat.2da"), stamp(1));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_edit_in_place_changes_fingerprint() {
        let mut a = inputs_for(&["feat.2da".into()]);
        let before = a.fingerprint();
        a.add_loose(SourceTier::UserOverrideDir, name("feat.2da"), &user_file("feat.2da"), stamp(2));
        assert_ne!(before, a.fingerprint());
    }

    #[test]
    fn test_winning_path_matters() {
        // Same name, size and mtime, but a different workshop item wins.
        let mut a = FingerprintInputs::new(Utf8Path::new("/a"));
        a.add_loose(
            SourceTier::WorkshopOverride,
            name("feat.2da"),
            Utf8Path::new("/ws/1001/feat.2da"),
            stamp(1),
        );
        let mut b = FingerprintInputs::new(Utf8Path::new("/a"));
        b.add_loose(
            SourceTier::WorkshopOverride,
            name("feat.2da"),
            Utf8Path::new("/ws/1002/feat.2da"),
            stamp(1),
        );
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_unreadable_archive_differs_from_readable() {
        let mut a = FingerprintInputs::new(Utf8Path::new("/a"));
        a.add_archive(Utf8Path::new("/a/Data/2da.zip"), None);
        let mut b = FingerprintInputs::new(Utf8Path::new("/a"));
        b.add_archive(Utf8Path::new("/a/Data/2da.zip"), Some(FileStamp::default()));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    fn resource_names() -> impl Strategy<Value = BTreeSet<String>> {
        prop::collection::btree_set("[a-z][a-z0-9_]{0,10}\\.(2da|tlk|dds)", 1..40)
    }

    proptest! {
        #[test]
        fn prop_enumeration_order_is_irrelevant(
            names in resource_names(),
            seed in any::<u64>(),
        ) {
            let sorted: Vec<String> = names.iter().cloned().collect();
            let mut shuffled = sorted.clone();
            // Deterministic Fisher-Yates driven by the seed.
            let mut state = seed | 1;
            for i in (1..shuffled.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                shuffled.swap(i, (state % (i as u64 + 1)) as usize);
            }
            prop_assert_eq!(inputs_for(&sorted).fingerprint(), inputs_for(&shuffled).fingerprint());
        }

        #[test]
        fn prop_removing_any_name_changes_fingerprint(
            names in resource_names(),
            pick in any::<prop::sample::Index>(),
        ) {
            let all: Vec<String> = names.iter().cloned().collect();
            let mut fewer = all.clone();
            fewer.remove(pick.index(all.len()));
            prop_assert_ne!(inputs_for(&all).fingerprint(), inputs_for(&fewer).fingerprint());
        }

        #[test]
        fn prop_adding_a_name_changes_fingerprint(
            names in resource_names(),
            extra in "[a-z]{12}\\.2da",
        ) {
            prop_assume!(!names.contains(&extra));
            let all: Vec<String> = names.iter().cloned().collect();
            let mut more = all.clone();
            more.push(extra);
            prop_assert_ne!(inputs_for(&all).fingerprint(), inputs_for(&more).fingerprint());
        }
    }
}
