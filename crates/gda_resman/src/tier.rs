//! Source tiers and their precedence.
//!
//! Precedence, highest first:
//!
//! 1. [`HakOverride`](SourceTier::HakOverride): the active module's HAK packs, in
//!    declared order (the first declared HAK wins)
//! 2. [`CustomOverrideDir`](SourceTier::CustomOverrideDir): directories registered
//!    at runtime
//! 3. [`WorkshopOverride`](SourceTier::WorkshopOverride): installed workshop items
//! 4. [`UserOverrideDir`](SourceTier::UserOverrideDir): the user's `override` folder
//! 5. [`CampaignFolder`](SourceTier::CampaignFolder): the active campaign's folder
//! 6. [`ModuleArchive`](SourceTier::ModuleArchive): the module's own archive
//! 7. [`BaseInstall`](SourceTier::BaseInstall): the game's data archives

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTier {
    /// HAK pack at this position of the module's declared HAK list.
    HakOverride(usize),
    CustomOverrideDir,
    WorkshopOverride,
    UserOverrideDir,
    CampaignFolder,
    ModuleArchive,
    BaseInstall,
}

impl SourceTier {
    /// Lower ranks take precedence.
    pub fn rank(&self) -> (u8, usize) {
        match *self {
            SourceTier::HakOverride(position) => (0, position),
            SourceTier::CustomOverrideDir => (1, 0),
            SourceTier::WorkshopOverride => (2, 0),
            SourceTier::UserOverrideDir => (3, 0),
            SourceTier::CampaignFolder => (4, 0),
            SourceTier::ModuleArchive => (5, 0),
            SourceTier::BaseInstall => (6, 0),
        }
    }

    /// Tiers that belong to the active module and change on every module switch.
    pub fn is_module_scoped(&self) -> bool {
        matches!(
            self,
            SourceTier::HakOverride(_) | SourceTier::CampaignFolder | SourceTier::ModuleArchive
        )
    }

    /// Short stable tag, used in fingerprints and logs.
    pub fn tag(&self) -> &'static str {
        match self {
            SourceTier::HakOverride(_) => "hak",
            SourceTier::CustomOverrideDir => "custom",
            SourceTier::WorkshopOverride => "workshop",
            SourceTier::UserOverrideDir => "override",
            SourceTier::CampaignFolder => "campaign",
            SourceTier::ModuleArchive => "module",
            SourceTier::BaseInstall => "install",
        }
    }
}

impl Ord for SourceTier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for SourceTier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTier::HakOverride(position) => write!(f, "hak#{position}"),
            other => f.write_str(other.tag()),
        }
    }
}
