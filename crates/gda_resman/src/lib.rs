//! Layered resource manager for a moddable RPG.
//!
//! Game rules live in 2DA tables and localized strings in TLK files. Both can be
//! shipped by the base installation and overridden by several layers of user
//! content. This crate mounts those layers as precedence-ordered source tiers and
//! answers lookups with the highest-precedence definition:
//!
//! 1. HAK packs declared by the active module, in declaration order
//! 2. Custom override directories registered at runtime
//! 3. Workshop content
//! 4. The user `override` directory
//! 5. The active campaign's folder
//! 6. The active module's archive or directory
//! 7. The base installation's data archives
//!
//! It supports:
//!
//! - **Fast startup**: a fingerprinted on-disk snapshot of every global table
//! - **Fast module switching**: a small LRU of fully built module contexts
//! - **Bounded memory**: a byte-budgeted tier cache with zstd compression
//! - **Degraded operation**: unreadable containers and broken files are skipped
//!
//! # Example
//!
//! ```no_run
//! use gda_resman::{GameLayout, ResmanConfig, ResourceManager};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let layout = GameLayout::new("/games/nwn", "/home/me/Documents/nwn");
//! let manager = ResourceManager::open(layout, ResmanConfig::default())?;
//!
//! manager.set_active_module("chapter1")?;
//! if let Some(classes) = manager.get_table_with_overrides("classes") {
//!     println!("{} classes", classes.row_count());
//! }
//! println!("{}", manager.get_string(42));
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod layout;
pub mod manager;
pub mod module_cache;
pub mod name;
pub mod parsing;
pub mod resolver;
pub mod scanner;
pub mod snapshot;
pub mod tier;
pub mod tier_cache;
pub mod utils;

// Re-export main types
pub use catalog::{FsModuleCatalog, ModuleCatalog, ModuleDescriptor};
pub use config::ResmanConfig;
pub use context::{ActiveContext, ContextId, GlobalTiers};
pub use error::{Error, Result};
pub use fingerprint::CacheFingerprint;
pub use index::{Container, ResourceLocation, SourceIndex};
pub use layout::{GameLayout, ModuleLocation};
pub use manager::{ManagerState, ResourceManager, CUSTOM_TLK_FLAG};
pub use name::{ResourceKind, ResourceName};
pub use parsing::{ParsingService, StandardParsers};
pub use resolver::{Resolution, ResolveTrace, TierOutcome};
pub use snapshot::{SnapshotLoad, SnapshotStore};
pub use tier::SourceTier;
pub use tier_cache::CacheStats;

pub use gda_formats::{StringTable, Table};
