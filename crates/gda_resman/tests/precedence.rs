mod common;

use common::{classes, Fixture};
use gda_formats::ErfType;
use gda_resman::{ResourceManager, ResourceName, SourceTier};
use proptest::prelude::*;

/// Install with a 5-row `classes`, a 3-row workshop copy and a 7-row HAK copy
/// mounted by module `alpha`.
fn layered() -> Fixture {
    let fx = Fixture::new();
    fx.write_zip(
        "install/Data/2da.zip",
        &[("classes.2da", classes(5, "base")), ("feat.2da", classes(2, "feat"))],
    );
    fx.write("workshop/1001/classes.2da", &classes(3, "ws"));
    fx.write_erf("user/hak/rules.hak", ErfType::Hak, &[("classes.2da", classes(7, "hak"))]);
    fx.write_erf("user/modules/alpha.mod", ErfType::Mod, &[("spells.2da", classes(1, "mod"))]);
    fx.write("user/modules/alpha.module.json", br#"{ "haks": ["rules"] }"#);
    fx
}

#[test]
fn test_hak_then_workshop_then_install() {
    let fx = layered();
    let manager = ResourceManager::open(fx.layout(), fx.config()).unwrap();

    manager.set_active_module("alpha").unwrap();
    assert_eq!(manager.get_table_with_overrides("classes").unwrap().row_count(), 7);

    fx.remove("user/hak/rules.hak");
    manager.set_active_module("alpha").unwrap();
    assert_eq!(manager.get_table_with_overrides("classes").unwrap().row_count(), 3);

    fx.remove("workshop/1001");
    assert!(manager.refresh().unwrap());
    assert_eq!(manager.get_table_with_overrides("classes").unwrap().row_count(), 5);
}

#[test]
fn test_get_table_ignores_overrides() {
    let fx = layered();
    let manager = ResourceManager::open(fx.layout(), fx.config()).unwrap();
    manager.set_active_module("alpha").unwrap();

    let base = manager.get_table("classes.2da").unwrap();
    assert_eq!(base.row_count(), 5);
    assert_eq!(base.cell(0, 0), Some("base0"));
    assert_eq!(manager.get_table_with_overrides("CLASSES").unwrap().cell(0, 0), Some("hak0"));
}

#[test]
fn test_module_tier_and_missing_table() {
    let fx = layered();
    let manager = ResourceManager::open(fx.layout(), fx.config()).unwrap();

    assert!(manager.get_table_with_overrides("spells").is_none());
    manager.set_active_module("alpha").unwrap();
    assert_eq!(manager.get_table_with_overrides("spells").unwrap().cell(0, 0), Some("mod0"));
    assert!(manager.get_table_with_overrides("appearance").is_none());
}

#[test]
fn test_resolve_all_reports_conflicts() {
    let fx = layered();
    let manager = ResourceManager::open(fx.layout(), fx.config()).unwrap();
    manager.set_active_module("alpha").unwrap();

    let name = ResourceName::table("classes").unwrap();
    let tiers: Vec<_> = manager.resolve_all(&name).into_iter().map(|l| l.tier).collect();
    assert_eq!(
        tiers,
        [
            SourceTier::HakOverride(0),
            SourceTier::WorkshopOverride,
            SourceTier::BaseInstall
        ]
    );
}

#[test]
fn test_corrupt_winner_falls_through() {
    let fx = layered();
    fx.write("user/override/classes.2da", b"not a table");
    let config = gda_resman::ResmanConfig {
        snapshot_enabled: false,
        ..fx.config()
    };
    let manager = ResourceManager::open(fx.layout(), config).unwrap();

    // The user override copy is corrupt; the workshop copy below it wins.
    assert_eq!(manager.get_table_with_overrides("classes").unwrap().row_count(), 3);
}

#[test]
fn test_later_base_archive_wins() {
    let fx = layered();
    fx.write_zip("install/Data/2da_x1.zip", &[("feat.2da", classes(4, "x1"))]);
    let manager = ResourceManager::open(fx.layout(), fx.config()).unwrap();
    assert_eq!(manager.get_table("feat").unwrap().row_count(), 4);
}

#[test]
fn test_raw_resource_bytes() {
    let fx = layered();
    fx.write("user/override/portrait.tga", b"TGA");
    let manager = ResourceManager::open(fx.layout(), fx.config()).unwrap();
    assert_eq!(manager.get_resource("Portrait.TGA").unwrap(), b"TGA");
    assert!(manager.get_resource("missing.tga").is_none());
    assert!(manager.get_resource("no-extension").is_none());
}

/// Loose tiers a resource can be placed in for the precedence property.
const LOOSE_TIERS: [(SourceTier, &str); 3] = [
    (SourceTier::CustomOverrideDir, "custom/classes.2da"),
    (SourceTier::WorkshopOverride, "workshop/2002/classes.2da"),
    (SourceTier::UserOverrideDir, "user/override/classes.2da"),
];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_highest_defining_tier_wins(present in proptest::collection::vec(any::<bool>(), 3)) {
        let fx = Fixture::new();
        fx.write_zip("install/Data/2da.zip", &[("classes.2da", classes(1, "base"))]);
        std::fs::create_dir_all(fx.root.join("custom")).unwrap();
        for (i, (_, rel)) in LOOSE_TIERS.iter().enumerate() {
            if present[i] {
                fx.write(rel, &classes(i + 2, "loose"));
            }
        }

        let config = gda_resman::ResmanConfig { snapshot_enabled: false, ..fx.config() };
        let manager = ResourceManager::open(fx.layout(), config).unwrap();
        manager.register_override_dir(fx.root.join("custom")).unwrap();

        let expected = present.iter().position(|p| *p).map_or(1, |i| i + 2);
        let name = ResourceName::table("classes").unwrap();
        let winner = manager.resolve(&name).found().unwrap().tier;
        let expected_tier = present
            .iter()
            .position(|p| *p)
            .map_or(SourceTier::BaseInstall, |i| LOOSE_TIERS[i].0);

        prop_assert_eq!(winner, expected_tier);
        prop_assert_eq!(manager.get_table_with_overrides("classes").unwrap().row_count(), expected);
    }
}
