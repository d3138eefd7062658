//! Per-table column schemas.
//!
//! Column names drift between game releases and community content (`HitDie` vs
//! `HitDice`, `FEAT` vs `Name`). A [`TableSchema`] pins the canonical field names
//! for a known table kind together with the aliases accepted for each, so callers
//! read rows through [`TableSchema::field`] instead of guessing column names.

use crate::twoda::RowView;

/// One canonical field and its accepted aliases, in lookup order.
#[derive(Debug, Clone, Copy)]
pub struct SchemaField {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

/// Fixed column schema for one table kind (keyed by table stem, e.g. `classes`).
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub table: &'static str,
    pub fields: &'static [SchemaField],
}

impl TableSchema {
    /// Resolve a canonical field on a row, trying aliases in order.
    ///
    /// Fields not declared by the schema are looked up by name only.
    pub fn field<'a>(&self, row: &RowView<'a>, name: &str) -> Option<&'a str> {
        match self
            .fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
        {
            Some(field) => row.field(field.name, field.aliases),
            None => row.field(name, &[]),
        }
    }

    /// Like [`field`](Self::field), parsed into `T`.
    pub fn field_as<T: std::str::FromStr>(&self, row: &RowView<'_>, name: &str) -> Option<T> {
        self.field(row, name)?.trim().parse().ok()
    }
}

const fn field(name: &'static str, aliases: &'static [&'static str]) -> SchemaField {
    SchemaField { name, aliases }
}

static SCHEMAS: &[TableSchema] = &[
    TableSchema {
        table: "classes",
        fields: &[
            field("Label", &[]),
            field("Name", &["StrRef"]),
            field("HitDie", &["HitDice"]),
            field("AttackBonusTable", &["BABTable"]),
            field("FeatsTable", &[]),
            field("SavingThrowTable", &["SaveTable"]),
            field("SkillsTable", &[]),
            field("PrimaryAbil", &[]),
            field("PlayerClass", &[]),
        ],
    },
    TableSchema {
        table: "racialtypes",
        fields: &[
            field("Label", &[]),
            field("Name", &["StrRef"]),
            field("Appearance", &[]),
            field("PlayerRace", &[]),
            field("FavoredClass", &[]),
        ],
    },
    TableSchema {
        table: "feat",
        fields: &[
            field("Label", &["LABEL"]),
            field("Name", &["FEAT"]),
            field("Description", &["DESCRIPTION"]),
            field("Icon", &["ICON"]),
            field("AllClassesCanUse", &["ALLCLASSESCANUSE"]),
        ],
    },
    TableSchema {
        table: "skills",
        fields: &[
            field("Label", &[]),
            field("Name", &[]),
            field("KeyAbility", &[]),
            field("Untrained", &[]),
        ],
    },
    TableSchema {
        table: "spells",
        fields: &[
            field("Label", &[]),
            field("Name", &[]),
            field("School", &[]),
            field("Innate", &["InnateLevel"]),
        ],
    },
];

/// Look up the schema for a table by stem (`"classes"`) or file name (`"classes.2da"`).
pub fn schema_for(table: &str) -> Option<&'static TableSchema> {
    let stem = table.rsplit_once('.').map_or(table, |(stem, _)| stem);
    SCHEMAS.iter().find(|s| s.table.eq_ignore_ascii_case(stem))
}
