use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref IDENTIFIER_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// SQLite column affinity, derived from the declared type the way SQLite does it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Integer,
    Text,
    Blob,
    Real,
    Numeric,
}

/// One column declaration, e.g. `created_at` / `DATETIME DEFAULT CURRENT_TIMESTAMP`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDecl {
    pub name: String,
    pub decl: String,
}

impl ColumnDecl {
    pub fn new(name: impl Into<String>, decl: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decl: decl.into(),
        }
    }

    /// Declaration with whitespace collapsed and keywords uppercased.
    pub fn normalized_decl(&self) -> String {
        WHITESPACE_RE
            .replace_all(self.decl.trim(), " ")
            .to_uppercase()
    }

    pub fn affinity(&self) -> Affinity {
        let decl = self.normalized_decl();
        let type_name = decl
            .split(|c: char| c == ' ' || c == '(')
            .next()
            .unwrap_or("");
        // Constraint keywords never appear in a type name, so an empty or keyword-led
        // declaration has no type.
        let type_name = match type_name {
            "PRIMARY" | "NOT" | "NULL" | "UNIQUE" | "DEFAULT" | "CHECK" | "REFERENCES"
            | "COLLATE" | "GENERATED" | "CONSTRAINT" => "",
            other => other,
        };

        if type_name.contains("INT") {
            Affinity::Integer
        } else if type_name.contains("CHAR")
            || type_name.contains("CLOB")
            || type_name.contains("TEXT")
        {
            Affinity::Text
        } else if type_name.is_empty() || type_name.contains("BLOB") {
            Affinity::Blob
        } else if type_name.contains("REAL")
            || type_name.contains("FLOA")
            || type_name.contains("DOUB")
        {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    pub fn is_text(&self) -> bool {
        self.affinity() == Affinity::Text
    }

    /// NOT NULL without a DEFAULT: an insert must supply a value.
    pub fn is_required(&self) -> bool {
        let decl = self.normalized_decl();
        decl.contains("NOT NULL") && !decl.contains("DEFAULT")
    }

    /// PRIMARY KEY or UNIQUE: no two rows share a value.
    pub fn is_unique(&self) -> bool {
        let decl = self.normalized_decl();
        decl.contains("PRIMARY KEY") || decl.contains("UNIQUE")
    }
}

impl PartialEq for ColumnDecl {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.normalized_decl() == other.normalized_decl()
    }
}

impl Eq for ColumnDecl {}

/// Ordered column declarations of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableSchema {
    columns: Vec<ColumnDecl>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDecl>) -> Self {
        Self { columns }
    }

    /// Builder-style helper: `TableSchema::default().column("id", "TEXT PRIMARY KEY")`.
    pub fn column(mut self, name: impl Into<String>, decl: impl Into<String>) -> Self {
        self.columns.push(ColumnDecl::new(name, decl));
        self
    }

    pub fn columns(&self) -> &[ColumnDecl] {
        &self.columns
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDecl> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Structural checks: non-empty, valid identifiers, no duplicate names.
    pub fn validate(&self) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();
        if self.columns.is_empty() {
            violations.push(SchemaViolation::EmptySchema);
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !is_identifier(&column.name) {
                violations.push(SchemaViolation::InvalidIdentifier(column.name.clone()));
            }
            if !seen.insert(column.name.as_str()) {
                violations.push(SchemaViolation::DuplicateColumn(column.name.clone()));
            }
        }
        violations
    }

    /// Check that `name` is declared and text-typed for the given role.
    pub fn require_text_field(&self, role: FieldRole, name: &str) -> Result<(), SchemaViolation> {
        let column = self.get(name).ok_or_else(|| SchemaViolation::MissingField {
            role,
            name: name.to_string(),
        })?;
        if !column.is_text() {
            return Err(SchemaViolation::NotText {
                role,
                name: name.to_string(),
                decl: column.decl.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn create_sql(&self, table: &str) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.decl.trim()))
            .collect();
        format!("CREATE TABLE {} ({})", quote_ident(table), columns.join(", "))
    }
}

/// The role a column plays in a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Semantic,
    Identity,
}

impl std::fmt::Display for FieldRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Semantic => write!(f, "semantic field"),
            Self::Identity => write!(f, "identity field"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    EmptySchema,
    InvalidIdentifier(String),
    DuplicateColumn(String),
    MissingField { role: FieldRole, name: String },
    NotText { role: FieldRole, name: String, decl: String },
    SameField(String),
    NotUnique { name: String, decl: String },
    Incompatible { table: String, detail: String },
    EmbedderMismatch { collection: String, expected: String, found: String },
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptySchema => write!(f, "Schema declares no columns"),
            Self::InvalidIdentifier(name) => write!(
                f,
                "Invalid identifier '{}' (letters, digits and '_' only)",
                name
            ),
            Self::DuplicateColumn(name) => write!(f, "Duplicate column: {}", name),
            Self::MissingField { role, name } => {
                write!(f, "Schema must contain the {} '{}'", role, name)
            }
            Self::NotText { role, name, decl } => write!(
                f,
                "The {} '{}' must be a TEXT column (declared as '{}')",
                role, name, decl
            ),
            Self::SameField(name) => write!(
                f,
                "'{}' cannot be both the semantic field and the identity field",
                name
            ),
            Self::NotUnique { name, decl } => write!(
                f,
                "The identity field '{}' must be PRIMARY KEY or UNIQUE (declared as '{}')",
                name, decl
            ),
            Self::Incompatible { table, detail } => write!(
                f,
                "Table '{}' already exists with a different schema: {}",
                table, detail
            ),
            Self::EmbedderMismatch {
                collection,
                expected,
                found,
            } => write!(
                f,
                "Collection '{}' was built with embedder {} but {} is configured",
                collection, found, expected
            ),
        }
    }
}

pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER_RE.is_match(name)
}

/// Double-quote an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn documents() -> TableSchema {
        TableSchema::default()
            .column("id", "TEXT PRIMARY KEY")
            .column("name", "TEXT")
            .column("description", "TEXT NOT NULL")
            .column("page_number", "INTEGER")
            .column("created_at", "DATETIME DEFAULT CURRENT_TIMESTAMP")
    }

    #[test]
    fn test_affinity_rules() {
        assert_eq!(ColumnDecl::new("a", "TEXT PRIMARY KEY").affinity(), Affinity::Text);
        assert_eq!(ColumnDecl::new("a", "varchar(20)").affinity(), Affinity::Text);
        assert_eq!(ColumnDecl::new("a", "INTEGER").affinity(), Affinity::Integer);
        assert_eq!(ColumnDecl::new("a", "DOUBLE").affinity(), Affinity::Real);
        assert_eq!(ColumnDecl::new("a", "").affinity(), Affinity::Blob);
        assert_eq!(ColumnDecl::new("a", "NOT NULL").affinity(), Affinity::Blob);
        assert_eq!(
            ColumnDecl::new("a", "DATETIME DEFAULT CURRENT_TIMESTAMP").affinity(),
            Affinity::Numeric
        );
    }

    #[test]
    fn test_required_and_default() {
        let schema = documents();
        assert!(schema.get("description").unwrap().is_required());
        assert!(!schema.get("created_at").unwrap().is_required());
        assert!(schema.get("id").unwrap().is_unique());
        assert!(ColumnDecl::new("slug", "TEXT UNIQUE NOT NULL").is_unique());
        assert!(!schema.get("name").unwrap().is_unique());
    }

    #[test]
    fn test_require_text_field() {
        let schema = documents();
        assert!(schema.require_text_field(FieldRole::Semantic, "description").is_ok());
        assert!(matches!(
            schema.require_text_field(FieldRole::Identity, "missing"),
            Err(SchemaViolation::MissingField { .. })
        ));
        assert!(matches!(
            schema.require_text_field(FieldRole::Identity, "page_number"),
            Err(SchemaViolation::NotText { .. })
        ));
    }

    #[test]
    fn test_validate_catches_duplicates_and_identifiers() {
        let schema = TableSchema::default()
            .column("id", "TEXT")
            .column("id", "TEXT")
            .column("bad name", "TEXT");
        let violations = schema.validate();
        assert!(violations.contains(&SchemaViolation::DuplicateColumn("id".into())));
        assert!(violations.contains(&SchemaViolation::InvalidIdentifier("bad name".into())));
        assert_eq!(TableSchema::default().validate(), vec![SchemaViolation::EmptySchema]);
    }

    #[test]
    fn test_decl_equality_ignores_case_and_spacing() {
        let a = TableSchema::default().column("id", "text  primary key");
        let b = TableSchema::default().column("id", "TEXT PRIMARY KEY");
        assert_eq!(a, b);
    }

    #[test]
    fn test_create_sql() {
        let sql = TableSchema::default()
            .column("id", "TEXT PRIMARY KEY")
            .create_sql("docs");
        assert_eq!(sql, r#"CREATE TABLE "docs" ("id" TEXT PRIMARY KEY)"#);
    }
}
