//! Declarative schema operations and their DDL rendering.
//!
//! Operations are plain data. Rendering goes through `sea-query`'s schema
//! builders so the same definition can be printed for SQLite, MySQL or
//! PostgreSQL.

use std::fmt;
use std::str::FromStr;

use bookstore_common::Error;
use sea_query::{
    Alias, ColumnDef, MysqlQueryBuilder, PostgresQueryBuilder, SqliteQueryBuilder, Table,
    TableCreateStatement, TableDropStatement,
};
use serde::{Deserialize, Serialize};

/// Surrogate key every created table receives ahead of its declared columns.
pub const PRIMARY_KEY_COLUMN: &str = "id";
pub const CREATED_AT_COLUMN: &str = "created_at";
pub const UPDATED_AT_COLUMN: &str = "updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    String,
    Integer,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// The `timestamps` shorthand: `created_at` and `updated_at`, both required.
pub fn timestamp_columns() -> [ColumnSpec; 2] {
    [
        ColumnSpec::new(CREATED_AT_COLUMN, ColumnKind::Timestamp).not_null(),
        ColumnSpec::new(UPDATED_AT_COLUMN, ColumnKind::Timestamp).not_null(),
    ]
}

/// A single reversible unit of schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaOperation {
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
    },
    DropTable {
        table: String,
    },
}

impl SchemaOperation {
    pub fn create_table(table: impl Into<String>) -> TableDefinition {
        TableDefinition::new(table)
    }

    pub fn drop_table(table: impl Into<String>) -> Self {
        Self::DropTable {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { table, .. } | Self::DropTable { table } => table,
        }
    }

    /// Render as a single DDL statement.
    ///
    /// `CreateTable` never uses `IF NOT EXISTS` and `DropTable` never uses
    /// `IF EXISTS`: touching a table in the wrong state is a failure.
    /// Integer columns are emitted as-is, without foreign key constraints.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        match self {
            Self::CreateTable { table, columns } => {
                let stmt = create_statement(table, columns);
                match dialect {
                    Dialect::Sqlite => stmt.to_string(SqliteQueryBuilder),
                    Dialect::Mysql => stmt.to_string(MysqlQueryBuilder),
                    Dialect::Postgres => stmt.to_string(PostgresQueryBuilder),
                }
            }
            Self::DropTable { table } => {
                let stmt = drop_statement(table);
                match dialect {
                    Dialect::Sqlite => stmt.to_string(SqliteQueryBuilder),
                    Dialect::Mysql => stmt.to_string(MysqlQueryBuilder),
                    Dialect::Postgres => stmt.to_string(PostgresQueryBuilder),
                }
            }
        }
    }
}

fn create_statement(table: &str, columns: &[ColumnSpec]) -> TableCreateStatement {
    let mut stmt = Table::create();
    stmt.table(Alias::new(table)).col(
        ColumnDef::new(Alias::new(PRIMARY_KEY_COLUMN))
            .integer()
            .not_null()
            .auto_increment()
            .primary_key(),
    );

    for column in columns {
        let mut def = ColumnDef::new(Alias::new(column.name.as_str()));
        match column.kind {
            ColumnKind::String => def.string(),
            ColumnKind::Integer => def.integer(),
            ColumnKind::Timestamp => def.timestamp(),
        };
        if column.nullable {
            def.null();
        } else {
            def.not_null();
        }
        stmt.col(&mut def);
    }

    stmt
}

fn drop_statement(table: &str) -> TableDropStatement {
    Table::drop().table(Alias::new(table)).to_owned()
}

/// Builder mirroring a `create_table` block: declared columns in order,
/// with [`timestamps`](Self::timestamps) appending the timestamp pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    table: String,
    columns: Vec<ColumnSpec>,
}

impl TableDefinition {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn string(self, name: impl Into<String>) -> Self {
        self.column(ColumnSpec::new(name, ColumnKind::String))
    }

    pub fn integer(self, name: impl Into<String>) -> Self {
        self.column(ColumnSpec::new(name, ColumnKind::Integer))
    }

    pub fn timestamps(mut self) -> Self {
        self.columns.extend(timestamp_columns());
        self
    }

    pub fn build(self) -> SchemaOperation {
        SchemaOperation::CreateTable {
            table: self.table,
            columns: self.columns,
        }
    }
}

impl From<TableDefinition> for SchemaOperation {
    fn from(def: TableDefinition) -> Self {
        def.build()
    }
}

/// SQL flavour used when rendering operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Sqlite,
    Mysql,
    Postgres,
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" => Ok(Self::Mysql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(Error::Config(format!("unknown SQL dialect: {other}"))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sqlite => "sqlite",
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publishers() -> SchemaOperation {
        SchemaOperation::create_table("publishers")
            .string("name")
            .string("address")
            .string("phone_number")
            .timestamps()
            .build()
    }

    #[test]
    fn timestamps_expand_to_two_required_columns() {
        let op = publishers();
        let SchemaOperation::CreateTable { columns, .. } = &op else {
            panic!("expected CreateTable");
        };
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            ["name", "address", "phone_number", "created_at", "updated_at"]
        );
        assert!(columns[..3].iter().all(|c| c.nullable));
        assert!(
            columns[3..]
                .iter()
                .all(|c| c.kind == ColumnKind::Timestamp && !c.nullable)
        );
    }

    #[test]
    fn renders_create_table_for_sqlite() {
        let sql = publishers().to_sql(Dialect::Sqlite);
        assert!(sql.starts_with(r#"CREATE TABLE "publishers""#), "{sql}");
        assert!(!sql.contains("IF NOT EXISTS"));
        for column in ["id", "name", "address", "phone_number", "created_at", "updated_at"] {
            assert!(sql.contains(&format!("\"{column}\"")), "missing {column}: {sql}");
        }
        assert!(sql.contains("PRIMARY KEY"));
    }

    #[test]
    fn integer_references_are_not_foreign_keys() {
        let op = SchemaOperation::create_table("books")
            .integer("publisher_id")
            .integer("category_id")
            .build();
        for dialect in [Dialect::Sqlite, Dialect::Mysql, Dialect::Postgres] {
            let sql = op.to_sql(dialect);
            assert!(!sql.to_uppercase().contains("REFERENCES"), "{sql}");
            assert!(!sql.to_uppercase().contains("FOREIGN KEY"), "{sql}");
        }
    }

    #[test]
    fn renders_drop_table_per_dialect() {
        let op = SchemaOperation::drop_table("books");
        assert_eq!(op.table(), "books");
        assert_eq!(op.to_sql(Dialect::Sqlite), r#"DROP TABLE "books""#);
        assert_eq!(op.to_sql(Dialect::Postgres), r#"DROP TABLE "books""#);
        assert_eq!(op.to_sql(Dialect::Mysql), "DROP TABLE `books`");
    }

    #[test]
    fn dialect_round_trips_through_str() {
        for dialect in [Dialect::Sqlite, Dialect::Mysql, Dialect::Postgres] {
            assert_eq!(dialect.to_string().parse::<Dialect>().unwrap(), dialect);
        }
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert!("oracle".parse::<Dialect>().is_err());
    }
}
