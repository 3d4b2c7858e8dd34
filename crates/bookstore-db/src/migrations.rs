//! Migration definitions for the bookstore schema.
//!
//! Each migration has a version token, a name and a pair of schema
//! operations. Migrations are applied in version order and tracked in the
//! `schema_migrations` table.

use bookstore_common::{Result, Version};

use crate::error::MigrationResult;
use crate::registry::Registry;
use crate::schema::SchemaOperation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDefinition {
    pub version: Version,
    pub name: String,
    pub up: SchemaOperation,
    pub down: SchemaOperation,
}

impl MigrationDefinition {
    pub fn new(
        version: Version,
        name: impl Into<String>,
        up: impl Into<SchemaOperation>,
        down: impl Into<SchemaOperation>,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            up: up.into(),
            down: down.into(),
        }
    }
}

pub const CREATE_PUBLISHERS_VERSION: &str = "20211210001402";
pub const CREATE_BOOKS_VERSION: &str = "20211210001412";

pub fn create_publishers() -> Result<MigrationDefinition> {
    Ok(MigrationDefinition::new(
        Version::parse(CREATE_PUBLISHERS_VERSION)?,
        "CreatePublishers",
        SchemaOperation::create_table("publishers")
            .string("name")
            .string("address")
            .string("phone_number")
            .timestamps(),
        SchemaOperation::drop_table("publishers"),
    ))
}

/// `publisher_id` and `category_id` are plain integers; no foreign key is declared.
pub fn create_books() -> Result<MigrationDefinition> {
    Ok(MigrationDefinition::new(
        Version::parse(CREATE_BOOKS_VERSION)?,
        "CreateBooks",
        SchemaOperation::create_table("books")
            .integer("publisher_id")
            .integer("category_id")
            .string("name")
            .string("author")
            .integer("year_of_publication")
            .integer("stock")
            .integer("price")
            .timestamps(),
        SchemaOperation::drop_table("books"),
    ))
}

/// Registry holding every bookstore migration.
pub fn bookstore_registry() -> MigrationResult<Registry> {
    Registry::from_definitions([create_publishers()?, create_books()?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnKind;

    #[test]
    fn bookstore_registry_orders_publishers_first() {
        let registry = bookstore_registry().unwrap();
        let names: Vec<_> = registry.list_ordered().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["CreatePublishers", "CreateBooks"]);
    }

    #[test]
    fn books_reference_columns_are_plain_integers() {
        let books = create_books().unwrap();
        let SchemaOperation::CreateTable { table, columns } = &books.up else {
            panic!("expected CreateTable");
        };
        assert_eq!(table, "books");
        assert_eq!(columns.len(), 9);
        for name in ["publisher_id", "category_id", "year_of_publication", "stock", "price"] {
            let column = columns.iter().find(|c| c.name == name).unwrap();
            assert_eq!(column.kind, ColumnKind::Integer, "{name}");
        }
        assert_eq!(books.down, SchemaOperation::drop_table("books"));
    }

    #[test]
    fn each_down_undoes_its_up() {
        for def in [create_publishers().unwrap(), create_books().unwrap()] {
            assert!(matches!(def.up, SchemaOperation::CreateTable { .. }));
            assert!(matches!(def.down, SchemaOperation::DropTable { .. }));
            assert_eq!(def.up.table(), def.down.table());
        }
    }
}
