//! Database collaborator
//!
//! The pipeline only needs two capabilities from a database: a textual schema
//! for the SQL-writing stage and bounded execution of one approved query.

pub mod sqlite;

pub use sqlite::SqliteDatabase;

use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::time::Duration;

/// Trait for relational database access
#[async_trait]
pub trait Database: Send + Sync {
    /// Describe the tables and columns available to queries
    async fn load_schema(&self) -> AppResult<SchemaDescription>;

    /// Execute one read-only query, bounded by `timeout`
    ///
    /// A timeout is reported as `AppError::QueryTimeout`, never as an empty
    /// result.
    async fn execute(&self, query: &str, timeout: Duration) -> AppResult<QueryResult>;
}

/// Schema of a whole database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

impl SchemaDescription {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Render as compact text for inclusion in a prompt
    ///
    /// ```text
    /// Products(ProductId INTEGER PRIMARY KEY, Name TEXT NOT NULL, Price REAL)
    /// ```
    pub fn render(&self) -> String {
        let mut out = String::new();
        for table in &self.tables {
            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|c| {
                    let mut col = format!("{} {}", c.name, c.data_type);
                    if c.primary_key {
                        col.push_str(" PRIMARY KEY");
                    } else if !c.nullable {
                        col.push_str(" NOT NULL");
                    }
                    col
                })
                .collect();
            let _ = writeln!(out, "{}({})", table.name, columns.join(", "));
        }
        out
    }
}

/// Column metadata of a query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultColumn {
    pub name: String,
    pub type_name: String,
}

/// Rows returned by one query execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// The SQL that was actually executed (after the safety gate rewrite)
    pub query: String,
    pub columns: Vec<ResultColumn>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Render as a Markdown table for prompts
    pub fn to_markdown(&self) -> String {
        if self.columns.is_empty() {
            return "(no columns)".to_string();
        }

        let mut out = String::new();
        let _ = writeln!(out, "| {} |", self.column_names().join(" | "));
        let _ = writeln!(
            out,
            "|{}",
            self.columns.iter().map(|_| " --- |").collect::<String>()
        );
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(render_cell).collect();
            let _ = writeln!(out, "| {} |", cells.join(" | "));
        }
        if self.rows.is_empty() {
            out.push_str("(0 rows)\n");
        }
        out
    }
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.replace('|', "\\|"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn products_schema() -> SchemaDescription {
        SchemaDescription {
            tables: vec![TableSchema {
                name: "Products".to_string(),
                columns: vec![
                    ColumnSchema {
                        name: "ProductId".to_string(),
                        data_type: "INTEGER".to_string(),
                        nullable: false,
                        primary_key: true,
                    },
                    ColumnSchema {
                        name: "Name".to_string(),
                        data_type: "TEXT".to_string(),
                        nullable: false,
                        primary_key: false,
                    },
                    ColumnSchema {
                        name: "Price".to_string(),
                        data_type: "REAL".to_string(),
                        nullable: true,
                        primary_key: false,
                    },
                ],
            }],
        }
    }

    #[test]
    fn test_schema_render() {
        assert_eq!(
            products_schema().render(),
            "Products(ProductId INTEGER PRIMARY KEY, Name TEXT NOT NULL, Price REAL)\n"
        );
    }

    #[test]
    fn test_schema_table_lookup_is_case_insensitive() {
        assert!(products_schema().table("products").is_some());
        assert!(products_schema().table("Orders").is_none());
    }

    #[test]
    fn test_result_markdown() {
        let result = QueryResult {
            query: "SELECT Name, Price FROM Products LIMIT 100".to_string(),
            columns: vec![
                ResultColumn {
                    name: "Name".to_string(),
                    type_name: "TEXT".to_string(),
                },
                ResultColumn {
                    name: "Price".to_string(),
                    type_name: "REAL".to_string(),
                },
            ],
            rows: vec![vec![json!("Chai"), json!(18.0)], vec![json!("a|b"), Value::Null]],
        };

        let md = result.to_markdown();
        assert!(md.starts_with("| Name | Price |\n| --- | --- |\n"));
        assert!(md.contains("| Chai | 18.0 |"));
        assert!(md.contains("| a\\|b | NULL |"));
        assert!(result.has_column("price"));
        assert_eq!(result.row_count(), 2);
    }

    #[test]
    fn test_empty_result_markdown() {
        let result = QueryResult {
            query: "SELECT Name FROM Products WHERE 0".to_string(),
            columns: vec![ResultColumn {
                name: "Name".to_string(),
                type_name: "TEXT".to_string(),
            }],
            rows: vec![],
        };
        assert!(result.to_markdown().ends_with("(0 rows)\n"));
    }
}
