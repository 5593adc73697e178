//! Schema Builder - the handle migrations use to change the database
//!
//! A [`Schema`] is handed to every `up`/`down` callback. It turns table
//! blueprints into SQL and sends each statement to the connection or the
//! open transaction the migrator chose for that migration. In pretend mode
//! statements are only collected.

use tracing::debug;

use crate::backends::{has_table, DatabaseConnection, DatabaseRow, DatabaseTransaction, DatabaseValue, SqlDialect};
use crate::backends::core::first_count;
use crate::error::MigrationResult;

enum Target<'a> {
    Connection(&'a dyn DatabaseConnection),
    Transaction(&'a mut dyn DatabaseTransaction),
    Pretend(&'a dyn DatabaseConnection),
}

/// Schema operations available to a migration
pub struct Schema<'a> {
    target: Target<'a>,
    dialect: SqlDialect,
    statements: Vec<String>,
}

impl<'a> Schema<'a> {
    /// Statements run directly on the connection, outside any transaction
    pub fn direct(connection: &'a dyn DatabaseConnection) -> Self {
        Self {
            dialect: connection.dialect(),
            target: Target::Connection(connection),
            statements: Vec::new(),
        }
    }

    /// Statements run inside an open transaction
    pub fn transactional(transaction: &'a mut dyn DatabaseTransaction, dialect: SqlDialect) -> Self {
        Self {
            target: Target::Transaction(transaction),
            dialect,
            statements: Vec::new(),
        }
    }

    /// Statements are collected, never executed; reads still hit the connection
    pub fn pretend(connection: &'a dyn DatabaseConnection) -> Self {
        Self {
            dialect: connection.dialect(),
            target: Target::Pretend(connection),
            statements: Vec::new(),
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn is_pretending(&self) -> bool {
        matches!(self.target, Target::Pretend(_))
    }

    /// Statements issued so far, in order
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }

    /// Create a new table
    pub async fn create_table<F>(&mut self, table: &str, callback: F) -> MigrationResult<()>
    where
        F: FnOnce(&mut Blueprint) + Send,
    {
        let mut blueprint = Blueprint::new(table, self.dialect);
        callback(&mut blueprint);
        let sql = blueprint.to_create_sql();
        self.statement(&sql).await
    }

    /// Alter an existing table
    pub async fn table<F>(&mut self, table: &str, callback: F) -> MigrationResult<()>
    where
        F: FnOnce(&mut Blueprint) + Send,
    {
        let mut blueprint = Blueprint::new(table, self.dialect);
        callback(&mut blueprint);
        for sql in blueprint.to_alter_sql() {
            self.statement(&sql).await?;
        }
        Ok(())
    }

    /// Drop a table
    pub async fn drop_table(&mut self, table: &str) -> MigrationResult<()> {
        let sql = self.dialect.drop_table_sql(table, false, false);
        self.statement(&sql).await
    }

    /// Drop a table if it exists
    pub async fn drop_table_if_exists(&mut self, table: &str) -> MigrationResult<()> {
        let sql = self.dialect.drop_table_sql(table, true, false);
        self.statement(&sql).await
    }

    /// Rename a table
    pub async fn rename_table(&mut self, from: &str, to: &str) -> MigrationResult<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            self.dialect.quote_identifier(from),
            self.dialect.quote_identifier(to)
        );
        self.statement(&sql).await
    }

    /// Check whether a table exists
    pub async fn has_table(&mut self, table: &str) -> MigrationResult<bool> {
        match &mut self.target {
            Target::Connection(connection) | Target::Pretend(connection) => has_table(*connection, table).await,
            Target::Transaction(transaction) => {
                let rows: Vec<DatabaseRow> = transaction
                    .fetch_all(self.dialect.table_exists_sql(), &[DatabaseValue::from(table)])
                    .await?;
                Ok(first_count(&rows) > 0)
            }
        }
    }

    /// Run a raw SQL statement
    pub async fn statement(&mut self, sql: &str) -> MigrationResult<()> {
        match &mut self.target {
            Target::Connection(connection) => {
                connection.execute(sql, &[]).await?;
            }
            Target::Transaction(transaction) => {
                transaction.execute(sql, &[]).await?;
            }
            Target::Pretend(_) => {
                debug!(sql, "pretending statement");
            }
        }
        self.statements.push(sql.to_string());
        Ok(())
    }
}

/// Table blueprint used by `create_table` and `table`
pub struct Blueprint {
    table: String,
    dialect: SqlDialect,
    columns: Vec<String>,
    constraints: Vec<String>,
    dropped_columns: Vec<String>,
}

impl Blueprint {
    pub fn new(table: &str, dialect: SqlDialect) -> Self {
        Self {
            table: table.to_string(),
            dialect,
            columns: Vec::new(),
            constraints: Vec::new(),
            dropped_columns: Vec::new(),
        }
    }

    fn quote(&self, identifier: &str) -> String {
        self.dialect.quote_identifier(identifier)
    }

    /// Add a column with a raw type definition
    pub fn column(&mut self, name: &str, definition: &str) -> &mut Self {
        let column = format!("{} {}", self.quote(name), definition);
        self.columns.push(column);
        self
    }

    /// Add an ID column (auto-increment primary key)
    pub fn id(&mut self, name: &str) -> &mut Self {
        let definition = self.dialect.auto_increment_primary_key();
        self.column(name, definition)
    }

    /// Add a string column
    pub fn string(&mut self, name: &str, length: Option<u32>) -> &mut Self {
        let column_type = match length {
            Some(len) => format!("VARCHAR({})", len),
            None => "TEXT".to_string(),
        };
        self.column(name, &column_type)
    }

    /// Add a text column
    pub fn text(&mut self, name: &str) -> &mut Self {
        self.column(name, "TEXT")
    }

    /// Add an integer column
    pub fn integer(&mut self, name: &str) -> &mut Self {
        self.column(name, "INTEGER")
    }

    /// Add a big integer column
    pub fn big_integer(&mut self, name: &str) -> &mut Self {
        self.column(name, "BIGINT")
    }

    /// Add a boolean column
    pub fn boolean(&mut self, name: &str) -> &mut Self {
        self.column(name, "BOOLEAN")
    }

    /// Add timestamp columns
    pub fn timestamps(&mut self) -> &mut Self {
        self.column("created_at", "TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP");
        self.column("updated_at", "TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP")
    }

    /// Drop a column (alter only)
    pub fn drop_column(&mut self, name: &str) -> &mut Self {
        self.dropped_columns.push(name.to_string());
        self
    }

    /// Add a primary key constraint
    pub fn primary_key(&mut self, columns: &[&str]) -> &mut Self {
        let constraint = format!("PRIMARY KEY ({})", self.column_list(columns));
        self.constraints.push(constraint);
        self
    }

    /// Add a foreign key constraint
    pub fn foreign_key(&mut self, column: &str, references_table: &str, references_column: &str) -> &mut Self {
        let constraint = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote(column),
            self.quote(references_table),
            self.quote(references_column)
        );
        self.constraints.push(constraint);
        self
    }

    /// Add a unique constraint
    pub fn unique(&mut self, columns: &[&str]) -> &mut Self {
        let constraint = format!("UNIQUE ({})", self.column_list(columns));
        self.constraints.push(constraint);
        self
    }

    fn column_list(&self, columns: &[&str]) -> String {
        columns.iter().map(|c| self.quote(c)).collect::<Vec<_>>().join(", ")
    }

    /// Build the CREATE TABLE SQL
    pub fn to_create_sql(&self) -> String {
        let mut parts = self.columns.clone();
        parts.extend(self.constraints.clone());

        format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.quote(&self.table),
            parts.join(",\n    ")
        )
    }

    /// Build one ALTER TABLE statement per added or dropped column
    pub fn to_alter_sql(&self) -> Vec<String> {
        let table = self.quote(&self.table);
        let added = self
            .columns
            .iter()
            .map(|column| format!("ALTER TABLE {} ADD COLUMN {}", table, column));
        let dropped = self
            .dropped_columns
            .iter()
            .map(|column| format!("ALTER TABLE {} DROP COLUMN {}", table, self.quote(column)));
        added.chain(dropped).collect()
    }
}
