use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use async_trait::async_trait;

use crate::error::VariablesError;
use crate::identifier::VariablesIdentifier;
use crate::storage::{StorageInterface, StorageVariables, ValueType, VariableCategory, VariablesFilter};

const COLUMNS: &str = "key, name, label, value, value_type, category, scope, scope_key, sys_code, \
                       user_name, enabled, encryption_method, salt, description";

#[derive(sqlx::FromRow)]
struct VariableRow {
  key: String,
  name: String,
  label: String,
  value: String,
  value_type: String,
  category: String,
  scope: String,
  scope_key: Option<String>,
  sys_code: Option<String>,
  user_name: Option<String>,
  enabled: bool,
  encryption_method: Option<String>,
  salt: Option<String>,
  description: Option<String>,
}

impl TryFrom<VariableRow> for StorageVariables {
  type Error = VariablesError;

  fn try_from(row: VariableRow) -> Result<Self, Self::Error> {
    Ok(StorageVariables {
      value: serde_json::from_str(&row.value)?,
      value_type: ValueType::parse(&row.value_type).unwrap_or_default(),
      category: VariableCategory::parse(&row.category).unwrap_or_default(),
      key: row.key,
      name: row.name,
      label: row.label,
      scope: row.scope,
      scope_key: row.scope_key,
      sys_code: row.sys_code,
      user_name: row.user_name,
      enabled: row.enabled,
      encryption_method: row.encryption_method,
      salt: row.salt,
      description: row.description,
    })
  }
}

/// SQLite-backed variables storage.
pub struct SqliteVariablesStorage {
  pool: SqlitePool,
}

impl SqliteVariablesStorage {
  /// Create a new storage with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), VariablesError> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[async_trait]
impl StorageInterface for SqliteVariablesStorage {
  async fn load(&self, id: &VariablesIdentifier) -> Result<Option<StorageVariables>, VariablesError> {
    let row: Option<VariableRow> = sqlx::query_as(&format!(
      "SELECT {COLUMNS} FROM awel_variables WHERE identifier = ?"
    ))
    .bind(id.str_identifier())
    .fetch_optional(&self.pool)
    .await?;

    row.map(StorageVariables::try_from).transpose()
  }

  async fn save(&self, variables: &StorageVariables) -> Result<(), VariablesError> {
    sqlx::query(&format!(
      "INSERT OR REPLACE INTO awel_variables (identifier, {COLUMNS}) \
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(variables.identifier().str_identifier())
    .bind(&variables.key)
    .bind(&variables.name)
    .bind(&variables.label)
    .bind(serde_json::to_string(&variables.value)?)
    .bind(variables.value_type.as_str())
    .bind(variables.category.as_str())
    .bind(&variables.scope)
    .bind(&variables.scope_key)
    .bind(&variables.sys_code)
    .bind(&variables.user_name)
    .bind(variables.enabled)
    .bind(&variables.encryption_method)
    .bind(&variables.salt)
    .bind(&variables.description)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn delete(&self, id: &VariablesIdentifier) -> Result<bool, VariablesError> {
    let result = sqlx::query("DELETE FROM awel_variables WHERE identifier = ?")
      .bind(id.str_identifier())
      .execute(&self.pool)
      .await?;
    Ok(result.rows_affected() > 0)
  }

  async fn query(&self, filter: &VariablesFilter) -> Result<Vec<StorageVariables>, VariablesError> {
    let mut builder: QueryBuilder<Sqlite> =
      QueryBuilder::new(format!("SELECT {COLUMNS} FROM awel_variables WHERE 1 = 1"));
    let columns = [
      ("key", &filter.key),
      ("scope", &filter.scope),
      ("scope_key", &filter.scope_key),
      ("sys_code", &filter.sys_code),
      ("user_name", &filter.user_name),
    ];
    for (column, value) in columns {
      if let Some(value) = value {
        builder.push(format!(" AND {column} = ")).push_bind(value.clone());
      }
    }
    if let Some(category) = filter.category {
      builder.push(" AND category = ").push_bind(category.as_str());
    }
    if filter.enabled_only {
      builder.push(" AND enabled = 1");
    }
    builder.push(" ORDER BY key, name");

    let rows: Vec<VariableRow> = builder.build_query_as().fetch_all(&self.pool).await?;
    rows.into_iter().map(StorageVariables::try_from).collect()
  }
}
