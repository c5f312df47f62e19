use async_trait::async_trait;
use sqlx::{
    postgres::{PgPool, PgPoolOptions, PgRow},
    Row,
};
use std::time::Duration;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{AuthInfo, AuthInfoStore, StoreError};
use crate::types::{AuthAttribute, CoSignData};

const SCHEMA_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/db/sql/01_formauth.sql"
));

const UPSERT_AUTH_INFO: &str = r"
INSERT INTO submission_auth_info (
    submission_id, plugin, attribute, value, loa,
    acting_subject_identifier_type, acting_subject_identifier_value,
    legal_subject_identifier_type, legal_subject_identifier_value,
    legal_subject_service_restriction, mandate_context, additional_claims,
    attribute_hashed
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11::jsonb, $12::jsonb, $13)
ON CONFLICT (submission_id) DO UPDATE SET
    plugin = EXCLUDED.plugin,
    attribute = EXCLUDED.attribute,
    value = EXCLUDED.value,
    loa = EXCLUDED.loa,
    acting_subject_identifier_type = EXCLUDED.acting_subject_identifier_type,
    acting_subject_identifier_value = EXCLUDED.acting_subject_identifier_value,
    legal_subject_identifier_type = EXCLUDED.legal_subject_identifier_type,
    legal_subject_identifier_value = EXCLUDED.legal_subject_identifier_value,
    legal_subject_service_restriction = EXCLUDED.legal_subject_service_restriction,
    mandate_context = EXCLUDED.mandate_context,
    additional_claims = EXCLUDED.additional_claims,
    attribute_hashed = EXCLUDED.attribute_hashed,
    updated_at = NOW()";

const SELECT_AUTH_INFO: &str = r"
SELECT submission_id, plugin, attribute, value, loa,
    acting_subject_identifier_type, acting_subject_identifier_value,
    legal_subject_identifier_type, legal_subject_identifier_value,
    legal_subject_service_restriction,
    mandate_context::text AS mandate_context,
    additional_claims::text AS additional_claims,
    attribute_hashed
FROM submission_auth_info WHERE submission_id = $1";

const UPSERT_CO_SIGN: &str = r"
INSERT INTO submission_co_sign (submission_id, plugin, identifier, fields)
VALUES ($1, $2, $3, $4::jsonb)
ON CONFLICT (submission_id) DO UPDATE SET
    plugin = EXCLUDED.plugin,
    identifier = EXCLUDED.identifier,
    fields = EXCLUDED.fields,
    updated_at = NOW()";

const SELECT_CO_SIGN: &str =
    "SELECT plugin, identifier, fields::text AS fields FROM submission_co_sign WHERE submission_id = $1";

/// Postgres-backed [`AuthInfoStore`].
#[derive(Clone)]
pub struct PgAuthInfoStore {
    pool: PgPool,
}

impl PgAuthInfoStore {
    /// Connect a small pool to `dsn`.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist yet.
    ///
    /// # Errors
    /// Returns the first statement that fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in split_sql_statements(SCHEMA_SQL) {
            sqlx::query(&statement)
                .execute(&self.pool)
                .instrument(info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "CREATE",
                    db.statement = statement.as_str()
                ))
                .await?;
        }
        Ok(())
    }
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

fn to_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>, StoreError> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(StoreError::from)
}

fn from_json<T: serde::de::DeserializeOwned>(
    value: Option<String>,
) -> Result<Option<T>, StoreError> {
    value
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(StoreError::from)
}

fn auth_info_from_row(row: &PgRow) -> Result<AuthInfo, StoreError> {
    let attribute: String = row.try_get("attribute")?;
    let attribute = attribute
        .parse::<AuthAttribute>()
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
    Ok(AuthInfo {
        submission: row.try_get("submission_id")?,
        plugin: row.try_get("plugin")?,
        attribute,
        value: row.try_get("value")?,
        loa: row.try_get("loa")?,
        acting_subject_identifier_type: row.try_get("acting_subject_identifier_type")?,
        acting_subject_identifier_value: row.try_get("acting_subject_identifier_value")?,
        legal_subject_identifier_type: row.try_get("legal_subject_identifier_type")?,
        legal_subject_identifier_value: row.try_get("legal_subject_identifier_value")?,
        legal_subject_service_restriction: row.try_get("legal_subject_service_restriction")?,
        mandate_context: from_json(row.try_get("mandate_context")?)?,
        additional_claims: from_json(row.try_get("additional_claims")?)?,
        attribute_hashed: row.try_get("attribute_hashed")?,
    })
}

#[async_trait]
impl AuthInfoStore for PgAuthInfoStore {
    async fn upsert(&self, info: &AuthInfo) -> Result<(), StoreError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = UPSERT_AUTH_INFO
        );
        sqlx::query(UPSERT_AUTH_INFO)
            .bind(info.submission)
            .bind(&info.plugin)
            .bind(info.attribute.as_str())
            .bind(&info.value)
            .bind(&info.loa)
            .bind(&info.acting_subject_identifier_type)
            .bind(&info.acting_subject_identifier_value)
            .bind(&info.legal_subject_identifier_type)
            .bind(&info.legal_subject_identifier_value)
            .bind(&info.legal_subject_service_restriction)
            .bind(to_json(info.mandate_context.as_ref())?)
            .bind(to_json(info.additional_claims.as_ref())?)
            .bind(info.attribute_hashed)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn get(&self, submission: Uuid) -> Result<Option<AuthInfo>, StoreError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = SELECT_AUTH_INFO
        );
        let row = sqlx::query(SELECT_AUTH_INFO)
            .bind(submission)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?;
        row.as_ref().map(auth_info_from_row).transpose()
    }

    async fn upsert_co_sign(&self, submission: Uuid, data: &CoSignData) -> Result<(), StoreError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = UPSERT_CO_SIGN
        );
        sqlx::query(UPSERT_CO_SIGN)
            .bind(submission)
            .bind(&data.plugin)
            .bind(&data.identifier)
            .bind(serde_json::to_string(&data.fields)?)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }

    async fn co_sign(&self, submission: Uuid) -> Result<Option<CoSignData>, StoreError> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = SELECT_CO_SIGN
        );
        let Some(row) = sqlx::query(SELECT_CO_SIGN)
            .bind(submission)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(CoSignData {
            plugin: row.try_get("plugin")?,
            identifier: row.try_get("identifier")?,
            fields: from_json(row.try_get("fields")?)?.unwrap_or_default(),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = "SELECT 1"
            ))
            .await?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_splits_into_table_statements() {
        let statements = split_sql_statements(SCHEMA_SQL);
        assert_eq!(statements.len(), 2);
        assert!(statements
            .iter()
            .all(|statement| statement.starts_with("CREATE TABLE IF NOT EXISTS")));
    }

    #[test]
    fn json_columns_round_trip_through_text() -> Result<(), StoreError> {
        let mandate = crate::types::MandateContext {
            role: Some("bewindvoerder".to_string()),
            services: Vec::new(),
        };
        let text = to_json(Some(&mandate))?;
        let back: Option<crate::types::MandateContext> = from_json(text)?;
        assert_eq!(back, Some(mandate));
        assert_eq!(to_json::<crate::types::MandateContext>(None)?, None);
        Ok(())
    }
}
