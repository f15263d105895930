//! Tool catalog resolution.
//!
//! A runnable tool is the join of three rows: the tool itself (schema,
//! timeout, retry budget), its HTTP endpoint, and the tenant integration
//! that authenticates the outbound call. Inactive integrations make the
//! tool invisible.

use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use vx_domain::Result;

use crate::db_err;

/// Everything needed to execute one tool call.
#[derive(Debug, Clone, FromRow)]
pub struct ToolRuntimeConfig {
    pub tool_id: Uuid,
    pub name: String,
    pub input_schema: Value,
    pub timeout_ms: i64,
    pub max_retries: i32,
    pub url: String,
    pub method: String,
    /// Extra headers from the endpoint; scalar values only are applied.
    pub header_template: Value,
    /// `api_key_header` or `bearer`.
    pub auth_mode: String,
    pub auth_header: String,
    pub sealed_secret: Option<String>,
}

/// Catalog entry offered to the LLM for implicit tool choice.
#[derive(Debug, Clone, FromRow)]
pub struct ToolCatalogEntry {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Clone)]
pub struct ToolStore {
    pool: PgPool,
}

impl ToolStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve a tool by tenant and name, joined through its endpoint
    /// and active integration. `None` covers unknown names, foreign
    /// tenants and deactivated integrations alike.
    pub async fn resolve(
        &self,
        tenant_id: Uuid,
        tool_name: &str,
    ) -> Result<Option<ToolRuntimeConfig>> {
        sqlx::query_as::<_, ToolRuntimeConfig>(
            r#"
            SELECT t.id AS tool_id, t.name, t.input_schema, t.timeout_ms,
                   t.max_retries, e.url, e.method, e.header_template,
                   i.auth_mode, i.auth_header, i.sealed_secret
            FROM tools t
            JOIN tool_endpoints e ON e.id = t.endpoint_id
            JOIN tenant_integrations i ON i.id = t.integration_id AND i.active
            WHERE t.tenant_id = $1 AND t.name = $2
            "#,
        )
        .bind(tenant_id)
        .bind(tool_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    /// Whether the tool is mapped to the agent's published version.
    pub async fn is_mapped_to_published_version(
        &self,
        agent_id: Uuid,
        tool_id: Uuid,
    ) -> Result<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM agents a
                JOIN agent_tools at ON at.agent_version_id = a.published_version_id
                WHERE a.id = $1 AND at.tool_id = $2
            )
            "#,
        )
        .bind(agent_id)
        .bind(tool_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    /// Tools the LLM may pick for this call: mapped to the agent's
    /// published version and backed by an active integration.
    pub async fn catalog_for_agent(&self, agent_id: Uuid) -> Result<Vec<ToolCatalogEntry>> {
        sqlx::query_as::<_, ToolCatalogEntry>(
            r#"
            SELECT t.id, t.name, t.description, t.input_schema
            FROM agents a
            JOIN agent_tools at ON at.agent_version_id = a.published_version_id
            JOIN tools t ON t.id = at.tool_id
            JOIN tenant_integrations i ON i.id = t.integration_id AND i.active
            WHERE a.id = $1
            ORDER BY t.name
            "#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}
