//! PostgreSQL-backed directory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use super::directory::{Directory, ScopeRegistration};
use crate::config::DatabaseConfig;
use crate::models::{Principal, RegisteredService, Role, ScopeRequest, ScopeVerb};

const PRINCIPAL_SELECT: &str = r#"
    SELECT p.principal_id, p.username, p.email, p.password_hash, p.created_utc,
           COALESCE(array_agg(r.role_name) FILTER (WHERE r.role_name IS NOT NULL), '{}'::TEXT[]) AS roles
    FROM principals p
    LEFT JOIN principal_roles pr ON pr.principal_id = p.principal_id
    LEFT JOIN roles r ON r.role_id = pr.role_id
"#;

const SCOPE_COLUMNS: &str = "scope_id, service_id, scope_label, approved, created_utc";

#[derive(Debug, FromRow)]
struct PrincipalRow {
    principal_id: Uuid,
    username: String,
    email: Option<String>,
    password_hash: String,
    created_utc: DateTime<Utc>,
    roles: Vec<String>,
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = anyhow::Error;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        let roles = row
            .roles
            .iter()
            .map(|name| name.parse::<Role>().map_err(|e| anyhow::anyhow!(e)))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Principal {
            principal_id: row.principal_id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            roles,
            created_utc: row.created_utc,
        })
    }
}

#[derive(Debug, FromRow)]
struct ServiceRow {
    service_id: Uuid,
    service_name: String,
    created_utc: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ScopeRow {
    scope_id: Uuid,
    service_id: Uuid,
    scope_label: String,
    approved: bool,
    created_utc: DateTime<Utc>,
}

impl TryFrom<ScopeRow> for ScopeRequest {
    type Error = anyhow::Error;

    fn try_from(row: ScopeRow) -> Result<Self, Self::Error> {
        Ok(ScopeRequest {
            scope_id: row.scope_id,
            service_id: row.service_id,
            scope: row.scope_label.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            approved: row.approved,
            created_utc: row.created_utc,
        })
    }
}

#[derive(Clone, Copy)]
enum PrincipalKey<'a> {
    Id(Uuid),
    Name(&'a str),
}

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> anyhow::Error {
    move |e| anyhow::anyhow!("{}: {}", context, e)
}

/// Directory stored in PostgreSQL.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    /// Create a new database connection pool.
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, anyhow::Error> {
        info!("Connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&config.url)
            .await
            .map_err(db_error("Failed to connect"))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), anyhow::Error> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_principal(
        &self,
        key: PrincipalKey<'_>,
    ) -> Result<Option<Principal>, anyhow::Error> {
        let clause = match key {
            PrincipalKey::Id(_) => "p.principal_id = $1",
            PrincipalKey::Name(_) => "p.username = $1",
        };
        let sql = format!("{} WHERE {} GROUP BY p.principal_id", PRINCIPAL_SELECT, clause);
        let query = sqlx::query_as::<_, PrincipalRow>(&sql);
        let query = match key {
            PrincipalKey::Id(id) => query.bind(id),
            PrincipalKey::Name(name) => query.bind(name.to_string()),
        };
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load principal"))?
            .map(Principal::try_from)
            .transpose()
    }

    async fn scopes_for(&self, service_id: Uuid) -> Result<Vec<ScopeRequest>, anyhow::Error> {
        let sql = format!(
            "SELECT {} FROM scope_requests WHERE service_id = $1 ORDER BY created_utc, scope_label",
            SCOPE_COLUMNS
        );
        sqlx::query_as::<_, ScopeRow>(&sql)
            .bind(service_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to load scopes"))?
            .into_iter()
            .map(ScopeRequest::try_from)
            .collect()
    }

    async fn assemble(&self, row: ServiceRow) -> Result<RegisteredService, anyhow::Error> {
        Ok(RegisteredService {
            scopes: self.scopes_for(row.service_id).await?,
            service_id: row.service_id,
            service_name: row.service_name,
            created_utc: row.created_utc,
        })
    }

    async fn role_names(&self, principal_id: Uuid) -> Result<BTreeSet<Role>, anyhow::Error> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT r.role_name
            FROM principal_roles pr
            JOIN roles r ON r.role_id = pr.role_id
            WHERE pr.principal_id = $1
            "#,
        )
        .bind(principal_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to load roles"))?;

        names
            .iter()
            .map(|name| name.parse::<Role>().map_err(|e| anyhow::anyhow!(e)))
            .collect()
    }

    async fn principal_exists(&self, principal_id: Uuid) -> Result<bool, anyhow::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM principals WHERE principal_id = $1)")
            .bind(principal_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to check principal"))
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<Principal>, anyhow::Error> {
        self.fetch_principal(PrincipalKey::Id(principal_id)).await
    }

    async fn find_principal_by_name(
        &self,
        username: &str,
    ) -> Result<Option<Principal>, anyhow::Error> {
        self.fetch_principal(PrincipalKey::Name(username)).await
    }

    #[instrument(skip(self, principal), fields(principal = %principal.username))]
    async fn insert_principal(&self, principal: &Principal) -> Result<bool, anyhow::Error> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin transaction"))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO principals (principal_id, username, email, password_hash, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (username) DO NOTHING
            "#,
        )
        .bind(principal.principal_id)
        .bind(&principal.username)
        .bind(&principal.email)
        .bind(&principal.password_hash)
        .bind(principal.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to insert principal"))?
        .rows_affected();

        if inserted == 0 {
            return Ok(false);
        }

        for role in &principal.roles {
            sqlx::query("INSERT INTO roles (role_name) VALUES ($1) ON CONFLICT (role_name) DO NOTHING")
                .bind(role.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to ensure role"))?;
            sqlx::query(
                r#"
                INSERT INTO principal_roles (principal_id, role_id)
                SELECT $1, role_id FROM roles WHERE role_name = $2
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(principal.principal_id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to link role"))?;
        }

        tx.commit().await.map_err(db_error("Failed to commit principal"))?;
        Ok(true)
    }

    async fn list_principals(&self) -> Result<Vec<Principal>, anyhow::Error> {
        let sql = format!("{} GROUP BY p.principal_id ORDER BY p.username", PRINCIPAL_SELECT);
        sqlx::query_as::<_, PrincipalRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list principals"))?
            .into_iter()
            .map(Principal::try_from)
            .collect()
    }

    async fn ensure_role(&self, role: Role) -> Result<(), anyhow::Error> {
        sqlx::query("INSERT INTO roles (role_name) VALUES ($1) ON CONFLICT (role_name) DO NOTHING")
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to ensure role"))?;
        Ok(())
    }

    #[instrument(skip_all, fields(principal_id = %principal_id, role = %role))]
    async fn grant_role(
        &self,
        principal_id: Uuid,
        role: Role,
    ) -> Result<Option<BTreeSet<Role>>, anyhow::Error> {
        if !self.principal_exists(principal_id).await? {
            return Ok(None);
        }
        self.ensure_role(role).await?;

        sqlx::query(
            r#"
            INSERT INTO principal_roles (principal_id, role_id)
            SELECT $1, role_id FROM roles WHERE role_name = $2
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(principal_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to grant role"))?;

        self.role_names(principal_id).await.map(Some)
    }

    #[instrument(skip_all, fields(principal_id = %principal_id, role = %role))]
    async fn remove_role(
        &self,
        principal_id: Uuid,
        role: Role,
    ) -> Result<Option<bool>, anyhow::Error> {
        if !self.principal_exists(principal_id).await? {
            return Ok(None);
        }

        let removed = sqlx::query(
            r#"
            DELETE FROM principal_roles pr
            USING roles r
            WHERE pr.role_id = r.role_id AND pr.principal_id = $1 AND r.role_name = $2
            "#,
        )
        .bind(principal_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to revoke role"))?
        .rows_affected();

        Ok(Some(removed > 0))
    }

    async fn list_services(&self) -> Result<Vec<RegisteredService>, anyhow::Error> {
        let services = sqlx::query_as::<_, ServiceRow>(
            "SELECT service_id, service_name, created_utc FROM registered_services ORDER BY service_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list services"))?;

        let sql = format!("SELECT {} FROM scope_requests ORDER BY created_utc, scope_label", SCOPE_COLUMNS);
        let mut scopes: HashMap<Uuid, Vec<ScopeRequest>> = HashMap::new();
        for row in sqlx::query_as::<_, ScopeRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list scopes"))?
        {
            let scope = ScopeRequest::try_from(row)?;
            scopes.entry(scope.service_id).or_default().push(scope);
        }

        Ok(services
            .into_iter()
            .map(|row| RegisteredService {
                scopes: scopes.remove(&row.service_id).unwrap_or_default(),
                service_id: row.service_id,
                service_name: row.service_name,
                created_utc: row.created_utc,
            })
            .collect())
    }

    async fn find_service(
        &self,
        service_id: Uuid,
    ) -> Result<Option<RegisteredService>, anyhow::Error> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "SELECT service_id, service_name, created_utc FROM registered_services WHERE service_id = $1",
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load service"))?;

        match row {
            Some(row) => self.assemble(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_service_by_name(
        &self,
        service_name: &str,
    ) -> Result<Option<RegisteredService>, anyhow::Error> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "SELECT service_id, service_name, created_utc FROM registered_services WHERE service_name = $1",
        )
        .bind(service_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to load service"))?;

        match row {
            Some(row) => self.assemble(row).await.map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(service = %service_name, scope = %scope))]
    async fn register_scope(
        &self,
        service_name: &str,
        scope: ScopeVerb,
    ) -> Result<ScopeRegistration, anyhow::Error> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to begin transaction"))?;

        sqlx::query(
            r#"
            INSERT INTO registered_services (service_id, service_name)
            VALUES ($1, $2)
            ON CONFLICT (service_name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(service_name)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to register service"))?;

        let service_id: Uuid =
            sqlx::query_scalar("SELECT service_id FROM registered_services WHERE service_name = $1")
                .bind(service_name)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error("Failed to resolve service"))?;

        let created = sqlx::query(
            r#"
            INSERT INTO scope_requests (scope_id, service_id, scope_label)
            VALUES ($1, $2, $3)
            ON CONFLICT (service_id, scope_label) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(service_id)
        .bind(scope.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to register scope"))?
        .rows_affected()
            == 1;

        let sql = format!(
            "SELECT {} FROM scope_requests WHERE service_id = $1 AND scope_label = $2",
            SCOPE_COLUMNS
        );
        let row = sqlx::query_as::<_, ScopeRow>(&sql)
            .bind(service_id)
            .bind(scope.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to load scope"))?;

        tx.commit().await.map_err(db_error("Failed to commit scope"))?;

        Ok(ScopeRegistration {
            request: ScopeRequest::try_from(row)?,
            created,
        })
    }

    async fn find_scope(
        &self,
        service_id: Uuid,
        scope: ScopeVerb,
    ) -> Result<Option<ScopeRequest>, anyhow::Error> {
        let sql = format!(
            "SELECT {} FROM scope_requests WHERE service_id = $1 AND scope_label = $2",
            SCOPE_COLUMNS
        );
        sqlx::query_as::<_, ScopeRow>(&sql)
            .bind(service_id)
            .bind(scope.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to load scope"))?
            .map(ScopeRequest::try_from)
            .transpose()
    }

    async fn approve_scope(&self, scope_id: Uuid) -> Result<Option<ScopeRequest>, anyhow::Error> {
        let sql = format!(
            "UPDATE scope_requests SET approved = TRUE WHERE scope_id = $1 RETURNING {}",
            SCOPE_COLUMNS
        );
        sqlx::query_as::<_, ScopeRow>(&sql)
            .bind(scope_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to approve scope"))?
            .map(ScopeRequest::try_from)
            .transpose()
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error("Health check failed"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn directory() -> Option<PgDirectory> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let directory = PgDirectory::connect(&DatabaseConfig {
            url,
            max_connections: 2,
        })
        .await
        .expect("database should connect");
        directory.run_migrations().await.expect("migrations should run");
        Some(directory)
    }

    #[tokio::test]
    async fn test_pg_principal_roles() {
        let Some(directory) = directory().await else {
            return;
        };
        let name = format!("pg_user_{}", Uuid::new_v4().simple());
        let principal = Principal::new(name.clone(), None, "hash".into()).with_role(Role::Client);

        assert!(directory.insert_principal(&principal).await.unwrap());
        assert!(!directory.insert_principal(&principal).await.unwrap());

        let roles = directory
            .grant_role(principal.principal_id, Role::Manager)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(roles, BTreeSet::from([Role::Manager, Role::Client]));

        let loaded = directory.find_principal_by_name(&name).await.unwrap().unwrap();
        assert_eq!(loaded.roles, roles);
        assert_eq!(
            directory.remove_role(principal.principal_id, Role::Manager).await.unwrap(),
            Some(true)
        );
        assert_eq!(
            directory.remove_role(principal.principal_id, Role::Manager).await.unwrap(),
            Some(false)
        );
    }

    #[tokio::test]
    async fn test_pg_scope_registration_and_approval() {
        let Some(directory) = directory().await else {
            return;
        };
        let service = format!("pg-svc-{}", Uuid::new_v4().simple());

        let first = directory.register_scope(&service, ScopeVerb::Read).await.unwrap();
        let second = directory.register_scope(&service, ScopeVerb::Read).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.request.scope_id, second.request.scope_id);

        let approved = directory.approve_scope(first.request.scope_id).await.unwrap().unwrap();
        assert!(approved.approved);
        let again = directory.approve_scope(first.request.scope_id).await.unwrap().unwrap();
        assert!(again.approved);

        let loaded = directory.find_service_by_name(&service).await.unwrap().unwrap();
        assert_eq!(loaded.approved_scopes(), vec![ScopeVerb::Read]);
    }
}
