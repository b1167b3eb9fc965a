//! User repository.

use chrono::Utc;

use csr_core::entities::User;
use csr_core::enums::{AuditAction, ResourceType, UserRole, UserStatus};
use csr_core::ids::PREFIX_USER;

use crate::error::DatabaseError;
use crate::helpers::{collect_rows, get_opt_string, parse_datetime, parse_enum, parse_optional_datetime};
use crate::service::CsrService;
use crate::updates::user::UserUpdate;

const SELECT_COLS: &str =
    "id, company_id, email, display_name, role, status, last_login_at, created_at, updated_at";

fn row_to_user(row: &libsql::Row) -> Result<User, DatabaseError> {
    Ok(User {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        email: row.get::<String>(2)?,
        display_name: get_opt_string(row, 3)?,
        role: parse_enum(&row.get::<String>(4)?)?,
        status: parse_enum(&row.get::<String>(5)?)?,
        last_login_at: parse_optional_datetime(get_opt_string(row, 6)?.as_deref())?,
        created_at: parse_datetime(&row.get::<String>(7)?)?,
        updated_at: parse_datetime(&row.get::<String>(8)?)?,
    })
}

impl CsrService {
    /// Invite a user into a company. Emails are stored lowercased and are
    /// unique across the platform.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Duplicate` if the email is taken.
    pub async fn create_user(
        &self,
        company_id: &str,
        email: &str,
        display_name: Option<&str>,
        role: UserRole,
    ) -> Result<User, DatabaseError> {
        self.check_tenant(company_id)?;
        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_USER).await?;
        let email = email.trim().to_lowercase();

        self.db()
            .execute_with(
                "INSERT INTO users (id, company_id, email, display_name, role, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'invited', ?6, ?6)",
                || {
                    libsql::params![
                        id.as_str(),
                        company_id,
                        email.as_str(),
                        display_name,
                        role.as_str(),
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        let user = User {
            id: id.clone(),
            company_id: company_id.to_string(),
            email,
            display_name: display_name.map(String::from),
            role,
            status: UserStatus::Invited,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };

        self.record_audit(
            company_id,
            AuditAction::Created,
            ResourceType::User,
            &id,
            None,
            Some(serde_json::to_value(&user)?),
        )
        .await?;

        Ok(user)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if no user has this id.
    pub async fn get_user(&self, id: &str) -> Result<User, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(&format!("SELECT {SELECT_COLS} FROM users WHERE id = ?1"), || [id])
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let user = row_to_user(&row)?;
        self.check_tenant(&user.company_id)?;
        Ok(user)
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_users(&self, company_id: &str) -> Result<Vec<User>, DatabaseError> {
        self.check_tenant(company_id)?;
        let rows = self
            .db()
            .query_with(
                &format!("SELECT {SELECT_COLS} FROM users WHERE company_id = ?1 ORDER BY email"),
                || [company_id],
            )
            .await?;
        collect_rows(rows, row_to_user).await
    }

    /// Apply a partial update. A status change must follow the user lifecycle.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` on a disallowed status change.
    pub async fn update_user(&self, id: &str, update: UserUpdate) -> Result<User, DatabaseError> {
        let current = self.get_user(id).await?;

        if let Some(status) = update.status {
            if status != current.status && !current.status.can_transition_to(status) {
                return Err(DatabaseError::InvalidState(format!(
                    "Cannot transition user {id} from {} to {status}",
                    current.status
                )));
            }
        }

        let mut sets = Vec::new();
        let mut params: Vec<libsql::Value> = Vec::new();
        let mut idx = 1;

        if let Some(ref display_name) = update.display_name {
            sets.push(format!("display_name = ?{idx}"));
            params.push(display_name.as_deref().into());
            idx += 1;
        }
        if let Some(role) = update.role {
            sets.push(format!("role = ?{idx}"));
            params.push(role.as_str().into());
            idx += 1;
        }
        if let Some(status) = update.status {
            sets.push(format!("status = ?{idx}"));
            params.push(status.as_str().into());
            idx += 1;
        }

        if sets.is_empty() {
            return Ok(current);
        }

        sets.push(format!("updated_at = ?{idx}"));
        params.push(Utc::now().to_rfc3339().into());
        idx += 1;
        params.push(id.into());

        let sql = format!("UPDATE users SET {} WHERE id = ?{idx}", sets.join(", "));
        self.db()
            .execute_with(&sql, || libsql::params_from_iter(params.clone()))
            .await?;

        let user = self.get_user(id).await?;

        self.record_audit(
            &user.company_id,
            AuditAction::Updated,
            ResourceType::User,
            id,
            Some(serde_json::to_value(&current)?),
            Some(serde_json::to_value(&update)?),
        )
        .await?;

        Ok(user)
    }

    /// Stamp a successful login. The first login activates an invited user.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` for a disabled user.
    pub async fn record_login(&self, id: &str) -> Result<User, DatabaseError> {
        let current = self.get_user(id).await?;
        if current.status == UserStatus::Disabled {
            return Err(DatabaseError::InvalidState(format!(
                "user {id} is disabled"
            )));
        }

        let now = Utc::now();
        self.db()
            .execute_with(
                "UPDATE users SET last_login_at = ?1, status = 'active', updated_at = ?1 WHERE id = ?2",
                || libsql::params![now.to_rfc3339(), id],
            )
            .await?;

        self.record_audit(
            &current.company_id,
            AuditAction::LoginRecorded,
            ResourceType::User,
            id,
            None,
            None,
        )
        .await?;

        Ok(User {
            status: UserStatus::Active,
            last_login_at: Some(now),
            updated_at: now,
            ..current
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::test_support::helpers::{seed_company, seed_tenant, test_service};
    use crate::updates::user::UserUpdateBuilder;

    #[tokio::test]
    async fn create_normalizes_email() {
        let svc = test_service().await;
        let company = seed_company(&svc, "acme").await;
        let user = svc
            .create_user(&company.id, "  Jane.Doe@Acme.Example ", None, UserRole::Employee)
            .await
            .unwrap();
        assert_eq!(user.email, "jane.doe@acme.example");
        assert_eq!(user.status, UserStatus::Invited);

        let fetched = svc.get_user(&user.id).await.unwrap();
        assert_eq!(fetched, user);
    }

    #[tokio::test]
    async fn duplicate_email_rejected_across_companies() {
        let svc = test_service().await;
        let (_, user) = seed_tenant(&svc, "acme").await;
        let other = seed_company(&svc, "globex").await;
        let err = svc
            .create_user(&other.id, &user.email, None, UserRole::Viewer)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { ref key, .. } if key == "email"));
    }

    #[tokio::test]
    async fn first_login_activates() {
        let svc = test_service().await;
        let (_, user) = seed_tenant(&svc, "acme").await;
        let user = svc.record_login(&user.id).await.unwrap();
        assert_eq!(user.status, UserStatus::Active);
        assert!(user.last_login_at.is_some());
    }

    #[tokio::test]
    async fn disabled_user_cannot_log_in() {
        let svc = test_service().await;
        let (_, user) = seed_tenant(&svc, "acme").await;
        let update = UserUpdateBuilder::new().status(UserStatus::Disabled).build();
        svc.update_user(&user.id, update).await.unwrap();

        assert!(matches!(
            svc.record_login(&user.id).await,
            Err(DatabaseError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let svc = test_service().await;
        let (_, user) = seed_tenant(&svc, "acme").await;
        let update = UserUpdateBuilder::new()
            .display_name(None)
            .role(UserRole::Manager)
            .build();
        let updated = svc.update_user(&user.id, update).await.unwrap();
        assert_eq!(updated.display_name, None);
        assert_eq!(updated.role, UserRole::Manager);
        assert_eq!(updated.email, user.email);
    }

    #[tokio::test]
    async fn disabled_cannot_go_back_to_invited() {
        let svc = test_service().await;
        let (_, user) = seed_tenant(&svc, "acme").await;
        svc.update_user(&user.id, UserUpdateBuilder::new().status(UserStatus::Disabled).build())
            .await
            .unwrap();
        let err = svc
            .update_user(&user.id, UserUpdateBuilder::new().status(UserStatus::Invited).build())
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidState(_)));
    }

    #[tokio::test]
    async fn list_is_scoped_to_company() {
        let svc = test_service().await;
        let (acme, _) = seed_tenant(&svc, "acme").await;
        seed_tenant(&svc, "globex").await;
        let users = svc.list_users(&acme.id).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].company_id, acme.id);
    }
}
