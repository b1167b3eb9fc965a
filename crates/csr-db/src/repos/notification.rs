//! Outbound notification queue.

use chrono::Utc;

use csr_core::entities::Notification;
use csr_core::enums::{AuditAction, NotificationChannel, NotificationStatus, ResourceType};
use csr_core::ids::PREFIX_NOTIFICATION;
use csr_core::shapes::StatusChangedDetail;

use crate::error::DatabaseError;
use crate::helpers::{
    collect_rows, get_opt_string, parse_datetime, parse_enum, parse_optional_datetime,
};
use crate::service::CsrService;

const SELECT_COLS: &str =
    "id, company_id, user_id, channel, template, subject, body, status, sent_at, created_at";

fn row_to_notification(row: &libsql::Row) -> Result<Notification, DatabaseError> {
    Ok(Notification {
        id: row.get::<String>(0)?,
        company_id: row.get::<String>(1)?,
        user_id: row.get::<String>(2)?,
        channel: parse_enum(&row.get::<String>(3)?)?,
        template: row.get::<String>(4)?,
        subject: get_opt_string(row, 5)?,
        body: row.get::<String>(6)?,
        status: parse_enum(&row.get::<String>(7)?)?,
        sent_at: parse_optional_datetime(get_opt_string(row, 8)?.as_deref())?,
        created_at: parse_datetime(&row.get::<String>(9)?)?,
    })
}

impl CsrService {
    /// Queue a notification for a user of the same company.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::TenantMismatch` when the user belongs to
    /// another company.
    pub async fn enqueue_notification(
        &self,
        user_id: &str,
        channel: NotificationChannel,
        template: &str,
        subject: Option<&str>,
        body: &str,
    ) -> Result<Notification, DatabaseError> {
        let user = self.get_user(user_id).await?;
        let now = Utc::now();
        let id = self.db().generate_id(PREFIX_NOTIFICATION).await?;

        self.db()
            .execute_with(
                "INSERT INTO notifications (id, company_id, user_id, channel, template, subject,
                     body, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'queued', ?8)",
                || {
                    libsql::params![
                        id.as_str(),
                        user.company_id.as_str(),
                        user_id,
                        channel.as_str(),
                        template,
                        subject,
                        body,
                        now.to_rfc3339()
                    ]
                },
            )
            .await?;

        Ok(Notification {
            id,
            company_id: user.company_id,
            user_id: user_id.to_string(),
            channel,
            template: template.to_string(),
            subject: subject.map(String::from),
            body: body.to_string(),
            status: NotificationStatus::Queued,
            sent_at: None,
            created_at: now,
        })
    }

    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the notification does not exist.
    pub async fn get_notification(&self, id: &str) -> Result<Notification, DatabaseError> {
        let mut rows = self
            .db()
            .query_with(
                &format!("SELECT {SELECT_COLS} FROM notifications WHERE id = ?1"),
                || [id],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        let notification = row_to_notification(&row)?;
        self.check_tenant(&notification.company_id)?;
        Ok(notification)
    }

    /// Move a notification along its delivery lifecycle. Sending stamps
    /// `sent_at`. Failures are audited.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InvalidState` if the transition is not allowed.
    pub async fn transition_notification(
        &self,
        id: &str,
        to: NotificationStatus,
    ) -> Result<Notification, DatabaseError> {
        let current = self.get_notification(id).await?;
        if !current.status.can_transition_to(to) {
            return Err(DatabaseError::InvalidState(format!(
                "Cannot transition notification {id} from {} to {to}",
                current.status
            )));
        }

        let sent_at = if to == NotificationStatus::Sent {
            Some(Utc::now())
        } else {
            current.sent_at
        };
        self.db()
            .execute_with(
                "UPDATE notifications SET status = ?1, sent_at = ?2 WHERE id = ?3",
                || libsql::params![to.as_str(), sent_at.map(|t| t.to_rfc3339()), id],
            )
            .await?;

        if to == NotificationStatus::Failed {
            let detail = StatusChangedDetail {
                from: current.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: None,
            };
            self.record_audit(
                &current.company_id,
                AuditAction::StatusChanged,
                ResourceType::Notification,
                id,
                None,
                Some(serde_json::to_value(&detail)?),
            )
            .await?;
        }

        Ok(Notification {
            status: to,
            sent_at,
            ..current
        })
    }

    /// A user's notifications, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_notifications_for_user(
        &self,
        user_id: &str,
        status: Option<NotificationStatus>,
        limit: Option<u32>,
    ) -> Result<Vec<Notification>, DatabaseError> {
        self.get_user(user_id).await?;
        let limit = self.limit_or_default(limit);
        let rows = self
            .db()
            .query_with(
                &format!(
                    "SELECT {SELECT_COLS} FROM notifications
                     WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY julianday(created_at) DESC, rowid DESC
                     LIMIT ?3"
                ),
                || libsql::params![user_id, status.map(NotificationStatus::as_str), limit],
            )
            .await?;
        collect_rows(rows, row_to_notification).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::repos::audit::AuditFilter;
    use crate::test_support::helpers::{actor_for, seed_tenant, test_service};

    #[tokio::test]
    async fn queued_then_sent_then_delivered() {
        let svc = test_service().await;
        let (_, user) = seed_tenant(&svc, "acme").await;
        let n = svc
            .enqueue_notification(&user.id, NotificationChannel::Email, "campaign.invite", Some("Join us"), "Hello")
            .await
            .unwrap();
        assert_eq!(n.status, NotificationStatus::Queued);

        let sent = svc
            .transition_notification(&n.id, NotificationStatus::Sent)
            .await
            .unwrap();
        assert!(sent.sent_at.is_some());
        let delivered = svc
            .transition_notification(&n.id, NotificationStatus::Delivered)
            .await
            .unwrap();
        assert_eq!(delivered.sent_at, sent.sent_at);
        assert_eq!(svc.get_notification(&n.id).await.unwrap(), delivered);
    }

    #[tokio::test]
    async fn delivered_is_final() {
        let svc = test_service().await;
        let (_, user) = seed_tenant(&svc, "acme").await;
        let n = svc
            .enqueue_notification(&user.id, NotificationChannel::InApp, "report.ready", None, "Ready")
            .await
            .unwrap();
        assert!(matches!(
            svc.transition_notification(&n.id, NotificationStatus::Delivered).await,
            Err(DatabaseError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn failure_is_audited() {
        let svc = test_service().await;
        let (company, user) = seed_tenant(&svc, "acme").await;
        let n = svc
            .enqueue_notification(&user.id, NotificationChannel::Sms, "reminder", None, "Tomorrow")
            .await
            .unwrap();
        svc.transition_notification(&n.id, NotificationStatus::Failed)
            .await
            .unwrap();
        let entries = svc
            .query_audit(&AuditFilter::for_company(&company.id).resource(ResourceType::Notification, &n.id))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn list_is_per_user_newest_first() {
        let svc = test_service().await;
        let (_, user) = seed_tenant(&svc, "acme").await;
        let (_, other) = seed_tenant(&svc, "globex").await;
        let first = svc
            .enqueue_notification(&user.id, NotificationChannel::Email, "a", None, "1")
            .await
            .unwrap();
        let second = svc
            .enqueue_notification(&user.id, NotificationChannel::Email, "b", None, "2")
            .await
            .unwrap();
        svc.enqueue_notification(&other.id, NotificationChannel::Email, "c", None, "3")
            .await
            .unwrap();
        svc.transition_notification(&first.id, NotificationStatus::Sent)
            .await
            .unwrap();

        let all = svc.list_notifications_for_user(&user.id, None, None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);

        let queued = svc
            .list_notifications_for_user(&user.id, Some(NotificationStatus::Queued), None)
            .await
            .unwrap();
        assert_eq!(queued.len(), 1);
    }

    #[tokio::test]
    async fn cannot_notify_other_tenant_user() {
        let svc = test_service().await;
        let (_, acme_admin) = seed_tenant(&svc, "acme").await;
        let (_, globex_admin) = seed_tenant(&svc, "globex").await;
        let svc = svc.with_actor(actor_for(&acme_admin));
        assert!(matches!(
            svc.enqueue_notification(&globex_admin.id, NotificationChannel::Email, "x", None, "y")
                .await,
            Err(DatabaseError::TenantMismatch { .. })
        ));
    }
}
