//! User directory over the relational store.
//!
//! Resolves and creates user records by (lower-cased) email, derives the
//! permission strings embedded in access tokens, and owns the set of
//! currently valid refresh tokens per user. Consistency is the database's
//! concern; nothing here caches.

use crate::auth::password::{hash_password, verify_password};
use crate::entity::{permission, refresh_token, role, user, user_role};
use crate::error::AuthError;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder,
};
use std::sync::Arc;
use time::OffsetDateTime;

pub struct UserDirectory {
    db: Arc<DatabaseConnection>,
}

impl UserDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<user::Model>, AuthError> {
        let email = email.trim().to_lowercase();
        Ok(user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(self.db.as_ref())
            .await?)
    }

    /// Get or create a user by email. Idempotent on the lower-cased email.
    #[tracing::instrument(skip(self))]
    pub async fn find_or_create(&self, email: &str, name: &str) -> Result<user::Model, AuthError> {
        if let Some(existing) = self.find_by_email(email).await? {
            return Ok(existing);
        }

        let now = OffsetDateTime::now_utc();
        let created = user::ActiveModel {
            email: Set(email.trim().to_lowercase()),
            name: Set(name.to_string()),
            password_hash: Set(None),
            created_at: Set(now),
            last_login_at: Set(Some(now)),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        tracing::info!(user_id = created.id, "Created user record");
        Ok(created)
    }

    /// Register a direct-login account. Fails when the email is taken.
    #[tracing::instrument(skip(self, password))]
    pub async fn register(
        &self,
        email: &str,
        name: &str,
        password: &str,
    ) -> Result<user::Model, AuthError> {
        if self.find_by_email(email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }
        let hash = hash_password(password)
            .map_err(|e| AuthError::StoreUnavailable(format!("password hashing: {e}")))?;
        let created = user::ActiveModel {
            email: Set(email.trim().to_lowercase()),
            name: Set(name.to_string()),
            password_hash: Set(Some(hash)),
            created_at: Set(OffsetDateTime::now_utc()),
            last_login_at: Set(None),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(created)
    }

    /// Check a direct-login credential pair. Missing users, OAuth-only
    /// accounts and wrong passwords all report the same generic failure.
    #[tracing::instrument(skip(self, password))]
    pub async fn verify_password_login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<user::Model, AuthError> {
        let user = self
            .find_by_email(email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        match &user.password_hash {
            Some(hash) if verify_password(password, hash) => {
                let mut active: user::ActiveModel = user.into();
                active.last_login_at = Set(Some(OffsetDateTime::now_utc()));
                Ok(active.update(self.db.as_ref()).await?)
            }
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    /// Permission strings for the user's roles, in role-assignment order,
    /// then permission position within each role. Duplicates collapse to the
    /// first occurrence.
    #[tracing::instrument(skip(self))]
    pub async fn permissions_for(&self, user_id: i64) -> Result<Vec<String>, AuthError> {
        let assignments = user_role::Entity::find()
            .filter(user_role::Column::UserId.eq(user_id))
            .order_by_asc(user_role::Column::Id)
            .all(self.db.as_ref())
            .await?;

        let mut permissions = Vec::new();
        for assignment in assignments {
            let entries = permission::Entity::find()
                .filter(permission::Column::RoleId.eq(assignment.role_id))
                .order_by_asc(permission::Column::Position)
                .all(self.db.as_ref())
                .await?;
            for entry in entries {
                let claim = entry.claim_string();
                if !permissions.contains(&claim) {
                    permissions.push(claim);
                }
            }
        }
        Ok(permissions)
    }

    /// Does any of the user's roles carry a permission matching
    /// `(resource, action)`? Scope is ignored.
    pub async fn check_permission(
        &self,
        user_id: i64,
        resource: &str,
        action: &str,
    ) -> Result<bool, AuthError> {
        let assignments = user_role::Entity::find()
            .filter(user_role::Column::UserId.eq(user_id))
            .all(self.db.as_ref())
            .await?;
        for assignment in assignments {
            let matched = permission::Entity::find()
                .filter(permission::Column::RoleId.eq(assignment.role_id))
                .filter(permission::Column::Resource.eq(resource))
                .filter(permission::Column::Action.eq(action))
                .one(self.db.as_ref())
                .await?;
            if matched.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    #[tracing::instrument(skip(self))]
    pub async fn assign_role(&self, email: &str, role_name: &str) -> Result<(), AuthError> {
        let user = self
            .find_by_email(email)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("user {email}")))?;
        let role = role::Entity::find()
            .filter(role::Column::Name.eq(role_name))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("role {role_name}")))?;

        let existing = user_role::Entity::find()
            .filter(user_role::Column::UserId.eq(user.id))
            .filter(user_role::Column::RoleId.eq(role.id))
            .one(self.db.as_ref())
            .await?;
        if existing.is_some() {
            return Ok(());
        }

        user_role::ActiveModel {
            user_id: Set(user.id),
            role_id: Set(role.id),
            assigned_at: Set(OffsetDateTime::now_utc()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_role(&self, email: &str, role_name: &str) -> Result<(), AuthError> {
        let user = self
            .find_by_email(email)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("user {email}")))?;
        let role = role::Entity::find()
            .filter(role::Column::Name.eq(role_name))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("role {role_name}")))?;

        user_role::Entity::delete_many()
            .filter(user_role::Column::UserId.eq(user.id))
            .filter(user_role::Column::RoleId.eq(role.id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn add_refresh_token(&self, email: &str, token: &str) -> Result<(), AuthError> {
        let user = self
            .find_by_email(email)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("user {email}")))?;
        refresh_token::ActiveModel {
            user_id: Set(user.id),
            token: Set(token.to_string()),
            created_at: Set(OffsetDateTime::now_utc()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Remove a token from the user's valid set. Returns whether it existed.
    pub async fn remove_refresh_token(&self, email: &str, token: &str) -> Result<bool, AuthError> {
        let user = self
            .find_by_email(email)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("user {email}")))?;
        let result = refresh_token::Entity::delete_many()
            .filter(refresh_token::Column::UserId.eq(user.id))
            .filter(refresh_token::Column::Token.eq(token))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn has_refresh_token(&self, email: &str, token: &str) -> Result<bool, AuthError> {
        let Some(user) = self.find_by_email(email).await? else {
            return Ok(false);
        };
        let found = refresh_token::Entity::find()
            .filter(refresh_token::Column::UserId.eq(user.id))
            .filter(refresh_token::Column::Token.eq(token))
            .one(self.db.as_ref())
            .await?;
        Ok(found.is_some())
    }
}
