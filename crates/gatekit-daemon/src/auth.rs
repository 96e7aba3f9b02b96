//! The authenticated-billing-route auth seam.
//!
//! Spec §1 lists "user signup/login" and "workspace/role lookups" as
//! out-of-scope, handled by an external collaborator; spec §6.1 only says
//! the authenticated billing routes require "owner or admin of workspace"
//! and that "auth is a bearer token validated by an external collaborator".
//! No wire contract for that collaborator is given, so — exactly like
//! [`gatekit_billing::BillingClient`] — this module defines the trait
//! boundary the daemon depends on, and keeps the one concrete
//! implementation (`SupabaseAuthClient`) isolated behind it.
//!
//! `SupabaseAuthClient` resolves identity via Supabase GoTrue's documented
//! `/auth/v1/user` endpoint (a real, stable Supabase REST call — this
//! system already carries `SUPABASE_URL`/`SUPABASE_ANON_KEY` for exactly
//! this), then asks `is_workspace_admin` (see `gatekit_db::rpc`) for the
//! role decision. That second call is not one of spec §6.2's seven fixed
//! RPCs; see DESIGN.md for why one more was necessary to make this route
//! class runnable at all.

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceRole {
    Admin,
}

#[derive(Debug, Clone)]
pub struct AuthorizedActor {
    pub user_id: Uuid,
    pub role: WorkspaceRole,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or invalid bearer token")]
    Unauthenticated,
    #[error("caller is not an owner or admin of this workspace")]
    Forbidden,
    #[error("auth backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Validate `bearer_token` and confirm the resulting caller is an owner
    /// or admin of `workspace_id`. Implementations never see a trusted
    /// identity without validating the token first — there is no shortcut
    /// that skips straight to the role check.
    async fn authorize_workspace_admin(
        &self,
        bearer_token: &str,
        workspace_id: Uuid,
    ) -> Result<AuthorizedActor, AuthError>;
}

#[derive(Deserialize)]
struct GoTrueUser {
    id: Uuid,
}

pub struct SupabaseAuthClient {
    http: reqwest::Client,
    pool: PgPool,
    supabase_url: String,
    supabase_anon_key: String,
}

impl SupabaseAuthClient {
    pub fn new(http: reqwest::Client, pool: PgPool, supabase_url: String, supabase_anon_key: String) -> Self {
        Self {
            http,
            pool,
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key,
        }
    }

    async fn resolve_user_id(&self, bearer_token: &str) -> Result<Uuid, AuthError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.supabase_url))
            .header("apikey", &self.supabase_anon_key)
            .bearer_auth(bearer_token)
            .send()
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AuthError::Unauthenticated);
        }
        if !response.status().is_success() {
            return Err(AuthError::Backend(format!("GoTrue returned {}", response.status())));
        }

        let user: GoTrueUser = response
            .json()
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;
        Ok(user.id)
    }
}

#[async_trait]
impl AuthClient for SupabaseAuthClient {
    async fn authorize_workspace_admin(
        &self,
        bearer_token: &str,
        workspace_id: Uuid,
    ) -> Result<AuthorizedActor, AuthError> {
        let user_id = self.resolve_user_id(bearer_token).await?;

        let is_admin = gatekit_db::rpc::is_workspace_admin(&self.pool, workspace_id, user_id)
            .await
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        if !is_admin {
            return Err(AuthError::Forbidden);
        }

        Ok(AuthorizedActor {
            user_id,
            role: WorkspaceRole::Admin,
        })
    }
}

/// In-memory [`AuthClient`] for tests, mirroring `gatekit_billing::fake::
/// FakeBillingClient` — a deterministic double swapped in for the whole
/// trait rather than a mock of individual calls. Bearer tokens are looked
/// up directly against a seeded table instead of round-tripping through
/// GoTrue or Postgres.
#[cfg(any(test, feature = "testkit"))]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::{AuthClient, AuthError, AuthorizedActor, WorkspaceRole};

    #[derive(Default)]
    pub struct FakeAuthClient {
        // bearer_token -> user_id
        users: Mutex<HashMap<String, Uuid>>,
        // (user_id, workspace_id) admitted as workspace admin
        admins: Mutex<Vec<(Uuid, Uuid)>>,
    }

    impl FakeAuthClient {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a bearer token as resolving to `user_id`.
        pub fn seed_user(&self, bearer_token: &str, user_id: Uuid) {
            self.users.lock().unwrap().insert(bearer_token.to_string(), user_id);
        }

        /// Grant `user_id` admin of `workspace_id`.
        pub fn seed_admin(&self, user_id: Uuid, workspace_id: Uuid) {
            self.admins.lock().unwrap().push((user_id, workspace_id));
        }
    }

    #[async_trait]
    impl AuthClient for FakeAuthClient {
        async fn authorize_workspace_admin(
            &self,
            bearer_token: &str,
            workspace_id: Uuid,
        ) -> Result<AuthorizedActor, AuthError> {
            let user_id = *self
                .users
                .lock()
                .unwrap()
                .get(bearer_token)
                .ok_or(AuthError::Unauthenticated)?;

            let is_admin = self.admins.lock().unwrap().contains(&(user_id, workspace_id));
            if !is_admin {
                return Err(AuthError::Forbidden);
            }

            Ok(AuthorizedActor { user_id, role: WorkspaceRole::Admin })
        }
    }
}
