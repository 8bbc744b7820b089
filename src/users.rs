//! User directory gateway backed by the data platform.
//!
//! Profiles live in the `profiles` table; each one mirrors an account in
//! the platform's auth schema. Deleting a user removes both, profile first.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use banana_vision_core::models::{DeleteOutcome, UserProfile};
use banana_vision_core::pagination::Page;
use banana_vision_core::store::{normalize_search, UserDirectory};

use crate::auth::delete_auth_user;
use crate::platform::{PlatformClient, Query};

pub const TABLE: &str = "profiles";

/// [`UserDirectory`] over PostgREST and the auth admin API.
#[derive(Clone)]
pub struct PlatformUserDirectory {
    client: PlatformClient,
}

impl PlatformUserDirectory {
    pub fn new(client: PlatformClient) -> Self {
        Self { client }
    }
}

/// Page query with the optional case-insensitive search filter.
pub fn users_query(offset: u64, limit: u32, search: Option<&str>) -> Query {
    let mut query = vec![("select".to_string(), "*".to_string())];
    if let Some(term) = normalize_search(search) {
        query.push((
            "or".to_string(),
            format!(
                "(email.ilike.*{t}*,first_name.ilike.*{t}*,last_name.ilike.*{t}*)",
                t = term
            ),
        ));
    }
    query.push(("order".to_string(), "created_at.desc.nullslast".to_string()));
    query.push(("offset".to_string(), offset.to_string()));
    query.push(("limit".to_string(), limit.to_string()));
    query
}

#[async_trait]
impl UserDirectory for PlatformUserDirectory {
    async fn list_page(
        &self,
        offset: u64,
        limit: u32,
        search: Option<&str>,
    ) -> Result<Page<UserProfile>> {
        let (rows, total) = self
            .client
            .select::<UserProfile>(TABLE, &users_query(offset, limit, search), true)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "listing profiles failed"))?;
        Ok(Page {
            rows,
            total: total.unwrap_or_default(),
        })
    }

    async fn create_profile(&self, profile: &UserProfile) -> Result<()> {
        let row = serde_json::json!({
            "id": profile.id,
            "email": profile.email,
            "first_name": profile.first_name,
            "last_name": profile.last_name,
            "role": profile.role,
        });
        self.client
            .insert(TABLE, &row)
            .await
            .inspect_err(|e| tracing::error!(error = %e, email = %profile.email, "creating profile failed"))?;
        tracing::info!(email = %profile.email, "profile created");
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<DeleteOutcome> {
        let query = vec![("id".to_string(), format!("eq.{}", id))];
        let removed: Vec<serde_json::Value> = self
            .client
            .delete_returning(TABLE, &query)
            .await
            .map_err(|e| anyhow!("profiles: {}", e))?;

        let auth = delete_auth_user(&self.client, id)
            .await
            .map_err(|e| anyhow!("auth.users: {}", e))?;

        tracing::info!(%id, profile_rows = removed.len(), ?auth, "user deleted");
        Ok(if removed.is_empty() && auth == DeleteOutcome::NotFound {
            DeleteOutcome::NotFound
        } else {
            DeleteOutcome::Deleted
        })
    }
}
