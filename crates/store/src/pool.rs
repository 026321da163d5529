// SPDX-License-Identifier: MIT

//! Pool construction for per-user connections.
//!
//! Row-level security keys on the `app.current_user_id` session variable,
//! so it must be set on every backend connection the pool ever opens —
//! not just whichever connection a one-off `set_config` happened to grab.
//! The `after_connect` hook runs for each new connection, and the GUC is
//! session-scoped so it survives for the connection's lifetime.

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::StoreError;

/// Connect a pool whose every connection carries the RLS session variable
/// for `user_id`.
pub async fn connect_user_pool(
    database_url: &str,
    user_id: &str,
    max_connections: u32,
) -> Result<PgPool, StoreError> {
    let user_id = user_id.to_string();
    PgPoolOptions::new()
        .max_connections(max_connections)
        .after_connect(move |conn, _meta| {
            let user_id = user_id.clone();
            Box::pin(async move {
                sqlx::query("SELECT set_config('app.current_user_id', $1, false)")
                    .bind(user_id)
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
        .map_err(StoreError::from)
}
