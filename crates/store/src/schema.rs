// SPDX-License-Identifier: MIT

//! Conversation schema, row-level security, and role DDL functions.
//!
//! RLS is keyed on the `app.current_user_id` session variable. Worker
//! connections run under a per-user role that has no way around the
//! policy; the daemon connects as the schema owner and bypasses it.

use sqlx::postgres::PgPool;

use crate::StoreError;

const SCHEMA_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS workspaces (
        id bigserial PRIMARY KEY,
        tenant_type text NOT NULL,
        tenant_id text NOT NULL UNIQUE,
        display_name text,
        created_at timestamptz NOT NULL DEFAULT now(),
        updated_at timestamptz NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS conversations (
        id bigserial PRIMARY KEY,
        session_key text NOT NULL,
        agent_session_id text,
        tenant_id text NOT NULL,
        from_user_id text NOT NULL,
        bot_id text,
        status text NOT NULL DEFAULT 'active',
        conversation_data jsonb NOT NULL DEFAULT '{}'::jsonb,
        created_at timestamptz NOT NULL DEFAULT now(),
        updated_at timestamptz NOT NULL DEFAULT now(),
        UNIQUE (session_key, tenant_id)
    )",
    "CREATE INDEX IF NOT EXISTS conversations_session
        ON conversations (session_key, tenant_id)",
    "CREATE INDEX IF NOT EXISTS conversations_agent_session
        ON conversations (agent_session_id)",
    "CREATE INDEX IF NOT EXISTS conversations_user
        ON conversations (from_user_id, tenant_id)",
    "ALTER TABLE conversations ENABLE ROW LEVEL SECURITY",
    // Owner (the daemon) bypasses RLS implicitly; per-user roles see only
    // their own rows, selected by the session variable set on every pooled
    // connection at connect time (see pool::connect_user_pool).
    "DO $$ BEGIN
        CREATE POLICY conversations_per_user ON conversations
            USING (from_user_id = current_setting('app.current_user_id', true));
     EXCEPTION WHEN duplicate_object THEN NULL;
     END $$",
    // Per-user role management, called by the credential store. The role
    // is granted usage on the queue schema only.
    "CREATE OR REPLACE FUNCTION create_user_role(p_user_id text, p_password text)
     RETURNS text
     LANGUAGE plpgsql
     SECURITY DEFINER
     AS $$
     DECLARE
         v_role text := 'peerbot_user_' || lower(regexp_replace(p_user_id, '[^a-zA-Z0-9]', '_', 'g'));
     BEGIN
         IF NOT EXISTS (SELECT 1 FROM pg_roles WHERE rolname = v_role) THEN
             EXECUTE format('CREATE ROLE %I LOGIN PASSWORD %L', v_role, p_password);
         ELSE
             EXECUTE format('ALTER ROLE %I WITH LOGIN PASSWORD %L', v_role, p_password);
         END IF;
         EXECUTE format('GRANT USAGE ON SCHEMA pbq TO %I', v_role);
         EXECUTE format('GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA pbq TO %I', v_role);
         EXECUTE format('GRANT SELECT, INSERT, UPDATE ON conversations TO %I', v_role);
         RETURN v_role;
     END;
     $$",
    "CREATE OR REPLACE FUNCTION alter_user_role_password(p_user_id text, p_password text)
     RETURNS void
     LANGUAGE plpgsql
     SECURITY DEFINER
     AS $$
     DECLARE
         v_role text := 'peerbot_user_' || lower(regexp_replace(p_user_id, '[^a-zA-Z0-9]', '_', 'g'));
     BEGIN
         EXECUTE format('ALTER ROLE %I WITH PASSWORD %L', v_role, p_password);
     END;
     $$",
    "CREATE OR REPLACE FUNCTION drop_user_role(p_user_id text)
     RETURNS void
     LANGUAGE plpgsql
     SECURITY DEFINER
     AS $$
     DECLARE
         v_role text := 'peerbot_user_' || lower(regexp_replace(p_user_id, '[^a-zA-Z0-9]', '_', 'g'));
     BEGIN
         IF EXISTS (SELECT 1 FROM pg_roles WHERE rolname = v_role) THEN
             EXECUTE format('REVOKE ALL ON ALL TABLES IN SCHEMA pbq FROM %I', v_role);
             EXECUTE format('REVOKE USAGE ON SCHEMA pbq FROM %I', v_role);
             EXECUTE format('REVOKE ALL ON conversations FROM %I', v_role);
             EXECUTE format('DROP ROLE %I', v_role);
         END IF;
     END;
     $$",
];

/// Apply the conversation schema. Idempotent; run once at daemon startup,
/// after the queue schema exists (the role grants reference `pbq`).
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for stmt in SCHEMA_SQL {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
