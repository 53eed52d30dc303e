//! SQL schema for the quire SQLite store.
//!
//! Executed at every open; idempotent thanks to `IF NOT EXISTS`. Future
//! migrations will be gated on `PRAGMA user_version`.
//!
//! Every table pairs an internal `seq` row number (insertion order) with the
//! external 24-character `id`. Column names and kinds mirror
//! [`quire_core::schema`].

pub const SCHEMA_VERSION: i64 = 1;

/// Full schema DDL.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS users (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,
    id             TEXT NOT NULL UNIQUE,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    name           TEXT NOT NULL,
    email          TEXT NOT NULL,
    role           TEXT NOT NULL DEFAULT 'user',
    avatar_url     TEXT,
    last_active_at TEXT
);

CREATE TABLE IF NOT EXISTS documents (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    owner_id    TEXT,
    folder_id   TEXT,
    title       TEXT NOT NULL,
    file_name   TEXT,
    mime_type   TEXT,
    size_bytes  INTEGER NOT NULL DEFAULT 0,
    source      TEXT NOT NULL DEFAULT 'upload'
                CHECK (source IN ('upload', 'url', 'manual')),
    fingerprint TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    error       TEXT,
    chunk_count INTEGER NOT NULL DEFAULT 0,
    metadata    TEXT NOT NULL DEFAULT '{}'      -- JSON object
);

-- Documents shared through a knowledge base.
CREATE TABLE IF NOT EXISTS system_documents (
    seq               INTEGER PRIMARY KEY AUTOINCREMENT,
    id                TEXT NOT NULL UNIQUE,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    owner_id          TEXT,
    knowledge_base_id TEXT,
    title             TEXT NOT NULL,
    file_name         TEXT,
    mime_type         TEXT,
    size_bytes        INTEGER NOT NULL DEFAULT 0,
    source            TEXT NOT NULL DEFAULT 'upload'
                      CHECK (source IN ('upload', 'url', 'manual')),
    fingerprint       TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'pending'
                      CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    error             TEXT,
    chunk_count       INTEGER NOT NULL DEFAULT 0,
    metadata          TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS chats (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    owner_id   TEXT NOT NULL,
    title      TEXT NOT NULL DEFAULT 'New chat',
    persona_id TEXT,
    model      TEXT,
    pinned     INTEGER NOT NULL DEFAULT 0 CHECK (pinned IN (0, 1)),
    messages   TEXT NOT NULL DEFAULT '[]'       -- JSON array of messages
);

CREATE TABLE IF NOT EXISTS personas (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    id            TEXT NOT NULL UNIQUE,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    owner_id      TEXT NOT NULL,
    name          TEXT NOT NULL,
    description   TEXT,
    system_prompt TEXT NOT NULL DEFAULT '',
    is_active     INTEGER NOT NULL DEFAULT 0 CHECK (is_active IN (0, 1))
);

CREATE TABLE IF NOT EXISTS settings (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL DEFAULT ''
);

-- path is the parent chain's names joined with '/', kept current by the
-- folder store.
CREATE TABLE IF NOT EXISTS folders (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    owner_id   TEXT NOT NULL,
    name       TEXT NOT NULL,
    parent_id  TEXT,
    path       TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS knowledge_bases (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,
    id             TEXT NOT NULL UNIQUE,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    name           TEXT NOT NULL,
    slug           TEXT NOT NULL,
    storage_prefix TEXT NOT NULL,
    abbreviation   TEXT NOT NULL,
    description    TEXT,
    owner_id       TEXT,
    access_mode    TEXT NOT NULL DEFAULT 'restricted'
                   CHECK (access_mode IN ('public', 'restricted', 'role-based')),
    allowed_roles  TEXT NOT NULL DEFAULT '[]',
    allowed_users  TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS user_settings (
    seq                INTEGER PRIMARY KEY AUTOINCREMENT,
    id                 TEXT NOT NULL UNIQUE,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    owner_id           TEXT NOT NULL,
    default_persona_id TEXT,
    preferences        TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS feedback (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    owner_id   TEXT NOT NULL,
    user_name  TEXT NOT NULL DEFAULT '',
    chat_id    TEXT,
    message_id TEXT,
    rating     INTEGER NOT NULL DEFAULT 0,
    comment    TEXT
);

-- Natural keys.
CREATE UNIQUE INDEX IF NOT EXISTS users_email_idx          ON users(email);
CREATE UNIQUE INDEX IF NOT EXISTS knowledge_bases_slug_idx ON knowledge_bases(slug);
CREATE UNIQUE INDEX IF NOT EXISTS settings_key_idx         ON settings(key);
CREATE UNIQUE INDEX IF NOT EXISTS user_settings_owner_idx  ON user_settings(owner_id);

-- Owner + kind lookups.
CREATE INDEX IF NOT EXISTS documents_owner_status_idx      ON documents(owner_id, status);
CREATE INDEX IF NOT EXISTS documents_owner_fingerprint_idx ON documents(owner_id, fingerprint);
CREATE INDEX IF NOT EXISTS documents_folder_idx            ON documents(folder_id);
CREATE INDEX IF NOT EXISTS system_documents_kb_idx         ON system_documents(knowledge_base_id);
CREATE INDEX IF NOT EXISTS chats_owner_updated_idx         ON chats(owner_id, updated_at);
CREATE INDEX IF NOT EXISTS folders_owner_parent_idx        ON folders(owner_id, parent_id);
CREATE INDEX IF NOT EXISTS personas_owner_active_idx       ON personas(owner_id, is_active);
CREATE INDEX IF NOT EXISTS feedback_owner_idx              ON feedback(owner_id);

PRAGMA user_version = 1;
";
