/// Static, idempotent schema applied to every shard file on creation
/// (§4.8). Statements are separated by `;` and executed via
/// `Connection::execute_batch`, which tolerates re-running `CREATE ... IF
/// NOT EXISTS` statements.
pub const SHARD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS personas (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    personality TEXT NOT NULL,
    _personality_encrypted INTEGER NOT NULL DEFAULT 0,
    memory_config TEXT NOT NULL,
    privacy_settings TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    version TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memory_entities (
    id TEXT PRIMARY KEY,
    persona_id TEXT NOT NULL,
    memory_type TEXT NOT NULL,
    content TEXT NOT NULL,
    _content_encrypted INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL,
    importance INTEGER NOT NULL,
    memory_tier TEXT NOT NULL,
    embedding TEXT,
    embedding_model TEXT,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    persona_id TEXT NOT NULL,
    title TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_personas_id ON personas(id);
CREATE INDEX IF NOT EXISTS idx_memory_entities_id ON memory_entities(id);
CREATE INDEX IF NOT EXISTS idx_memory_entities_persona_id ON memory_entities(persona_id);
CREATE INDEX IF NOT EXISTS idx_memory_entities_tier ON memory_entities(memory_tier);
"#;

/// Schema for the shard-independent audit log file (§4.9).
pub const AUDIT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_log (
    id TEXT PRIMARY KEY,
    ts TEXT NOT NULL,
    type TEXT NOT NULL,
    severity TEXT NOT NULL,
    description TEXT NOT NULL,
    details TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_log_ts ON audit_log(ts);
"#;
