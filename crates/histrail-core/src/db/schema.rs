//! SQLite schema for the history record store.
//!
//! - `historical_records` holds the live, append-only snapshot log
//! - `archived_historical_records` holds rows moved out by retention jobs
//! - `store_meta` records the applied schema version

/// Migration v1: live record table plus store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS historical_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL CHECK (length(trim(entity_type)) > 0),
    object_id TEXT NOT NULL,
    created_at_us INTEGER NOT NULL,
    change_kind TEXT NOT NULL CHECK (change_kind IN ('create', 'update', 'delete')),
    actor_name TEXT,
    actor_id INTEGER,
    changed_fields_json TEXT,
    data_json TEXT NOT NULL DEFAULT '{}',
    extra_data_json TEXT NOT NULL DEFAULT '{}',
    related_record_id INTEGER REFERENCES historical_records(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 0);
";

/// Migration v2: instance-history and retention-scan indexes.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_historical_records_entity_object_created
    ON historical_records(entity_type, object_id, created_at_us);

CREATE INDEX IF NOT EXISTS idx_historical_records_created
    ON historical_records(created_at_us);

CREATE INDEX IF NOT EXISTS idx_historical_records_related
    ON historical_records(related_record_id);
";

/// Migration v3: archive table mirroring the live columns.
///
/// Archived rows keep their original id and their `related_record_id`
/// value, but without a foreign key: the referenced row may stay live,
/// be archived, or be gone.
pub const MIGRATION_V3_SQL: &str = r"
CREATE TABLE IF NOT EXISTS archived_historical_records (
    id INTEGER PRIMARY KEY,
    entity_type TEXT NOT NULL,
    object_id TEXT NOT NULL,
    created_at_us INTEGER NOT NULL,
    change_kind TEXT NOT NULL CHECK (change_kind IN ('create', 'update', 'delete')),
    actor_name TEXT,
    actor_id INTEGER,
    changed_fields_json TEXT,
    data_json TEXT NOT NULL DEFAULT '{}',
    extra_data_json TEXT NOT NULL DEFAULT '{}',
    related_record_id INTEGER
);

CREATE INDEX IF NOT EXISTS idx_archived_records_entity_object_created
    ON archived_historical_records(entity_type, object_id, created_at_us);

CREATE INDEX IF NOT EXISTS idx_archived_records_created
    ON archived_historical_records(created_at_us);
";

/// Indexes expected to exist after all migrations have run.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_historical_records_entity_object_created",
    "idx_historical_records_created",
    "idx_historical_records_related",
    "idx_archived_records_entity_object_created",
    "idx_archived_records_created",
];

/// Column list shared by both record tables, in select order.
pub const RECORD_COLUMNS: &str = "id, entity_type, object_id, created_at_us, change_kind, \
     actor_name, actor_id, changed_fields_json, data_json, extra_data_json, related_record_id";
