//! Inline schema bootstrap. One statement per entry; all idempotent.

pub(crate) const STATEMENTS: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS events (
        id BIGSERIAL PRIMARY KEY,
        run_id TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL,
        version TEXT NOT NULL DEFAULT '',
        python_tag TEXT NOT NULL DEFAULT '',
        platform_tag TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL,
        detail TEXT NOT NULL DEFAULT '',
        metadata JSONB,
        matched_hint_ids JSONB,
        duration_ms BIGINT NOT NULL DEFAULT 0,
        timestamp TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS idx_events_name ON events (name)",
    "CREATE INDEX IF NOT EXISTS idx_events_run_id ON events (run_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events (timestamp)",
    r"CREATE TABLE IF NOT EXISTS hints (
        id TEXT PRIMARY KEY,
        pattern TEXT NOT NULL,
        recipes JSONB NOT NULL,
        note TEXT NOT NULL DEFAULT '',
        tags JSONB,
        severity TEXT NOT NULL DEFAULT '',
        applies_to JSONB,
        confidence TEXT NOT NULL DEFAULT '',
        examples JSONB,
        deleted_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    r"CREATE TABLE IF NOT EXISTS build_logs (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        version TEXT NOT NULL DEFAULT '',
        content TEXT NOT NULL,
        timestamp TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS idx_build_logs_name_version ON build_logs (name, version)",
    r"CREATE TABLE IF NOT EXISTS manifest_entries (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        version TEXT NOT NULL,
        wheel_url TEXT NOT NULL DEFAULT '',
        repair_url TEXT NOT NULL DEFAULT '',
        repair_digest TEXT NOT NULL DEFAULT '',
        runtime_url TEXT NOT NULL DEFAULT '',
        pack_urls JSONB,
        python_tag TEXT NOT NULL DEFAULT '',
        platform_tag TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (name, version)
    )",
    r"CREATE TABLE IF NOT EXISTS plans (
        id BIGSERIAL PRIMARY KEY,
        run_id TEXT NOT NULL,
        plan JSONB NOT NULL,
        dag JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    r"CREATE TABLE IF NOT EXISTS pending_inputs (
        id BIGSERIAL PRIMARY KEY,
        filename TEXT NOT NULL,
        digest TEXT NOT NULL,
        size BIGINT NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'pending',
        source_type TEXT NOT NULL DEFAULT '',
        bucket TEXT NOT NULL DEFAULT '',
        key TEXT NOT NULL DEFAULT '',
        content_type TEXT NOT NULL DEFAULT '',
        metadata JSONB,
        loaded_at TIMESTAMPTZ,
        planned_at TIMESTAMPTZ,
        processed_at TIMESTAMPTZ,
        deleted_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS idx_pending_inputs_digest ON pending_inputs (digest)",
    "CREATE INDEX IF NOT EXISTS idx_pending_inputs_status ON pending_inputs (status)",
    r"CREATE TABLE IF NOT EXISTS build_status (
        id BIGSERIAL PRIMARY KEY,
        package TEXT NOT NULL,
        version TEXT NOT NULL,
        python_tag TEXT NOT NULL DEFAULT '',
        platform_tag TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        backoff_until TIMESTAMPTZ,
        last_error TEXT NOT NULL DEFAULT '',
        recipes JSONB,
        hint_ids JSONB,
        run_id TEXT NOT NULL DEFAULT '',
        plan_id BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (package, version)
    )",
    "CREATE INDEX IF NOT EXISTS idx_build_status_leasable
        ON build_status (created_at) WHERE status IN ('pending', 'retry')",
    r"CREATE TABLE IF NOT EXISTS worker_heartbeats (
        worker_id TEXT PRIMARY KEY,
        run_id TEXT NOT NULL DEFAULT '',
        active_builds INTEGER NOT NULL DEFAULT 0,
        build_pool_size INTEGER NOT NULL DEFAULT 0,
        plan_pool_size INTEGER NOT NULL DEFAULT 0,
        interval_sec BIGINT NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    r"CREATE TABLE IF NOT EXISTS app_settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        settings JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
];
