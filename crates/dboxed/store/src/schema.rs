//! Database schema
//!
//! Applied at startup; every statement is idempotent.

/// Bookkeeping columns shared by every reconciled table
const META_COLUMNS: &str = r#"
    created_at TEXT NOT NULL,
    deleted_at TEXT,
    finalizers TEXT NOT NULL DEFAULT '[]',
    change_seq INTEGER NOT NULL,
    reconcile_status TEXT NOT NULL DEFAULT 'Pending',
    reconcile_status_details TEXT NOT NULL DEFAULT ''
"#;

/// Reconciled tables; each gets a change_seq index and a live-name index.
const RECONCILED_TABLES: [&str; 7] = [
    "networks",
    "boxes",
    "volumes",
    "load_balancers",
    "ingress_proxies",
    "dboxed_specs",
    "git_specs",
];

pub(crate) fn statements() -> Vec<String> {
    let mut statements = vec![
        r#"
        CREATE TABLE IF NOT EXISTS change_tracking (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            seq INTEGER NOT NULL
        );
        "#
        .to_string(),
        "INSERT OR IGNORE INTO change_tracking (id, seq) VALUES (1, 0);".to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS workspaces (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );
        "#
        .to_string(),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS networks (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id),
                name TEXT NOT NULL,
                {META_COLUMNS}
            );
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS boxes (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id),
                name TEXT NOT NULL,
                box_type TEXT NOT NULL,
                network_id TEXT REFERENCES networks(id),
                {META_COLUMNS}
            );
            "#
        ),
        "CREATE INDEX IF NOT EXISTS boxes_network_id ON boxes(network_id);".to_string(),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS volumes (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id),
                name TEXT NOT NULL,
                fs_size INTEGER NOT NULL,
                fs_type TEXT NOT NULL,
                {META_COLUMNS}
            );
            "#
        ),
        r#"
        CREATE TABLE IF NOT EXISTS box_volume_attachments (
            box_id TEXT NOT NULL REFERENCES boxes(id) ON DELETE CASCADE,
            volume_id TEXT NOT NULL REFERENCES volumes(id),
            root_uid INTEGER NOT NULL,
            root_gid INTEGER NOT NULL,
            root_mode TEXT NOT NULL,
            PRIMARY KEY (box_id, volume_id)
        );
        "#
        .to_string(),
        "CREATE INDEX IF NOT EXISTS box_volume_attachments_volume_id ON box_volume_attachments(volume_id);"
            .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS box_compose_projects (
            box_id TEXT NOT NULL REFERENCES boxes(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            content TEXT NOT NULL,
            PRIMARY KEY (box_id, name)
        );
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS box_port_forwards (
            box_id TEXT NOT NULL REFERENCES boxes(id) ON DELETE CASCADE,
            description TEXT NOT NULL,
            protocol TEXT NOT NULL,
            host_port_first INTEGER NOT NULL,
            host_port_last INTEGER NOT NULL,
            sandbox_port INTEGER NOT NULL,
            PRIMARY KEY (box_id, description)
        );
        "#
        .to_string(),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS dboxed_specs (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id),
                name TEXT NOT NULL,
                git_url TEXT NOT NULL,
                git_ref TEXT NOT NULL,
                spec_file TEXT NOT NULL,
                {META_COLUMNS}
            );
            "#
        ),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS git_specs (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id),
                repository_url TEXT NOT NULL,
                git_ref TEXT NOT NULL,
                spec_file TEXT NOT NULL,
                {META_COLUMNS}
            );
            "#
        ),
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS git_specs_repository
            ON git_specs(workspace_id, repository_url, spec_file)
            WHERE deleted_at IS NULL;
        "#
        .to_string(),
        r#"
        CREATE TABLE IF NOT EXISTS spec_mappings (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            source_kind TEXT NOT NULL,
            source_key TEXT NOT NULL,
            object_type TEXT NOT NULL,
            name TEXT NOT NULL,
            object_id TEXT NOT NULL,
            recreate_key TEXT NOT NULL,
            fragment TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (source_kind, source_key, object_type, name)
        );
        "#
        .to_string(),
    ];

    for (owner, members, services) in [
        ("load_balancers", "load_balancer_boxes", "load_balancer_services"),
        ("ingress_proxies", "ingress_proxy_boxes", "ingress_proxy_services"),
    ] {
        statements.push(format!(
            r#"
            CREATE TABLE IF NOT EXISTS {owner} (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id),
                name TEXT NOT NULL,
                network_id TEXT NOT NULL REFERENCES networks(id),
                replicas INTEGER NOT NULL,
                http_port INTEGER NOT NULL,
                https_port INTEGER NOT NULL,
                {META_COLUMNS}
            );
            "#
        ));
        statements.push(format!(
            r#"
            CREATE TABLE IF NOT EXISTS {members} (
                owner_id TEXT NOT NULL REFERENCES {owner}(id),
                box_id TEXT NOT NULL REFERENCES boxes(id),
                ordinal INTEGER NOT NULL,
                PRIMARY KEY (owner_id, box_id),
                UNIQUE (owner_id, ordinal)
            );
            "#
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {members}_box_id ON {members}(box_id);"
        ));
        statements.push(format!(
            r#"
            CREATE TABLE IF NOT EXISTS {services} (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL REFERENCES {owner}(id) ON DELETE CASCADE,
                box_id TEXT REFERENCES boxes(id) ON DELETE CASCADE,
                description TEXT NOT NULL,
                hostname TEXT NOT NULL,
                path_prefix TEXT NOT NULL,
                port INTEGER NOT NULL,
                UNIQUE (owner_id, description)
            );
            "#
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {services}_box_id ON {services}(box_id);"
        ));
    }

    for table in RECONCILED_TABLES {
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {table}_change_seq ON {table}(change_seq);"
        ));
        if table != "git_specs" {
            statements.push(format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {table}_live_name ON {table}(workspace_id, name) WHERE deleted_at IS NULL;"
            ));
        }
    }

    statements
}
