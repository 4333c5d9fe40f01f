/// Archive schema. `id` is the platform message id and doubles as the upsert key.
pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        channel_id TEXT NOT NULL,
        guild_id TEXT,
        author_id TEXT NOT NULL,
        author_name TEXT NOT NULL,
        author_display_name TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        timestamp_epoch INTEGER NOT NULL,
        attachment_count INTEGER NOT NULL DEFAULT 0,
        reaction_count INTEGER NOT NULL DEFAULT 0,
        edited_timestamp TEXT
    );

    -- Watermark lookups
    CREATE INDEX IF NOT EXISTS idx_messages_channel_epoch ON messages (channel_id, timestamp_epoch);
    -- Time-window filters from generated queries
    CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages (timestamp);
";
