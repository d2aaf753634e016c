use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    user_id      TEXT PRIMARY KEY NOT NULL,   -- auth user UUID
    full_name    TEXT NOT NULL,
    user_type    TEXT NOT NULL,               -- admin | farmer | buyer
    avatar_url   TEXT,
    phone_number TEXT,
    updated_at   TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
