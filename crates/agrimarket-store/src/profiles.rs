//! CRUD operations for [`Profile`] records.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use agrimarket_shared::{AppRole, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::Profile;

impl Database {
    /// Insert or replace the profile of `profile.user_id`.
    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO profiles (user_id, full_name, user_type, avatar_url, phone_number, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                full_name    = excluded.full_name,
                user_type    = excluded.user_type,
                avatar_url   = excluded.avatar_url,
                phone_number = excluded.phone_number,
                updated_at   = excluded.updated_at",
            params![
                profile.user_id.0.to_string(),
                profile.full_name,
                profile.user_type.as_str(),
                profile.avatar_url,
                profile.phone_number,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a profile, `None` if the user never created one.
    pub fn get_profile(&self, user_id: UserId) -> Result<Option<Profile>> {
        let profile = self
            .conn()
            .query_row(
                "SELECT user_id, full_name, user_type, avatar_url, phone_number
                 FROM profiles WHERE user_id = ?1",
                params![user_id.0.to_string()],
                row_to_profile,
            )
            .optional()?;
        Ok(profile)
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    let id_str: String = row.get(0)?;
    let full_name: String = row.get(1)?;
    let user_type: String = row.get(2)?;

    let user_id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    // Unknown roles are treated as buyers, the marketplace's default account type.
    let user_type = AppRole::from_str_opt(&user_type).unwrap_or_else(|| {
        tracing::warn!(user = %id_str, role = %user_type, "unknown profile role");
        AppRole::Buyer
    });

    Ok(Profile {
        user_id: UserId(user_id),
        full_name,
        user_type,
        avatar_url: row.get(3)?,
        phone_number: row.get(4)?,
    })
}
