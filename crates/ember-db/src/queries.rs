use crate::Database;
use crate::models::{MessageRow, PhotoRow, ProfileRow, UserRow};
use anyhow::Result;
use rusqlite::{Row, params};

use ember_types::models::SwipeAction;

/// Result of recording a swipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeOutcome {
    /// The target user does not exist; nothing was written.
    TargetMissing,
    /// The action was upserted. `matched` is true only when this action
    /// completed a NEW mutual match — a repeated like reports false so
    /// callers never duplicate the match notification.
    Recorded { matched: bool },
}

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        password_hash: &str,
        name: &str,
        age: u32,
        bio: Option<&str>,
        is_admin: bool,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, password, name, age, bio, is_admin)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, email, password_hash, name, age, bio, is_admin],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{USER_SELECT} WHERE email = ?1"),
                [email],
                user_from_row,
            )
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{USER_SELECT} WHERE id = ?1"), [id], user_from_row)
                .optional()
        })
    }

    pub fn set_online(&self, id: &str, online: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?2 WHERE id = ?1",
                params![id, online],
            )?;
            Ok(())
        })
    }

    pub fn update_bio(&self, id: &str, bio: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET bio = ?2 WHERE id = ?1", params![id, bio])?;
            Ok(())
        })
    }

    // -- Profiles --

    /// Partial upsert: None fields keep their stored value.
    pub fn upsert_profile(
        &self,
        user_id: &str,
        gender: Option<&str>,
        preferences_json: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, gender, preferences)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                     gender      = COALESCE(excluded.gender, gender),
                     preferences = COALESCE(excluded.preferences, preferences),
                     updated_at  = datetime('now')",
                params![user_id, gender, preferences_json],
            )?;
            Ok(())
        })
    }

    /// Batch-fetch profiles for a set of user ids (avoids N+1 on listings).
    pub fn profiles_for_users(&self, user_ids: &[String]) -> Result<Vec<ProfileRow>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=user_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT user_id, gender, preferences FROM profiles WHERE user_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let bind: Vec<&dyn rusqlite::types::ToSql> = user_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(bind.as_slice(), |row| {
                    Ok(ProfileRow {
                        user_id: row.get(0)?,
                        gender: row.get(1)?,
                        preferences: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id, gender, preferences FROM profiles WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(ProfileRow {
                        user_id: row.get(0)?,
                        gender: row.get(1)?,
                        preferences: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Photos --

    /// Insert a photo; the user's first photo becomes primary.
    pub fn add_photo(&self, user_id: &str, url: &str) -> Result<PhotoRow> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let has_primary: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM photos WHERE user_id = ?1 AND is_primary = 1)",
                [user_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO photos (user_id, url, is_primary) VALUES (?1, ?2, ?3)",
                params![user_id, url, !has_primary],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(PhotoRow {
                id,
                user_id: user_id.to_string(),
                url: url.to_string(),
                is_primary: !has_primary,
            })
        })
    }

    /// Photos for one user, primary first.
    pub fn photos_for_user(&self, user_id: &str) -> Result<Vec<PhotoRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, url, is_primary FROM photos
                 WHERE user_id = ?1
                 ORDER BY is_primary DESC, id",
            )?;
            let rows = stmt
                .query_map([user_id], photo_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch photos for a set of user ids (avoids N+1 on listings).
    pub fn photos_for_users(&self, user_ids: &[String]) -> Result<Vec<PhotoRow>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=user_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, user_id, url, is_primary FROM photos
                 WHERE user_id IN ({})
                 ORDER BY is_primary DESC, id",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let bind: Vec<&dyn rusqlite::types::ToSql> = user_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(bind.as_slice(), photo_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_photo(&self, photo_id: i64) -> Result<Option<PhotoRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_id, url, is_primary FROM photos WHERE id = ?1",
                [photo_id],
                photo_from_row,
            )
            .optional()
        })
    }

    pub fn delete_photo(&self, photo_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM photos WHERE id = ?1", [photo_id])?;
            Ok(())
        })
    }

    /// Returns false when the photo does not belong to the user.
    pub fn set_primary_photo(&self, user_id: &str, photo_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "UPDATE photos SET is_primary = 0 WHERE user_id = ?1",
                [user_id],
            )?;
            let changed = tx.execute(
                "UPDATE photos SET is_primary = 1 WHERE id = ?1 AND user_id = ?2",
                params![photo_id, user_id],
            )?;
            tx.commit()?;
            Ok(changed > 0)
        })
    }

    // -- Match ledger --

    /// Upsert a swipe and, for a like, check mutuality — all in one
    /// transaction under the connection lock. Two interleaved likes can
    /// never both observe the pre-update state.
    pub fn record_swipe(
        &self,
        user_id: &str,
        target_user_id: &str,
        action: SwipeAction,
    ) -> Result<SwipeOutcome> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let target_exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                [target_user_id],
                |row| row.get(0),
            )?;
            if !target_exists {
                return Ok(SwipeOutcome::TargetMissing);
            }

            let prior: Option<String> = tx
                .query_row(
                    "SELECT action FROM matches WHERE user_id = ?1 AND target_user_id = ?2",
                    [user_id, target_user_id],
                    |row| row.get(0),
                )
                .optional()?;

            tx.execute(
                "INSERT INTO matches (user_id, target_user_id, action)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, target_user_id) DO UPDATE SET
                     action = excluded.action",
                params![user_id, target_user_id, action.as_str()],
            )?;

            // A repeated like is not a new match.
            let matched = if action == SwipeAction::Like && prior.as_deref() != Some("like") {
                tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM matches
                     WHERE user_id = ?1 AND target_user_id = ?2 AND action = 'like')",
                    [target_user_id, user_id],
                    |row| row.get(0),
                )?
            } else {
                false
            };

            tx.commit()?;
            Ok(SwipeOutcome::Recorded { matched })
        })
    }

    /// True iff both directed likes exist. Pure read.
    pub fn is_mutual_match(&self, a: &str, b: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let mutual = conn.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM matches m1
                     JOIN matches m2 ON m2.user_id = m1.target_user_id
                                    AND m2.target_user_id = m1.user_id
                     WHERE m1.user_id = ?1 AND m1.target_user_id = ?2
                       AND m1.action = 'like' AND m2.action = 'like')",
                [a, b],
                |row| row.get(0),
            )?;
            Ok(mutual)
        })
    }

    /// All users mutually matched with `user_id`, in a stable order.
    pub fn mutual_matches(&self, user_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{USER_SELECT}
                 WHERE id IN (
                     SELECT m1.target_user_id FROM matches m1
                     JOIN matches m2 ON m1.target_user_id = m2.user_id
                                    AND m2.target_user_id = m1.user_id
                     WHERE m1.user_id = ?1
                       AND m1.action = 'like' AND m2.action = 'like')
                 ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map([user_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Discovery page: everyone except the caller, anyone the caller has
    /// already swiped on, and anyone outside the given preferences.
    /// Stable order for a fixed snapshot; bounded page size.
    pub fn candidates(
        &self,
        user_id: &str,
        gender: Option<&str>,
        age_min: u32,
        age_max: u32,
        limit: u32,
    ) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.email, u.password, u.name, u.age, u.bio,
                        u.is_admin, u.is_online, u.created_at
                 FROM users u
                 LEFT JOIN profiles p ON p.user_id = u.id
                 WHERE u.id != ?1
                   AND u.age BETWEEN ?2 AND ?3
                   AND (?4 IS NULL OR p.gender = ?4)
                   AND NOT EXISTS (
                       SELECT 1 FROM matches m
                       WHERE m.user_id = ?1 AND m.target_user_id = u.id)
                 ORDER BY u.created_at, u.id
                 LIMIT ?5",
            )?;
            let rows = stmt
                .query_map(
                    params![user_id, age_min, age_max, gender, limit],
                    user_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        conversation_id: &str,
        sender_id: &str,
        recipient_id: &str,
        body: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, recipient_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, conversation_id, sender_id, recipient_id, body, created_at],
            )?;
            Ok(())
        })
    }

    /// Full history in send order. Ties on created_at fall back to
    /// insertion order, so the sequence is deterministic per snapshot.
    pub fn messages_for_conversation(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT}
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map([conversation_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn last_message(&self, conversation_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "{MESSAGE_SELECT}
                     WHERE conversation_id = ?1
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1"
                ),
                [conversation_id],
                message_from_row,
            )
            .optional()
        })
    }

    /// Flag every message addressed to `reader_id` in the conversation as
    /// read. Idempotent; returns the number of rows that changed.
    pub fn mark_read(&self, conversation_id: &str, reader_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE conversation_id = ?1 AND recipient_id = ?2 AND is_read = 0",
                params![conversation_id, reader_id],
            )?;
            Ok(changed)
        })
    }

    pub fn unread_count(&self, conversation_id: &str, recipient_id: &str) -> Result<u32> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE conversation_id = ?1 AND recipient_id = ?2 AND is_read = 0",
                params![conversation_id, recipient_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Ids of everyone the user has exchanged at least one message with.
    pub fn conversation_partner_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT CASE WHEN sender_id = ?1 THEN recipient_id ELSE sender_id END
                 FROM messages
                 WHERE sender_id = ?1 OR recipient_id = ?1",
            )?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = datetime('now')",
                params![key, value],
            )?;
            Ok(())
        })
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
        })
    }
}

const USER_SELECT: &str = "SELECT id, email, password, name, age, bio, is_admin, is_online, created_at
     FROM users";

const MESSAGE_SELECT: &str = "SELECT id, conversation_id, sender_id, recipient_id, body, is_read, created_at
     FROM messages";

fn user_from_row(row: &Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password: row.get(2)?,
        name: row.get(3)?,
        age: row.get(4)?,
        bio: row.get(5)?,
        is_admin: row.get(6)?,
        is_online: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn photo_from_row(row: &Row) -> rusqlite::Result<PhotoRow> {
    Ok(PhotoRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        url: row.get(2)?,
        is_primary: row.get(3)?,
    })
}

fn message_from_row(row: &Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        body: row.get(4)?,
        is_read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
