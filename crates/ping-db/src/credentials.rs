use anyhow::Result;
use rusqlite::Connection;

use crate::Database;
use crate::queries::OptionalExt;

/// Database row for a sign-in credential. The password is an Argon2 PHC
/// string; hashing happens in the identity layer.
pub struct CredentialRow {
    pub user_id: String,
    pub email: String,
    pub password: String,
    pub created_at: String,
}

impl Database {
    pub fn create_credential(&self, user_id: &str, email: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO credentials (user_id, email, password) VALUES (?1, ?2, ?3)",
                (user_id, email, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_credential_by_email(&self, email: &str) -> Result<Option<CredentialRow>> {
        self.with_conn(|conn| query_credential(conn, email))
    }

    pub fn delete_credential(&self, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM credentials WHERE user_id = ?1", [user_id])?;
            Ok(())
        })
    }
}

fn query_credential(conn: &Connection, email: &str) -> Result<Option<CredentialRow>> {
    let mut stmt = conn
        .prepare("SELECT user_id, email, password, created_at FROM credentials WHERE email = ?1")?;

    let row = stmt
        .query_row([email], |row| {
            Ok(CredentialRow {
                user_id: row.get(0)?,
                email: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}
