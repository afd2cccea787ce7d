use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
// rand_core 0.6 is what password-hash/argon2 depends on; must match that version.
use rand_core::OsRng;
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use std::{path::Path, str::FromStr};

use crate::blog::{BlogDraft, BlogPost, BlogRow, BlogUpdate};

/// A user as needed by the API layer. The password hash never leaves this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub name: Option<String>,
}

const SELECT_BLOGS: &str = "SELECT b.id, b.title, b.author, b.url, b.likes, b.important, b.version, \
            b.user_id, u.username AS owner_username, u.name AS owner_name \
     FROM blogs b LEFT JOIN users u ON u.id = b.user_id";

pub async fn init_pool(db_path: &Path) -> Result<SqlitePool> {
    let url = format!("sqlite:{}", db_path.display());
    let opts = SqliteConnectOptions::from_str(&url)
        .context("Invalid DB path")?
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(opts)
        .await
        .context("Failed to open SQLite database")?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database. A single connection keeps every query
/// on the same database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:").context("Invalid DB url")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .context("Failed to open in-memory SQLite database")?;

    init_schema(&pool).await?;

    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            username      TEXT    NOT NULL UNIQUE,
            name          TEXT,
            password_hash TEXT    NOT NULL,
            created_at    TEXT    NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create users table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS blogs (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            title     TEXT    NOT NULL,
            author    TEXT    NOT NULL,
            url       TEXT    NOT NULL,
            likes     INTEGER NOT NULL DEFAULT 0 CHECK (likes >= 0),
            important INTEGER NOT NULL DEFAULT 0,
            version   INTEGER NOT NULL DEFAULT 0,
            user_id   INTEGER REFERENCES users(id) ON DELETE SET NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create blogs table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_blogs_user ON blogs(user_id)")
        .execute(pool)
        .await
        .context("Failed to create blogs index")?;

    Ok(())
}

fn blog_from_row(row: &SqliteRow) -> BlogPost {
    BlogRow {
        id: row.get("id"),
        title: row.get("title"),
        author: row.get("author"),
        url: row.get("url"),
        likes: row.get("likes"),
        important: row.get("important"),
        version: row.get("version"),
        owner_id: row.get("user_id"),
        owner_username: row.get("owner_username"),
        owner_name: row.get("owner_name"),
    }
    .into()
}

pub async fn list_blogs(pool: &SqlitePool) -> Result<Vec<BlogPost>> {
    let rows = sqlx::query(&format!("{SELECT_BLOGS} ORDER BY b.id ASC"))
        .fetch_all(pool)
        .await
        .context("Failed to list blogs")?;
    Ok(rows.iter().map(blog_from_row).collect())
}

pub async fn find_blog(pool: &SqlitePool, id: i64) -> Result<Option<BlogPost>> {
    let row = sqlx::query(&format!("{SELECT_BLOGS} WHERE b.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to load blog")?;
    Ok(row.as_ref().map(blog_from_row))
}

/// Return the owner id of a blog: `None` if the blog does not exist,
/// `Some(None)` if it exists without an owner.
pub async fn blog_owner(pool: &SqlitePool, id: i64) -> Result<Option<Option<i64>>> {
    let row = sqlx::query("SELECT user_id FROM blogs WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to load blog owner")?;
    Ok(row.map(|r| r.get::<Option<i64>, _>("user_id")))
}

pub async fn insert_blog(pool: &SqlitePool, draft: &BlogDraft, owner_id: i64) -> Result<BlogPost> {
    let id = sqlx::query(
        "INSERT INTO blogs (title, author, url, likes, user_id) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&draft.title)
    .bind(&draft.author)
    .bind(&draft.url)
    .bind(i64::from(draft.likes))
    .bind(owner_id)
    .execute(pool)
    .await
    .context("Failed to insert blog")?
    .last_insert_rowid();

    find_blog(pool, id)
        .await?
        .ok_or_else(|| anyhow!("Blog {id} vanished after insert"))
}

/// Replace every mutable field of a blog and bump its version.
/// Returns `None` if no blog has this id. The owner is never changed.
pub async fn replace_blog(
    pool: &SqlitePool,
    id: i64,
    update: &BlogUpdate,
) -> Result<Option<BlogPost>> {
    let affected = sqlx::query(
        "UPDATE blogs SET title = ?, author = ?, url = ?, likes = ?, important = ?, \
         version = version + 1 WHERE id = ?",
    )
    .bind(&update.title)
    .bind(&update.author)
    .bind(&update.url)
    .bind(i64::from(update.likes))
    .bind(update.important)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to update blog")?
    .rows_affected();

    if affected == 0 {
        return Ok(None);
    }
    find_blog(pool, id).await
}

/// Returns `false` if no blog had this id.
pub async fn delete_blog(pool: &SqlitePool, id: i64) -> Result<bool> {
    let affected = sqlx::query("DELETE FROM blogs WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete blog")?
        .rows_affected();
    Ok(affected > 0)
}

/// Hash a password with argon2id and return the PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// Add a user to the database. Returns an error if the username already exists.
pub async fn add_user(
    pool: &SqlitePool,
    username: &str,
    name: Option<&str>,
    password: &str,
) -> Result<UserRecord> {
    let hash = hash_password(password)?;
    let id = sqlx::query("INSERT INTO users (username, name, password_hash) VALUES (?, ?, ?)")
        .bind(username)
        .bind(name)
        .bind(&hash)
        .execute(pool)
        .await
        .context("Failed to insert user (username may already exist)")?
        .last_insert_rowid();

    Ok(UserRecord {
        id,
        username: username.to_string(),
        name: name.map(str::to_string),
    })
}

/// Verify a username/password pair against the database.
/// Returns `None` on any error or if credentials are wrong.
pub async fn verify_user(pool: &SqlitePool, username: &str, password: &str) -> Option<UserRecord> {
    let row = sqlx::query("SELECT id, username, name, password_hash FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await;

    let row = match row {
        Ok(Some(r)) => r,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!("User lookup failed: {}", e);
            return None;
        }
    };

    let hash_str: String = row.get("password_hash");
    let parsed = PasswordHash::new(&hash_str).ok()?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .ok()?;

    Some(UserRecord {
        id: row.get("id"),
        username: row.get("username"),
        name: row.get("name"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn user_round_trip_through_password_check() {
        let pool = init_memory_pool().await.unwrap();
        let created = add_user(&pool, "mluukkai", Some("Matti"), "salainen").await.unwrap();

        let verified = verify_user(&pool, "mluukkai", "salainen").await.unwrap();
        assert_eq!(verified, created);
        assert!(verify_user(&pool, "mluukkai", "wrong").await.is_none());
        assert!(verify_user(&pool, "nobody", "salainen").await.is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let pool = init_memory_pool().await.unwrap();
        add_user(&pool, "root", None, "pw").await.unwrap();
        assert!(add_user(&pool, "root", None, "other").await.is_err());
    }

    #[tokio::test]
    async fn insert_then_replace_keeps_owner() {
        let pool = init_memory_pool().await.unwrap();
        let user = add_user(&pool, "root", None, "pw").await.unwrap();

        let created = insert_blog(&pool, &BlogDraft::new("T", "A", "U"), user.id)
            .await
            .unwrap();
        assert_eq!(created.likes, 0);
        assert_eq!(created.owner.as_ref().unwrap().username, "root");

        let id: i64 = created.id.parse().unwrap();
        let update = BlogUpdate {
            title: "T2".into(),
            author: "A".into(),
            url: "U".into(),
            likes: 5,
            important: true,
        };
        let replaced = replace_blog(&pool, id, &update).await.unwrap().unwrap();
        assert_eq!(replaced.title, "T2");
        assert_eq!(replaced.likes, 5);
        assert!(replaced.important);
        assert_eq!(replaced.owner, created.owner);

        let version: i64 = sqlx::query("SELECT version FROM blogs WHERE id = ?")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("version");
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn missing_ids_are_reported() {
        let pool = init_memory_pool().await.unwrap();
        let update = BlogUpdate {
            title: "T".into(),
            author: "A".into(),
            url: "U".into(),
            likes: 0,
            important: false,
        };
        assert!(replace_blog(&pool, 99, &update).await.unwrap().is_none());
        assert!(!delete_blog(&pool, 99).await.unwrap());
        assert!(blog_owner(&pool, 99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_blog_from_listing() {
        let pool = init_memory_pool().await.unwrap();
        let user = add_user(&pool, "root", None, "pw").await.unwrap();
        let a = insert_blog(&pool, &BlogDraft::new("a", "x", "u"), user.id).await.unwrap();
        insert_blog(&pool, &BlogDraft::new("b", "y", "v"), user.id).await.unwrap();

        assert!(delete_blog(&pool, a.id.parse().unwrap()).await.unwrap());
        let remaining = list_blogs(&pool).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title, "b");
    }
}
