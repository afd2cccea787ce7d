use serde::{Deserialize, Serialize};

/// The user a blog post belongs to, as embedded in the client-facing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Client-facing representation of a persisted blog record.
///
/// `id` is always assigned by the backend. The row's `version` counter never
/// appears here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogPost {
    pub id: String,
    pub title: String,
    pub author: String,
    pub url: String,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub important: bool,
    #[serde(default, alias = "user")]
    pub owner: Option<Owner>,
}

/// A new post as submitted by the user, before the backend assigns an id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlogDraft {
    pub title: String,
    pub author: String,
    pub url: String,
    #[serde(default)]
    pub likes: u32,
}

impl BlogDraft {
    pub fn new(title: impl Into<String>, author: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            url: url.into(),
            likes: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        fields_complete(&self.title, &self.author, &self.url)
    }
}

/// Full-record replacement body accepted by `PUT /api/blogs/{id}`.
///
/// Unknown fields (`id`, `owner`) are ignored so a client can send back the
/// whole record it holds.
#[derive(Debug, Clone, Deserialize)]
pub struct BlogUpdate {
    pub title: String,
    pub author: String,
    pub url: String,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub important: bool,
}

impl BlogUpdate {
    pub fn is_complete(&self) -> bool {
        fields_complete(&self.title, &self.author, &self.url)
    }
}

/// A blog row as stored, joined with its owner's username and name.
#[derive(Debug, Clone)]
pub struct BlogRow {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub url: String,
    pub likes: i64,
    pub important: bool,
    /// Bumped on every replacement; internal only, dropped by the conversion to [`BlogPost`].
    pub version: i64,
    pub owner_id: Option<i64>,
    pub owner_username: Option<String>,
    pub owner_name: Option<String>,
}

impl From<BlogRow> for BlogPost {
    fn from(row: BlogRow) -> Self {
        let owner = match (row.owner_id, row.owner_username) {
            (Some(id), Some(username)) => Some(Owner {
                id: id.to_string(),
                username,
                name: row.owner_name,
            }),
            _ => None,
        };

        BlogPost {
            id: row.id.to_string(),
            title: row.title,
            author: row.author,
            url: row.url,
            likes: u32::try_from(row.likes).unwrap_or_default(),
            important: row.important,
            owner,
        }
    }
}

/// Whitespace-only values count as missing.
pub fn fields_complete(title: &str, author: &str, url: &str) -> bool {
    [title, author, url].iter().all(|s| !s.trim().is_empty())
}
