//! Application state and the operations the UI drives.
//!
//! The controller owns the in-memory blog list and the current session, and
//! publishes every change as a [`ViewState`] snapshot on a watch channel.
//! Operations take `&self`, so a UI can run several at once from spawned
//! tasks; nothing de-duplicates or cancels them, and two overlapping updates
//! of the same blog land in whatever order the backend answers.
//!
//! Every remote failure ends as a transient notification. Local state only
//! changes after the backend confirms, and always takes the backend's record.

use std::sync::Arc;
use tokio::sync::watch;

use crate::{
    blog::{BlogDraft, BlogPost},
    client::{BlogApi, RequestContext},
    notification::Notifier,
    session::{Credentials, Session, SessionStore},
};

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this blog?";
pub const INCOMPLETE_FIELDS: &str = "Please complete all fields";

/// Asks the user a yes/no question before a destructive action.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F: Fn(&str) -> bool> Confirm for F {
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Immutable snapshot of everything the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    /// Blogs in the order they arrived; see [`ViewState::sorted_blogs`].
    pub blogs: Vec<BlogPost>,
    pub user: Option<Session>,
    /// Login form inputs.
    pub username: String,
    pub password: String,
}

impl ViewState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Blogs in display order, most liked first.
    pub fn sorted_blogs(&self) -> Vec<BlogPost> {
        let mut blogs = self.blogs.clone();
        sort_by_likes(&mut blogs);
        blogs
    }
}

/// Descending by likes. Stable, so ties keep arrival order.
pub fn sort_by_likes(blogs: &mut [BlogPost]) {
    blogs.sort_by(|a, b| b.likes.cmp(&a.likes));
}

pub struct AppController {
    api: Arc<dyn BlogApi>,
    sessions: SessionStore,
    notifier: Notifier,
    state: watch::Sender<ViewState>,
}

impl AppController {
    pub fn new(api: Arc<dyn BlogApi>, sessions: SessionStore) -> Self {
        Self::with_notifier(api, sessions, Notifier::default())
    }

    pub fn with_notifier(api: Arc<dyn BlogApi>, sessions: SessionStore, notifier: Notifier) -> Self {
        let (state, _) = watch::channel(ViewState::default());
        Self {
            api,
            sessions,
            notifier,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ViewState {
        self.state.borrow().clone()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Request context for the next remote call, carrying the current
    /// session's token if there is one.
    pub fn context(&self) -> RequestContext {
        let mut ctx = RequestContext::anonymous();
        if let Some(session) = &self.state.borrow().user {
            ctx.set_token(session.token.clone());
        }
        ctx
    }

    pub fn set_username(&self, username: impl Into<String>) {
        let username = username.into();
        self.state.send_modify(|s| s.username = username);
    }

    pub fn set_password(&self, password: impl Into<String>) {
        let password = password.into();
        self.state.send_modify(|s| s.password = password);
    }

    // ── Bootstrap ─────────────────────────────────────────────────────────────

    /// Load the blog list and restore a saved session. The two run
    /// concurrently and either may finish first.
    pub async fn bootstrap(&self) {
        let fetch = async {
            match self.api.get_all(&RequestContext::anonymous()).await {
                Ok(blogs) => {
                    tracing::debug!(count = blogs.len(), "Loaded blogs");
                    self.state.send_modify(|s| s.blogs = blogs);
                }
                Err(e) => {
                    tracing::warn!("Failed to load blogs: {}", e);
                    self.notifier.error(format!("Failed to load blogs: {e}"));
                }
            }
        };
        let restore = async { self.restore_session() };

        tokio::join!(fetch, restore);
    }

    fn restore_session(&self) {
        match self.sessions.load() {
            Ok(Some(session)) => {
                tracing::info!(username = %session.username, "Restored saved session");
                self.state.send_modify(|s| s.user = Some(session));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Could not read saved session: {:#}", e),
        }
    }

    // ── Session ───────────────────────────────────────────────────────────────

    /// Log in with the current username/password inputs. The inputs are
    /// cleared only when login succeeds.
    pub async fn login(&self) {
        let credentials = {
            let s = self.state.borrow();
            Credentials {
                username: s.username.clone(),
                password: s.password.clone(),
            }
        };

        match self.api.login(&credentials).await {
            Ok(session) => {
                if let Err(e) = self.sessions.save(&session) {
                    tracing::warn!("Could not persist session: {:#}", e);
                }
                tracing::info!(username = %session.username, "Logged in");
                self.state.send_modify(|s| {
                    s.user = Some(session);
                    s.username.clear();
                    s.password.clear();
                });
                self.notifier.info("signed in correctly");
            }
            Err(e) => {
                tracing::info!(username = %credentials.username, "Login failed: {}", e);
                self.notifier.error(format!("Wrong credentials: {e}"));
            }
        }
    }

    /// Revoke the token on the backend, then forget the user, the persisted
    /// session and with them the token. Local state is cleared even if the
    /// backend call fails.
    pub async fn logout(&self) {
        let Some(session) = self.state.borrow().user.clone() else {
            return;
        };

        let ctx = RequestContext::with_token(session.token.clone());
        if let Err(e) = self.api.logout(&ctx).await {
            tracing::warn!(username = %session.username, "Could not revoke token: {}", e);
        }

        self.state.send_modify(|s| s.user = None);
        if let Err(e) = self.sessions.clear() {
            tracing::warn!("Could not clear saved session: {:#}", e);
        }
        tracing::info!(username = %session.username, "Logged out");
    }

    // ── Blogs ─────────────────────────────────────────────────────────────────

    /// Returns `true` if the backend accepted the post.
    pub async fn create_post(&self, draft: BlogDraft) -> bool {
        if !draft.is_complete() {
            self.notifier.error(INCOMPLETE_FIELDS);
            return false;
        }

        match self.api.create(&self.context(), &draft).await {
            Ok(blog) => {
                tracing::info!(id = %blog.id, "Blog added");
                self.state.send_modify(|s| s.blogs.push(blog));
                self.notifier.info("blog added successfully!");
                true
            }
            Err(e) => {
                self.notifier.error(format!("blog failed to add: {e}"));
                false
            }
        }
    }

    /// Delete after the user confirms. Declining makes no remote call.
    pub async fn delete_post(&self, id: &str, confirm: impl Confirm) -> bool {
        if !confirm.confirm(DELETE_PROMPT) {
            tracing::debug!(id, "Delete cancelled");
            return false;
        }

        match self.api.blog_delete(&self.context(), id).await {
            Ok(()) => {
                self.state.send_modify(|s| s.blogs.retain(|b| b.id != id));
                self.notifier.info("Blog deleted successfully!");
                true
            }
            Err(e) => {
                self.notifier.error(format!("Error deleting the blog: {e}"));
                false
            }
        }
    }

    pub async fn like(&self, id: &str) {
        let Some(mut record) = self.find(id) else {
            tracing::warn!("Blog with id {} not found", id);
            return;
        };
        record.likes = record.likes.saturating_add(1);

        match self.api.update(&self.context(), id, &record).await {
            Ok(saved) => self.replace(id, saved),
            Err(e) => {
                tracing::warn!(id, "Error updating likes: {}", e);
                self.notifier.error(format!("Error updating likes: {e}"));
            }
        }
    }

    pub async fn toggle_importance(&self, id: &str) {
        let Some(mut record) = self.find(id) else {
            tracing::warn!("Blog with id {} not found", id);
            return;
        };
        record.important = !record.important;

        match self.api.update(&self.context(), id, &record).await {
            Ok(saved) => self.replace(id, saved),
            Err(e) => self.notifier.error(format!("Error updating blog: {e}")),
        }
    }

    fn find(&self, id: &str) -> Option<BlogPost> {
        self.state.borrow().blogs.iter().find(|b| b.id == id).cloned()
    }

    /// Swap in the backend's copy. A blog deleted meanwhile stays deleted.
    fn replace(&self, id: &str, saved: BlogPost) {
        self.state.send_modify(|s| {
            if let Some(slot) = s.blogs.iter_mut().find(|b| b.id == id) {
                *slot = saved;
            }
        });
    }
}
