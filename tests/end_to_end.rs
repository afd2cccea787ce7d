//! Drives the controller through the real HTTP client against a live server
//! backed by an in-memory database.

use std::sync::Arc;

use bloglist::{
    blog::BlogDraft,
    client::{BlogApi, BlogService, RequestContext},
    error::ClientError,
    controller::AppController,
    db, server,
    session::{MemoryStorage, SESSION_KEY, SessionStore, Storage},
    state::AppState,
};

async fn start_server() -> String {
    let pool = db::init_memory_pool().await.unwrap();
    db::add_user(&pool, "mluukkai", Some("Matti Luukkainen"), "salainen")
        .await
        .unwrap();
    db::add_user(&pool, "hellas", None, "salainen").await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::app(AppState::new(pool));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn controller(base_url: &str, storage: Arc<MemoryStorage>) -> AppController {
    let api = BlogService::new(base_url).unwrap();
    AppController::new(Arc::new(api), SessionStore::new(storage))
}

async fn login(c: &AppController, username: &str) {
    c.set_username(username);
    c.set_password("salainen");
    c.login().await;
    assert!(c.snapshot().is_authenticated(), "login as {username} failed");
}

#[tokio::test]
async fn full_session_lifecycle() {
    let base_url = start_server().await;
    let storage = Arc::new(MemoryStorage::default());
    let c = controller(&base_url, Arc::clone(&storage));

    c.bootstrap().await;
    assert!(c.snapshot().blogs.is_empty());

    login(&c, "mluukkai").await;
    assert!(storage.get_item(SESSION_KEY).unwrap().unwrap().contains("mluukkai"));

    assert!(c.create_post(BlogDraft::new("First", "Ada", "https://a.example")).await);
    assert!(c.create_post(BlogDraft::new("Second", "Bob", "https://b.example")).await);

    let second = c.snapshot().blogs[1].id.clone();
    c.like(&second).await;
    c.like(&second).await;
    c.toggle_importance(&second).await;

    let sorted = c.snapshot().sorted_blogs();
    assert_eq!(sorted[0].title, "Second");
    assert_eq!(sorted[0].likes, 2);
    assert!(sorted[0].important);

    let first = sorted[1].id.clone();
    assert!(c.delete_post(&first, |_: &str| true).await);
    assert_eq!(c.snapshot().blogs.len(), 1);

    c.logout().await;
    assert_eq!(storage.get_item(SESSION_KEY).unwrap(), None);
    assert!(!c.create_post(BlogDraft::new("Third", "Cy", "https://c.example")).await);
}

#[tokio::test]
async fn saved_session_is_reused_after_restart() {
    let base_url = start_server().await;
    let storage = Arc::new(MemoryStorage::default());

    let first_run = controller(&base_url, Arc::clone(&storage));
    login(&first_run, "mluukkai").await;
    drop(first_run);

    let second_run = controller(&base_url, Arc::clone(&storage));
    second_run.bootstrap().await;
    assert!(second_run.snapshot().is_authenticated());
    assert!(second_run.create_post(BlogDraft::new("T", "A", "U")).await);
}

#[tokio::test]
async fn non_owner_cannot_delete() {
    let base_url = start_server().await;

    let owner = controller(&base_url, Arc::new(MemoryStorage::default()));
    login(&owner, "mluukkai").await;
    assert!(owner.create_post(BlogDraft::new("Mine", "M", "https://m.example")).await);

    let other = controller(&base_url, Arc::new(MemoryStorage::default()));
    other.bootstrap().await;
    login(&other, "hellas").await;

    let id = other.snapshot().blogs[0].id.clone();
    assert!(!other.delete_post(&id, |_: &str| true).await);
    assert_eq!(other.snapshot().blogs.len(), 1);

    let message = other.notifier().current().unwrap().message;
    assert!(message.contains("only the creator can delete a blog"), "{message}");
}

#[tokio::test]
async fn wrong_password_keeps_inputs() {
    let base_url = start_server().await;
    let c = controller(&base_url, Arc::new(MemoryStorage::default()));

    c.set_username("mluukkai");
    c.set_password("wrong");
    c.login().await;

    let state = c.snapshot();
    assert!(!state.is_authenticated());
    assert_eq!(state.password, "wrong");
    assert!(c.notifier().current().unwrap().message.starts_with("Wrong credentials"));
}

#[tokio::test]
async fn logged_out_token_is_rejected() {
    let base_url = start_server().await;
    let c = controller(&base_url, Arc::new(MemoryStorage::default()));
    login(&c, "mluukkai").await;
    let old = c.context();
    assert!(old.token().is_some());

    c.logout().await;

    let api = BlogService::new(&base_url).unwrap();
    let err = api
        .create(&old, &BlogDraft::new("T", "A", "U"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Auth(_)), "{err:?}");
    assert!(api.logout(&old).await.is_err());
    assert_eq!(c.context(), RequestContext::anonymous());
}
