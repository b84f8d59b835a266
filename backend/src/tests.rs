//! Integration tests for the Opportunity Hub backend.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::auth::API_KEY_HEADER;
use crate::config::{Config, EmailConfig, LogFormat};
use crate::db::{init_database, Repository};
use crate::email::{LogMailer, Mailers};
use crate::errors::AppError;
use crate::expiry::run_expiry_sweep;
use crate::models::{
    AdStatus, CampaignChannel, CampaignStatus, EmailProvider, OpportunityFilter,
};
use crate::realtime::{ChangeFeed, ChangeKind, Table};
use crate::search::SearchIndex;
use crate::{create_router, AppState};

const SERVICE_KEY: &str = "test-service-key";
const ADMIN_EMAIL: &str = "admin@example.com";
const BOUNCING_EMAIL: &str = "bounce@example.com";

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    state: AppState,
    gmail: Arc<LogMailer>,
    _temp_dir: TempDir,
}

/// A signed-up account.
struct Account {
    id: String,
    token: String,
}

impl TestFixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");
        let index_path = temp_dir.path().join("index");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        // Initialize search index
        let search = Arc::new(SearchIndex::open(&index_path).expect("Failed to init search"));

        // Create config
        let config = Config {
            service_key: Some(SERVICE_KEY.to_string()),
            db_path,
            index_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            log_format: LogFormat::Text,
            session_ttl: Duration::from_secs(3600),
            admin_emails: vec![ADMIN_EMAIL.to_string()],
            expire_sweep_interval: None,
            expired_retention_days: 30,
            realtime_capacity: 64,
            realtime_reauth_interval: Duration::from_millis(100),
            email: EmailConfig {
                delay: Duration::ZERO,
                batch_size: 2,
                ..EmailConfig::default()
            },
        };

        let gmail = Arc::new(LogMailer::failing_for(
            EmailProvider::Gmail,
            &[BOUNCING_EMAIL],
        ));
        let state = AppState {
            repo,
            search,
            config: Arc::new(config),
            feed: ChangeFeed::new(64),
            mailers: Mailers {
                gmail: gmail.clone(),
                relay: Arc::new(LogMailer::new(EmailProvider::SmtpRelay)),
            },
        };

        let app = create_router(state.clone());

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        TestFixture {
            client: Client::new(),
            base_url,
            state,
            gmail,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str, account: Option<&Account>) -> RequestBuilder {
        authorize(self.client.get(self.url(path)), account)
    }

    fn post(&self, path: &str, account: Option<&Account>) -> RequestBuilder {
        authorize(self.client.post(self.url(path)), account)
    }

    fn put(&self, path: &str, account: Option<&Account>) -> RequestBuilder {
        authorize(self.client.put(self.url(path)), account)
    }

    fn delete(&self, path: &str, account: Option<&Account>) -> RequestBuilder {
        authorize(self.client.delete(self.url(path)), account)
    }

    async fn sign_up(&self, email: &str) -> Account {
        let resp = self
            .post("/api/auth/signup", None)
            .json(&json!({ "email": email, "password": "correct horse" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "sign-up failed for {}", email);
        let body: Value = resp.json().await.unwrap();
        Account {
            id: body["data"]["user"]["id"].as_str().unwrap().to_string(),
            token: body["data"]["accessToken"].as_str().unwrap().to_string(),
        }
    }

    async fn grant(&self, admin: &Account, user: &Account, role: &str) {
        let resp = self
            .put(&format!("/api/admin/users/{}/roles", user.id), Some(admin))
            .json(&json!({ "grant": [role] }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    async fn submit_opportunity(&self, account: &Account, title: &str) -> Value {
        let resp = self
            .post("/api/opportunities", Some(account))
            .json(&json!({
                "title": title,
                "description": "Paid summer placement for students",
                "opportunityType": "internship",
                "domain": "engineering",
                "organization": "Acme",
                "tags": ["rust", "backend"],
                "deadline": "2099-12-31"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        body["data"].clone()
    }

    async fn approve(&self, moderator: &Account, id: &str) {
        let resp = self
            .post(
                &format!("/api/moderation/opportunities/{}/approve", id),
                Some(moderator),
            )
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

impl TestFixture {
    async fn connect_realtime(&self, account: &Account) -> Socket {
        let url = format!(
            "{}/realtime?token={}",
            self.base_url.replacen("http", "ws", 1),
            account.token
        );
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("Failed to connect realtime socket");
        socket
    }
}

async fn subscribe(socket: &mut Socket, id: &str, table: &str) {
    socket
        .send(Message::text(
            json!({ "type": "subscribe", "id": id, "table": table }).to_string(),
        ))
        .await
        .unwrap();
    let reply = next_frame(socket).await;
    assert_eq!(reply["type"], "subscribed");
    assert_eq!(reply["id"], id);
}

/// Next JSON text frame, skipping pings.
async fn next_frame(socket: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("Timed out waiting for a realtime frame")
            .expect("Realtime socket closed")
            .expect("Realtime socket failed");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

fn authorize(builder: RequestBuilder, account: Option<&Account>) -> RequestBuilder {
    match account {
        Some(account) => builder.bearer_auth(&account.token),
        None => builder,
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture.get("/health", None).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_sign_up_sign_in_and_session() {
    let fixture = TestFixture::new().await;
    let account = fixture.sign_up("Student@Example.com").await;

    let resp = fixture
        .get("/api/auth/session", Some(&account))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["email"], "student@example.com");
    assert_eq!(body["data"]["fullName"], "student");
    assert_eq!(body["data"]["roles"], json!(["user"]));

    // Wrong password
    let resp = fixture
        .post("/api/auth/signin", None)
        .json(&json!({ "email": "student@example.com", "password": "wrong password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = fixture
        .post("/api/auth/signin", None)
        .json(&json!({ "email": "student@example.com", "password": "correct horse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!(body["data"]["accessToken"].as_str().is_some());
}

#[tokio::test]
async fn test_sign_up_rejects_duplicates_and_short_passwords() {
    let fixture = TestFixture::new().await;
    fixture.sign_up("twice@example.com").await;

    let resp = fixture
        .post("/api/auth/signup", None)
        .json(&json!({ "email": "twice@example.com", "password": "correct horse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = fixture
        .post("/api/auth/signup", None)
        .json(&json!({ "email": "short@example.com", "password": "short" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_sign_out_revokes_session() {
    let fixture = TestFixture::new().await;
    let account = fixture.sign_up("leaving@example.com").await;

    let resp = fixture
        .post("/api/auth/signout", Some(&account))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .get("/api/auth/session", Some(&account))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_admin_email_gets_admin_role() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;

    let resp = fixture
        .get("/api/admin/users", Some(&admin))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let user = fixture.sign_up("plain@example.com").await;
    let resp = fixture
        .get("/api/admin/users", Some(&user))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_pending_opportunity_hidden_until_approved() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let author = fixture.sign_up("author@example.com").await;
    let moderator = fixture.sign_up("moderator@example.com").await;
    fixture.grant(&admin, &moderator, "moderator").await;

    let opportunity = fixture.submit_opportunity(&author, "Rust Internship").await;
    assert_eq!(opportunity["status"], "pending");
    let id = opportunity["id"].as_str().unwrap();

    // Anonymous callers see neither the listing entry nor the item
    let resp = fixture.get("/api/opportunities", None).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    let resp = fixture
        .get(&format!("/api/opportunities/{}", id), None)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // The author and moderators can read it
    let resp = fixture
        .get(&format!("/api/opportunities/{}", id), Some(&author))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .get("/api/moderation/opportunities", Some(&moderator))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // Plain users cannot moderate
    let resp = fixture
        .post(
            &format!("/api/moderation/opportunities/{}/approve", id),
            Some(&author),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    fixture.approve(&moderator, id).await;

    let resp = fixture.get("/api/opportunities", None).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    let listed = body["data"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["status"], "approved");
}

#[tokio::test]
async fn test_approval_and_rejection_notify_author() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let author = fixture.sign_up("author@example.com").await;

    let approved = fixture.submit_opportunity(&author, "Approved one").await;
    fixture
        .approve(&admin, approved["id"].as_str().unwrap())
        .await;

    let rejected = fixture.submit_opportunity(&author, "Rejected one").await;
    let resp = fixture
        .post(
            &format!(
                "/api/moderation/opportunities/{}/reject",
                rejected["id"].as_str().unwrap()
            ),
            Some(&admin),
        )
        .json(&json!({ "reason": "Missing apply link" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["status"], "rejected");
    assert_eq!(body["data"]["rejectionReason"], "Missing apply link");

    let resp = fixture
        .get("/api/notifications/unread-count", Some(&author))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["count"], 2);
}

#[tokio::test]
async fn test_search_returns_only_public_matches() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let author = fixture.sign_up("author@example.com").await;

    let visible = fixture.submit_opportunity(&author, "Quantum Research Grant").await;
    fixture.approve(&admin, visible["id"].as_str().unwrap()).await;
    fixture
        .submit_opportunity(&author, "Quantum Hackathon Pending")
        .await;

    let resp = fixture
        .get("/api/opportunities?q=quantum", None)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let hits = body["data"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["title"], "Quantum Research Grant");
}

#[tokio::test]
async fn test_non_moderator_edit_resubmits_for_review() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let author = fixture.sign_up("author@example.com").await;
    let stranger = fixture.sign_up("stranger@example.com").await;

    let opportunity = fixture.submit_opportunity(&author, "Editable").await;
    let id = opportunity["id"].as_str().unwrap();
    fixture.approve(&admin, id).await;

    let resp = fixture
        .put(&format!("/api/opportunities/{}", id), Some(&stranger))
        .json(&json!({ "title": "Hijacked" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = fixture
        .put(&format!("/api/opportunities/{}", id), Some(&author))
        .json(&json!({ "title": "Edited" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["title"], "Edited");
    assert_eq!(body["data"]["status"], "pending");
}

#[tokio::test]
async fn test_view_and_apply_counters() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let opportunity = fixture.submit_opportunity(&admin, "Counted").await;
    let id = opportunity["id"].as_str().unwrap();

    for _ in 0..2 {
        let resp = fixture
            .post(&format!("/api/opportunities/{}/view", id), None)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
    let resp = fixture
        .post(&format!("/api/opportunities/{}/apply", id), None)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["applicationsCount"], 1);

    let resp = fixture
        .get(&format!("/api/opportunities/{}", id), None)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["viewsCount"], 2);
}

#[tokio::test]
async fn test_expiry_sweep_expires_then_deletes() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let opportunity = fixture.submit_opportunity(&admin, "Short lived").await;
    let id = opportunity["id"].as_str().unwrap().to_string();

    // The deadline is 2099-12-31; sweep the day after
    let day_after = Utc.with_ymd_and_hms(2100, 1, 1, 12, 0, 0).unwrap();
    let result = run_expiry_sweep(&fixture.state, day_after).await.unwrap();
    assert_eq!(result.expired, 1);
    assert_eq!(result.deleted, 0);

    let stored = fixture
        .state
        .repo
        .get_opportunity(&id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status.as_str(), "expired");

    // Sweeping again finds nothing new
    let result = run_expiry_sweep(&fixture.state, day_after).await.unwrap();
    assert_eq!(result.expired, 0);

    // Past the retention window the row is deleted
    let months_after = Utc.with_ymd_and_hms(2100, 3, 1, 0, 0, 0).unwrap();
    let result = run_expiry_sweep(&fixture.state, months_after).await.unwrap();
    assert_eq!(result.deleted, 1);
    assert!(fixture.state.repo.get_opportunity(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_function_endpoints_require_service_key() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .post("/functions/expire-opportunities", None)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = fixture
        .post("/functions/expire-opportunities", None)
        .header(API_KEY_HEADER, "wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = fixture
        .post("/functions/expire-opportunities", None)
        .header(API_KEY_HEADER, SERVICE_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["expired"], 0);
}

#[tokio::test]
async fn test_bookmarks_are_idempotent() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let reader = fixture.sign_up("reader@example.com").await;
    let opportunity = fixture.submit_opportunity(&admin, "Bookmarked").await;
    let id = opportunity["id"].as_str().unwrap();

    for _ in 0..2 {
        let resp = fixture
            .put(&format!("/api/bookmarks/{}", id), Some(&reader))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["bookmarked"], true);
    }

    let resp = fixture
        .get("/api/bookmarks", Some(&reader))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let resp = fixture
        .post(&format!("/api/bookmarks/{}/toggle", id), Some(&reader))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["bookmarked"], false);

    // Removing twice is fine
    let resp = fixture
        .delete(&format!("/api/bookmarks/{}", id), Some(&reader))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Unknown opportunities cannot be bookmarked
    let resp = fixture
        .put("/api/bookmarks/does-not-exist", Some(&reader))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_notifications_are_private() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let author = fixture.sign_up("author@example.com").await;
    let other = fixture.sign_up("other@example.com").await;

    let opportunity = fixture.submit_opportunity(&author, "Notify me").await;
    fixture
        .approve(&admin, opportunity["id"].as_str().unwrap())
        .await;

    let resp = fixture
        .get("/api/notifications", Some(&author))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let notifications = body["data"].as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    let notification_id = notifications[0]["id"].as_str().unwrap();

    // Another user cannot touch it
    let resp = fixture
        .post(
            &format!("/api/notifications/{}/read", notification_id),
            Some(&other),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = fixture
        .get("/api/notifications", Some(&other))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    let resp = fixture
        .post("/api/notifications/read-all", Some(&author))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["updated"], 1);

    let resp = fixture
        .get("/api/notifications/unread-count", Some(&author))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["count"], 0);
}

#[tokio::test]
async fn test_ad_lifecycle() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let advertiser = fixture.sign_up("brand@example.com").await;

    // Advertiser role is required
    let resp = fixture
        .post("/api/ads", Some(&advertiser))
        .json(&json!({ "title": "Ad", "targetUrl": "https://brand.example" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    fixture.grant(&admin, &advertiser, "advertiser").await;

    let resp = fixture
        .post("/api/ads", Some(&advertiser))
        .json(&json!({ "targetUrl": "https://brand.example" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let resp = fixture
        .post("/api/ads", Some(&advertiser))
        .json(&json!({
            "title": "Summer Bootcamp",
            "targetUrl": "https://brand.example",
            "placement": "sidebar",
            "budgetCents": 5000
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["status"], "pending");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    // Not delivered before review
    let resp = fixture.get("/api/ads/active", None).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    // Pausing a pending ad is a conflict
    let resp = fixture
        .post(&format!("/api/ads/{}/pause", id), Some(&advertiser))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = fixture
        .post(&format!("/api/admin/ads/{}/approve", id), Some(&admin))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture
        .get("/api/ads/active?placement=sidebar", None)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    for _ in 0..4 {
        fixture
            .post(&format!("/api/ads/{}/impression", id), None)
            .send()
            .await
            .unwrap();
    }
    let resp = fixture
        .post(&format!("/api/ads/{}/click", id), None)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["targetUrl"], "https://brand.example");

    let resp = fixture
        .get(&format!("/api/ads/{}/metrics", id), Some(&advertiser))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["impressions"], 4);
    assert_eq!(body["data"]["clicks"], 1);
    assert_eq!(body["data"]["ctr"], 0.25);

    let resp = fixture
        .post(&format!("/api/ads/{}/pause", id), Some(&advertiser))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["status"], "paused");
}

#[tokio::test]
async fn test_admin_cannot_remove_own_admin_role() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;

    let resp = fixture
        .put(&format!("/api/admin/users/{}/roles", admin.id), Some(&admin))
        .json(&json!({ "revoke": ["admin"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = fixture
        .delete(&format!("/api/admin/users/{}", admin.id), Some(&admin))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_admin_stats_and_broadcast() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let user = fixture.sign_up("user@example.com").await;
    fixture.submit_opportunity(&user, "Waiting").await;

    let resp = fixture
        .get("/api/admin/stats", Some(&admin))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["totalUsers"], 2);
    assert_eq!(body["data"]["opportunities"]["pending"], 1);

    let resp = fixture
        .post("/api/admin/notifications/broadcast", Some(&admin))
        .json(&json!({ "title": "Maintenance", "message": "Down at noon" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["channel"], "in_app");
    assert_eq!(body["data"]["sentCount"], 2);
    assert_eq!(body["data"]["status"], "completed");

    let resp = fixture
        .get("/api/notifications", Some(&user))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"][0]["title"], "Maintenance");
}

#[tokio::test]
async fn test_bulk_email_records_partial_failure() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;

    let resp = fixture
        .post("/functions/send-bulk-email", None)
        .header(API_KEY_HEADER, SERVICE_KEY)
        .json(&json!({
            "recipients": [
                "one@example.com",
                "ONE@example.com",
                BOUNCING_EMAIL,
                "two@example.com"
            ],
            "subject": "Deadline reminder",
            "html": "<p>Apply this week</p>"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["status"], "completed_with_errors");
    assert_eq!(body["data"]["total"], 3);
    assert_eq!(body["data"]["sent"], 2);
    assert_eq!(body["data"]["failed"], 1);
    assert_eq!(body["data"]["failures"][0]["recipient"], BOUNCING_EMAIL);
    assert_eq!(fixture.gmail.sent().len(), 2);

    let campaign_id = body["data"]["campaignId"].as_str().unwrap();
    let resp = fixture
        .get(&format!("/api/admin/campaigns/{}", campaign_id), Some(&admin))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["provider"], "gmail");
    assert_eq!(body["data"]["emails"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_bulk_email_validation() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .post("/functions/send-smtp-email", None)
        .header(API_KEY_HEADER, SERVICE_KEY)
        .json(&json!({ "recipients": [], "subject": "Hello", "html": "<p>Hi</p>" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = fixture
        .post("/functions/send-smtp-email", None)
        .header(API_KEY_HEADER, SERVICE_KEY)
        .json(&json!({ "recipients": ["a@example.com"], "subject": " ", "html": "<p>Hi</p>" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_background_bulk_email_answers_accepted() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .post("/functions/send-smtp-email", None)
        .header(API_KEY_HEADER, SERVICE_KEY)
        .json(&json!({
            "recipients": ["a@example.com", "b@example.com"],
            "subject": "Newsletter",
            "html": "<p>News</p>",
            "background": true
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["total"], 2);
    let campaign_id = body["data"]["campaignId"].as_str().unwrap().to_string();

    // Wait for the run to finish
    let mut status = String::new();
    for _ in 0..50 {
        let campaign = fixture
            .state
            .repo
            .get_campaign(&campaign_id)
            .await
            .unwrap()
            .unwrap();
        status = campaign.status.as_str().to_string();
        if status != "sending" {
            break;
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
    }
    assert_eq!(status, "completed");
}

#[tokio::test]
async fn test_expired_opportunities_leave_public_listing() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let opportunity = fixture.submit_opportunity(&admin, "Closing soon").await;
    let id = opportunity["id"].as_str().unwrap();

    let resp = fixture.get("/api/opportunities", None).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["id"], id);

    // Deadline passed, sweep not run yet: already hidden
    let filter = OpportunityFilter {
        limit: 20,
        ..OpportunityFilter::default()
    };
    let listed = fixture
        .state
        .repo
        .list_public_opportunities(&filter, "2100-01-01T00:00:00Z")
        .await
        .unwrap();
    assert!(listed.is_empty());

    let day_after = Utc.with_ymd_and_hms(2100, 1, 1, 12, 0, 0).unwrap();
    run_expiry_sweep(&fixture.state, day_after).await.unwrap();

    let resp = fixture.get("/api/opportunities", None).send().await.unwrap();
    let body: Value = resp.json().await.unwrap();
    assert!(body["data"].as_array().unwrap().is_empty());

    let resp = fixture
        .get("/api/opportunities?q=closing", None)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_sweep_rejects_out_of_range_retention() {
    let fixture = TestFixture::new().await;
    let mut config = (*fixture.state.config).clone();
    config.expired_retention_days = 100_000_000;
    let state = AppState {
        config: Arc::new(config),
        ..fixture.state.clone()
    };

    let result = run_expiry_sweep(&state, Utc::now()).await;
    assert!(matches!(result, Err(AppError::Internal(_))));
}

#[tokio::test]
async fn test_sweep_ends_elapsed_ads() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;

    let mut ids = Vec::new();
    for window in [
        json!({ "startsAt": "2020-01-01", "endsAt": "2099-06-30" }),
        json!({ "startsAt": "2099-01-01" }),
    ] {
        let mut request = json!({ "title": "Campus fair", "targetUrl": "https://fair.example" });
        request
            .as_object_mut()
            .unwrap()
            .extend(window.as_object().unwrap().clone());
        let resp = fixture
            .post("/api/ads", Some(&admin))
            .json(&request)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let resp = fixture
            .post(&format!("/api/admin/ads/{}/approve", id), Some(&admin))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        ids.push(id);
    }
    let (running, upcoming) = (&ids[0], &ids[1]);

    let resp = fixture
        .post(&format!("/api/ads/{}/impression", running), None)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Approved but its window has not opened
    let resp = fixture
        .post(&format!("/api/ads/{}/click", upcoming), None)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let after_window = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap();
    let result = run_expiry_sweep(&fixture.state, after_window).await.unwrap();
    assert_eq!(result.ads_ended, 1);

    let ended = fixture.state.repo.get_ad(running).await.unwrap().unwrap();
    assert_eq!(ended.status, AdStatus::Ended);
    assert_eq!(ended.impressions, 1);
    let still_active = fixture.state.repo.get_ad(upcoming).await.unwrap().unwrap();
    assert_eq!(still_active.status, AdStatus::Active);

    assert!(fixture
        .state
        .repo
        .record_impression(running, "2100-01-01T00:00:00Z")
        .await
        .is_err());

    let result = run_expiry_sweep(&fixture.state, after_window).await.unwrap();
    assert_eq!(result.ads_ended, 0);
}

#[tokio::test]
async fn test_stale_expected_version_is_rejected() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let opportunity = fixture.submit_opportunity(&admin, "Versioned").await;
    let id = opportunity["id"].as_str().unwrap();
    assert_eq!(opportunity["version"], 1);

    let resp = fixture
        .put(&format!("/api/opportunities/{}", id), Some(&admin))
        .json(&json!({ "title": "Versioned v2", "expectedVersion": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["version"], 2);

    // Same expected version again is now stale
    let resp = fixture
        .put(&format!("/api/opportunities/{}", id), Some(&admin))
        .json(&json!({ "title": "Versioned v3", "expectedVersion": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VERSION_MISMATCH");
    assert_eq!(body["error"]["details"]["currentVersion"], 2);

    let stored = fixture.state.repo.get_opportunity(id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Versioned v2");
}

#[tokio::test]
async fn test_toggling_twice_restores_bookmark_state() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let reader = fixture.sign_up("reader@example.com").await;
    let opportunity = fixture.submit_opportunity(&admin, "Toggled").await;
    let id = opportunity["id"].as_str().unwrap();

    for expected in [true, false] {
        let resp = fixture
            .post(&format!("/api/bookmarks/{}/toggle", id), Some(&reader))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["bookmarked"], expected);
    }

    let resp = fixture
        .get("/api/bookmarks", Some(&reader))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_rejecting_clears_earlier_approval() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let author = fixture.sign_up("author@example.com").await;
    let opportunity = fixture.submit_opportunity(&author, "Second thoughts").await;
    let id = opportunity["id"].as_str().unwrap();

    fixture.approve(&admin, id).await;
    let stored = fixture.state.repo.get_opportunity(id).await.unwrap().unwrap();
    assert_eq!(stored.approved_by.as_deref(), Some(admin.id.as_str()));

    let resp = fixture
        .post(
            &format!("/api/moderation/opportunities/{}/reject", id),
            Some(&admin),
        )
        .json(&json!({ "reason": "Duplicate listing" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["status"], "rejected");
    assert!(body["data"]["approvedBy"].is_null());
    assert!(body["data"]["approvedAt"].is_null());
    assert_eq!(body["data"]["rejectionReason"], "Duplicate listing");
}

#[tokio::test]
async fn test_mark_all_read_publishes_each_change() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let author = fixture.sign_up("author@example.com").await;
    for title in ["First", "Second"] {
        let opportunity = fixture.submit_opportunity(&author, title).await;
        fixture
            .approve(&admin, opportunity["id"].as_str().unwrap())
            .await;
    }

    let mut changes = fixture.state.feed.subscribe();
    let resp = fixture
        .post("/api/notifications/read-all", Some(&author))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["updated"], 2);

    let mut updates = Vec::new();
    while let Ok(event) = changes.try_recv() {
        if event.table == Table::Notifications {
            updates.push(event);
        }
    }
    assert_eq!(updates.len(), 2);
    for event in &updates {
        assert_eq!(event.event_type, ChangeKind::Update);
        assert_eq!(event.owner_id.as_deref(), Some(author.id.as_str()));
        assert_eq!(event.record["isRead"], true);
    }

    // Nothing left to change
    let resp = fixture
        .post("/api/notifications/read-all", Some(&author))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["updated"], 0);
}

#[tokio::test]
async fn test_interrupted_campaigns_are_failed() {
    let fixture = TestFixture::new().await;
    let repo = &fixture.state.repo;

    let interrupted = repo
        .create_campaign("Hello", "<p>Hi</p>", CampaignChannel::Email, EmailProvider::Gmail, 3, None)
        .await
        .unwrap();
    let finished = repo
        .create_campaign("Done", "<p>Hi</p>", CampaignChannel::Email, EmailProvider::Gmail, 1, None)
        .await
        .unwrap();
    repo.finish_campaign(&finished.id, 1, 0, CampaignStatus::Completed)
        .await
        .unwrap();

    assert_eq!(repo.fail_interrupted_campaigns().await.unwrap(), 1);

    let interrupted = repo.get_campaign(&interrupted.id).await.unwrap().unwrap();
    assert_eq!(interrupted.status, CampaignStatus::Failed);
    assert!(interrupted.completed_at.is_some());
    let finished = repo.get_campaign(&finished.id).await.unwrap().unwrap();
    assert_eq!(finished.status, CampaignStatus::Completed);
}

#[tokio::test]
async fn test_realtime_delivers_only_visible_changes() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let alice = fixture.sign_up("alice@example.com").await;
    let bob = fixture.sign_up("bob@example.com").await;

    let mut socket = fixture.connect_realtime(&alice).await;
    subscribe(&mut socket, "inbox", "notifications").await;

    // Bob's notification is published first but never reaches Alice
    let bobs = fixture.submit_opportunity(&bob, "Bob's listing").await;
    fixture.approve(&admin, bobs["id"].as_str().unwrap()).await;
    let alices = fixture.submit_opportunity(&alice, "Alice's listing").await;
    fixture.approve(&admin, alices["id"].as_str().unwrap()).await;

    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["type"], "change");
    assert_eq!(frame["id"], "inbox");
    assert_eq!(frame["event"]["table"], "notifications");
    assert_eq!(frame["event"]["eventType"], "INSERT");
    assert_eq!(frame["event"]["record"]["userId"], alice.id.as_str());
}

#[tokio::test]
async fn test_realtime_follows_role_revocation() {
    let fixture = TestFixture::new().await;
    let admin = fixture.sign_up(ADMIN_EMAIL).await;
    let staff = fixture.sign_up("staff@example.com").await;
    let author = fixture.sign_up("author@example.com").await;
    fixture.grant(&admin, &staff, "admin").await;

    let mut socket = fixture.connect_realtime(&staff).await;
    subscribe(&mut socket, "all", "notifications").await;

    // As an admin, staff sees other users' notifications
    let first = fixture.submit_opportunity(&author, "First").await;
    fixture.approve(&admin, first["id"].as_str().unwrap()).await;
    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["event"]["record"]["userId"], author.id.as_str());

    let resp = fixture
        .put(&format!("/api/admin/users/{}/roles", staff.id), Some(&admin))
        .json(&json!({ "revoke": ["admin"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let second = fixture.submit_opportunity(&author, "Second").await;
    fixture.approve(&admin, second["id"].as_str().unwrap()).await;
    let own = fixture.submit_opportunity(&staff, "Own").await;
    fixture.approve(&admin, own["id"].as_str().unwrap()).await;

    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["event"]["record"]["userId"], staff.id.as_str());
}

#[tokio::test]
async fn test_realtime_socket_closes_after_sign_out() {
    let fixture = TestFixture::new().await;
    let account = fixture.sign_up("leaving@example.com").await;

    let mut socket = fixture.connect_realtime(&account).await;
    subscribe(&mut socket, "inbox", "notifications").await;

    let resp = fixture
        .post("/api/auth/signout", Some(&account))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let frame = next_frame(&mut socket).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "Session ended");

    let rest = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("Socket stayed open after the session ended");
    assert!(matches!(rest, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}
