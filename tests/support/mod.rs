#![allow(dead_code)]

use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use sqlx::{PgPool, Row};
use std::env;
use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};

use listings_credits::AppState;
use listings_credits::api::auth::generate_jwt;
use listings_credits::config::{
    Config, PayPalConfig, StorageConfig, StripeConfig, WorkerConfig,
};
use listings_credits::ledger;
use listings_credits::models::{ListingKind, Role};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";

fn split_db_url(url: &str) -> Result<(String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = base[db_start + 1..].to_string();
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
    }

    Ok((admin_url, db_name))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

/// Fresh database per test, recreated from `TEST_DATABASE_URL`.
pub async fn init_test_db() -> TestDb {
    dotenvy::dotenv().ok();
    let test_url = env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let (admin_url, db_name) =
        split_db_url(&test_url).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url)
        .await
        .expect("connect admin db");

    let _ = sqlx::query("SELECT pg_advisory_lock(424242)")
        .execute(&admin_pool)
        .await;

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
    if let Err(e) = sqlx::query(&create_sql).execute(&admin_pool).await {
        eprintln!("create test db error: {e}");
        let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
        sqlx::query(&create_sql)
            .execute(&admin_pool)
            .await
            .expect("create test db retry");
    }

    let _ = sqlx::query("SELECT pg_advisory_unlock(424242)")
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;

    let pool = PgPool::connect(&test_url)
        .await
        .expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    TestDb { pool, _guard: guard }
}

/// Every outbound API (card, wallet, email) points at `api_base`, usually an httpmock server.
pub fn test_config(api_base: &str) -> Config {
    Config {
        database_url: "postgres://unused/unused".to_string(),
        bind_addr: "127.0.0.1".to_string(),
        port: 0,
        jwt_secret: JWT_SECRET.to_string(),
        admin_emails: vec!["admin@example.com".to_string()],
        currency: "usd".to_string(),
        email_api_base: api_base.to_string(),
        stripe: StripeConfig {
            secret_key: "sk_test".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            api_base: api_base.to_string(),
        },
        paypal: PayPalConfig {
            client_id: "paypal-client".to_string(),
            client_secret: "paypal-secret".to_string(),
            api_base: api_base.to_string(),
        },
        storage: StorageConfig {
            bucket: "test-bucket".to_string(),
            endpoint: None,
            public_base_url: "http://localhost".to_string(),
            mock: true,
        },
        worker: WorkerConfig {
            interval_secs: 60,
            batch_size: 50,
            purchase_ttl_hours: 24,
            rejected_retention_days: 30,
        },
    }
}

pub fn build_state(pool: PgPool, api_base: &str) -> AppState {
    let s3_config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .build();
    let s3_client = S3Client::from_conf(s3_config);

    AppState::new(pool, test_config(api_base), s3_client).expect("build state")
}

/// State whose pool never connects; for paths that fail before touching the database.
pub fn lazy_state(api_base: &str) -> AppState {
    let pool = PgPool::connect_lazy("postgres://nobody@127.0.0.1:1/none").expect("lazy pool");
    build_state(pool, api_base)
}

pub async fn create_user(pool: &PgPool, email: &str, role: Role) -> i32 {
    sqlx::query(
        r#"INSERT INTO users (email, password_hash, role)
           VALUES ($1, 'test-hash', $2)
           RETURNING id"#,
    )
    .bind(email)
    .bind(role.as_str())
    .fetch_one(pool)
    .await
    .expect("insert user")
    .get("id")
}

pub fn bearer(user_id: i32, role: Role) -> (String, String) {
    let token = generate_jwt(JWT_SECRET, user_id, role).expect("jwt");
    ("Authorization".to_string(), format!("Bearer {token}"))
}

pub async fn approved_listing(pool: &PgPool, owner_id: i32, kind: ListingKind, title: &str) -> i32 {
    sqlx::query(
        r#"INSERT INTO listings (owner_id, kind, title, status, moderated_at)
           VALUES ($1, $2, $3, 'approved', NOW())
           RETURNING id"#,
    )
    .bind(owner_id)
    .bind(kind.as_str())
    .bind(title)
    .fetch_one(pool)
    .await
    .expect("insert listing")
    .get("id")
}

pub async fn seed_credits(pool: &PgPool, user_id: i32, tier_key: &str, credits: i64) {
    let mut tx = pool.begin().await.expect("begin");
    ledger::grant(
        &mut *tx,
        user_id,
        tier_key,
        credits,
        "seed",
        &format!("seed:{user_id}:{tier_key}"),
    )
    .await
    .expect("seed credits");
    tx.commit().await.expect("commit");
}
