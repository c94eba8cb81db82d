pub mod api;
pub mod config;
pub mod coupons;
pub mod docs;
pub mod error;
pub mod events;
pub mod features;
pub mod gateway;
pub mod ledger;
pub mod models;
pub mod moderation;
pub mod notify;
pub mod pricing;
pub mod purchases;
pub mod storage;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use aws_sdk_s3::Client as S3Client;
use sqlx::PgPool;

use config::Config;
use gateway::{Gateways, PayPalClient, StripeClient};
use notify::EmailClient;
use storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub gateways: Gateways,
    pub email: EmailClient,
    pub storage: Storage,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, s3_client: S3Client) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            gateways: Gateways {
                stripe: StripeClient::new(http.clone(), &config.stripe),
                paypal: PayPalClient::new(http.clone(), &config.paypal),
            },
            email: EmailClient::new(http, &config.email_api_base),
            storage: Storage::new(s3_client, config.storage.clone()),
            pool,
            config: Arc::new(config),
        })
    }
}
