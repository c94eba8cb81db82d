// src/main.rs
use actix_web::middleware::Logger;
use actix_web::{App, HttpResponse, HttpServer, Responder, web};
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::Client as S3Client;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::io;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use listings_credits::config::Config;
use listings_credits::{AppState, api, docs, worker};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(io::Error::other)?;

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .map_err(io::Error::other)?;

    sqlx::migrate!().run(&pool).await.map_err(io::Error::other)?;

    let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;
    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);

    // S3-compatible endpoints (MinIO etc.)
    if let Some(endpoint) = config.storage.endpoint.clone() {
        s3_config_builder = s3_config_builder
            .endpoint_url(endpoint)
            .force_path_style(true);
    }
    let s3_client = S3Client::from_conf(s3_config_builder.build());

    let bind = (config.bind_addr.clone(), config.port);
    let state = AppState::new(pool, config, s3_client).map_err(io::Error::other)?;

    worker::start_background_jobs(state.clone());

    log::info!("listening on {}:{}", bind.0, bind.1);
    let data = web::Data::new(state);

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(Logger::default())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            .configure(api::configure)
    })
    .bind(bind)?
    .run()
    .await
}
