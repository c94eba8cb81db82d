use actix_web::test::TestRequest;
use actix_web::{App, test, web};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use sqlx::{PgPool, Row};

use listings_credits::error::AppError;
use listings_credits::models::{FeatureType, ListingKind, Role};
use listings_credits::{api, features, ledger};

mod support;

async fn set_window(pool: &PgPool, listing_id: i32, start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) {
    sqlx::query(
        r#"UPDATE listings
           SET featured = true, feature_type = 'standard', feature_start = $2, feature_end = $3
           WHERE id = $1"#,
    )
    .bind(listing_id)
    .bind(start)
    .bind(end)
    .execute(pool)
    .await
    .expect("set window");
}

#[actix_web::test]
async fn expired_windows_never_reach_the_featured_list() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let owner_id = support::create_user(pool, "dealer@example.com", Role::User).await;
    let live = support::approved_listing(pool, owner_id, ListingKind::Car, "Live").await;
    let expired = support::approved_listing(pool, owner_id, ListingKind::Car, "Expired").await;
    let club = support::approved_listing(pool, owner_id, ListingKind::Club, "Club").await;

    let now = Utc::now();
    set_window(pool, live, now - Duration::days(1), now + Duration::days(5)).await;
    set_window(pool, expired, now - Duration::days(40), now - Duration::days(10)).await;
    set_window(pool, club, now - Duration::days(1), now + Duration::days(1)).await;

    // flag still set on the expired row: the read path must filter by time
    let cars = features::featured(pool, Some(ListingKind::Car), now).await.expect("featured");
    assert_eq!(cars.iter().map(|l| l.id).collect::<Vec<_>>(), vec![live]);

    let state = web::Data::new(support::build_state(test_db.pool.clone(), "http://127.0.0.1:1"));
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure)).await;
    let req = TestRequest::get().uri("/api/listings/featured").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let titles: Vec<&str> = body["listings"]
        .as_array()
        .expect("listings")
        .iter()
        .filter_map(|l| l["title"].as_str())
        .collect();
    assert_eq!(titles.len(), 2);
    assert!(!titles.contains(&"Expired"));

    assert_eq!(features::sweep_expired(pool, now).await.expect("sweep"), 1);
    let flag: bool = sqlx::query("SELECT featured FROM listings WHERE id = $1")
        .bind(expired)
        .fetch_one(pool)
        .await
        .expect("listing")
        .get("featured");
    assert!(!flag);
}

#[actix_web::test]
async fn activation_is_idempotent_per_key_and_extends_active_windows() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let owner_id = support::create_user(pool, "promoter@example.com", Role::User).await;
    let listing_id = support::approved_listing(pool, owner_id, ListingKind::Event, "Gala").await;
    support::seed_credits(pool, owner_id, "events_featuredListing", 2).await;

    let state = web::Data::new(support::build_state(test_db.pool.clone(), "http://127.0.0.1:1"));
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure)).await;

    let mut responses = Vec::new();
    for _ in 0..2 {
        let req = TestRequest::post()
            .uri(&format!("/api/listings/{listing_id}/feature"))
            .insert_header(support::bearer(owner_id, Role::User))
            .insert_header(("Idempotency-Key", "tab-1"))
            .set_json(json!({"featureType": "featured"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        responses.push(body);
    }
    assert_eq!(responses[0]["replayed"], false);
    assert_eq!(responses[1]["replayed"], true);
    assert_eq!(responses[0]["window"], responses[1]["window"]);
    assert_eq!(responses[1]["remaining"], 1);
    assert_eq!(
        ledger::balance(pool, owner_id, "events_featuredListing")
            .await
            .expect("balance"),
        1
    );

    // a new key spends the last credit and extends from the current end
    let first_end = features::featured(pool, None, Utc::now())
        .await
        .expect("featured")[0]
        .feature_end
        .expect("end");
    let second = features::activate(pool, owner_id, listing_id, FeatureType::Featured, Some("tab-2"), Utc::now())
        .await
        .expect("activate");
    assert_eq!(second.window.end, first_end + Duration::days(365));
    assert_eq!(second.remaining, 0);

    let req = TestRequest::post()
        .uri(&format!("/api/listings/{listing_id}/feature"))
        .insert_header(support::bearer(owner_id, Role::User))
        .set_json(json!({"featureType": "featured"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 402);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "insufficient_credit");
}

#[actix_web::test]
async fn only_the_owner_of_an_approved_listing_can_feature_it() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let owner_id = support::create_user(pool, "seller@example.com", Role::User).await;
    let other_id = support::create_user(pool, "other@example.com", Role::User).await;
    let approved = support::approved_listing(pool, owner_id, ListingKind::Auction, "Estate sale").await;
    let pending: i32 = sqlx::query(
        "INSERT INTO listings (owner_id, kind, title) VALUES ($1, 'auction', 'Pending lot') RETURNING id",
    )
    .bind(owner_id)
    .fetch_one(pool)
    .await
    .expect("listing")
    .get("id");
    support::seed_credits(pool, owner_id, "auctions_standardListing", 3).await;
    support::seed_credits(pool, other_id, "auctions_standardListing", 3).await;

    let now = Utc::now();
    let err = features::activate(pool, other_id, approved, FeatureType::Standard, None, now)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "forbidden");

    let err = features::activate(pool, owner_id, pending, FeatureType::Standard, None, now)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("approved"));

    // neither attempt spent anything
    for user in [owner_id, other_id] {
        assert_eq!(
            ledger::balance(pool, user, "auctions_standardListing")
                .await
                .expect("balance"),
            3
        );
    }
}

#[actix_web::test]
async fn admin_window_override_spends_no_credit() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let owner_id = support::create_user(pool, "owner@example.com", Role::User).await;
    let admin_id = support::create_user(pool, "admin@example.com", Role::Admin).await;
    let listing_id = support::approved_listing(pool, owner_id, ListingKind::Hotel, "Harbor View").await;

    let state = web::Data::new(support::build_state(test_db.pool.clone(), "http://127.0.0.1:1"));
    let app = test::init_service(App::new().app_data(state.clone()).configure(api::configure)).await;

    let end = Utc::now() + Duration::days(7);
    let req = TestRequest::post()
        .uri(&format!("/api/admin/listings/{listing_id}/feature-window"))
        .insert_header(support::bearer(admin_id, Role::Admin))
        .set_json(json!({"featureType": "featured", "end": end}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let featured = features::featured(pool, Some(ListingKind::Hotel), Utc::now())
        .await
        .expect("featured");
    assert_eq!(featured.len(), 1);
    assert_eq!(featured[0].feature_type, Some(FeatureType::Featured));
    assert!(ledger::balances(pool, owner_id).await.expect("balances").is_empty());

    let req = TestRequest::post()
        .uri(&format!("/api/admin/listings/{listing_id}/feature-window"))
        .insert_header(support::bearer(admin_id, Role::Admin))
        .set_json(json!({"featureType": "featured", "end": Utc::now() - Duration::hours(1)}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 400);
}

#[actix_web::test]
async fn reused_key_on_another_listing_is_a_conflict() {
    let test_db = support::init_test_db().await;
    let pool = &test_db.pool;
    let owner_id = support::create_user(pool, "twolots@example.com", Role::User).await;
    let first = support::approved_listing(pool, owner_id, ListingKind::Car, "Sedan").await;
    let second = support::approved_listing(pool, owner_id, ListingKind::Car, "Wagon").await;
    support::seed_credits(pool, owner_id, "cars_basicListing", 1).await;
    support::seed_credits(pool, owner_id, "cars_premiumListing", 1).await;

    let now = Utc::now();
    features::activate(pool, owner_id, first, FeatureType::Standard, Some("K"), now)
        .await
        .expect("activate");
    features::set_window(pool, second, FeatureType::Standard, now + Duration::days(1), now)
        .await
        .expect("admin window");

    // same key, different listing and tier: nothing ran, so nothing is replayed
    let err = features::activate(pool, owner_id, second, FeatureType::Featured, Some("K"), now)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");

    // same key, same listing, different tier
    let err = features::activate(pool, owner_id, first, FeatureType::Featured, Some("K"), now)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "{err:?}");

    assert_eq!(
        ledger::balance(pool, owner_id, "cars_premiumListing")
            .await
            .expect("balance"),
        1
    );

    // the original request still replays
    let replay = features::activate(pool, owner_id, first, FeatureType::Standard, Some("K"), now)
        .await
        .expect("replay");
    assert!(replay.replayed);
    assert_eq!(replay.tier_key, "cars_basicListing");
}
