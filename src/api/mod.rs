pub mod admin;
pub mod auth;
pub mod credits;
pub mod listings;
pub mod payments;
pub mod webhooks;

use actix_web::web;

/// Registers every route. Public resources under `/api` come before the
/// authenticated scope so the scope does not swallow them.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // public
        .service(auth::register)
        .service(auth::login)
        .service(webhooks::stripe_webhook)
        .service(listings::featured_listings)
        // bearer token required
        .service(
            web::scope("/api")
                .wrap(auth::JwtMiddleware)
                .service(payments::stripe_checkout_session)
                .service(payments::paypal_order)
                .service(payments::paypal_capture)
                .service(payments::purchase_status)
                .service(credits::balances)
                .service(credits::history)
                .service(credits::validate_coupon)
                .service(listings::create_listing)
                .service(listings::upload_images)
                .service(listings::feature_listing)
                .service(listings::register_for_event)
                .service(
                    web::scope("/admin")
                        .service(admin::pending_listings)
                        .service(admin::approve_listing)
                        .service(admin::reject_listing)
                        .service(admin::set_feature_window)
                        .service(admin::adjust_credits),
                ),
        );
}
