use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::auth::register,
        crate::api::auth::login,
        crate::api::payments::stripe_checkout_session,
        crate::api::payments::paypal_order,
        crate::api::payments::paypal_capture,
        crate::api::payments::purchase_status,
        crate::api::webhooks::stripe_webhook,
        crate::api::credits::balances,
        crate::api::credits::history,
        crate::api::credits::validate_coupon,
        crate::api::listings::create_listing,
        crate::api::listings::upload_images,
        crate::api::listings::feature_listing,
        crate::api::listings::featured_listings,
        crate::api::listings::register_for_event,
        crate::api::admin::pending_listings,
        crate::api::admin::approve_listing,
        crate::api::admin::reject_listing,
        crate::api::admin::set_feature_window,
        crate::api::admin::adjust_credits
    ),
    components(
        schemas(
            crate::models::ListingKind,
            crate::models::ListingStatus,
            crate::models::FeatureType,
            crate::models::Provider,
            crate::models::PurchaseStatus,
            crate::models::Role,
            crate::models::Listing,
            crate::models::Purchase,
            crate::models::CreditBalance,
            crate::models::CreditEntry,
            crate::moderation::NewListing,
            crate::coupons::CouponValidation,
            crate::features::FeatureWindow,
            crate::features::Activation,
            crate::api::auth::RegisterRequest,
            crate::api::auth::LoginRequest,
            crate::api::auth::AuthResponse,
            crate::api::payments::CheckoutRequest,
            crate::api::payments::CheckoutSessionResponse,
            crate::api::payments::PayPalOrderResponse,
            crate::api::payments::CaptureRequest,
            crate::api::payments::CaptureResponse,
            crate::api::credits::BalancesResponse,
            crate::api::credits::HistoryResponse,
            crate::api::credits::ValidateCouponRequest,
            crate::api::listings::UploadedImage,
            crate::api::listings::UploadResponse,
            crate::api::listings::FeatureRequest,
            crate::api::listings::FeaturedResponse,
            crate::api::listings::EventRegistrationRequest,
            crate::api::admin::PendingResponse,
            crate::api::admin::RejectRequest,
            crate::api::admin::FeatureWindowRequest,
            crate::api::admin::FeatureWindowResponse,
            crate::api::admin::AdjustCreditsRequest,
            crate::api::admin::AdjustCreditsResponse
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Authentication"),
        (name = "payments", description = "Card and wallet checkout"),
        (name = "webhooks", description = "Signed provider callbacks"),
        (name = "credits", description = "Balances, history and coupons"),
        (name = "listings", description = "Listings, images, feature windows and events"),
        (name = "admin", description = "Moderation and manual adjustments")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
