use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    headers::{authorization::Bearer, Authorization},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json, TypedHeader,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    app::AppState,
    domain::{
        errors::ApiError,
        events::AppEvent,
        fields::{Referral, ReferralCode, ReferralStatus, UserApp},
    },
    engine::{Applied, CreateReferral, ValidateReferral},
    routes::auth::user_id_from_token,
    stats::ReferralStats,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralResponse {
    id: Uuid,
    referrer_user_id: Uuid,
    referral_code: ReferralCode,
    status: ReferralStatus,
    expired: bool,
    link: String,
    slug: String,
    token: String,
    campaign: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    created_at_utc: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    reserved_at_utc: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    accepted_at_utc: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    token_consumed_utc: Option<OffsetDateTime>,
}

impl ReferralResponse {
    fn from_entity(referral: Referral, now: OffsetDateTime) -> Self {
        Self {
            id: referral.id,
            referrer_user_id: referral.referrer_user_id,
            status: referral.status(),
            expired: referral.is_expired(now),
            reserved_at_utc: referral.reserved_at(),
            accepted_at_utc: referral.accepted_at(),
            token_consumed_utc: referral.token_consumed_at(),
            referral_code: referral.referral_code,
            link: referral.link,
            slug: referral.slug,
            token: referral.token,
            campaign: referral.campaign,
            created_at_utc: referral.created_at,
            expires_at: referral.expires_at,
        }
    }
}

/// Public view of a referral resolved from its slug. Never carries the token.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepLinkMetadataResponse {
    id: Uuid,
    slug: String,
    link: String,
    status: ReferralStatus,
    referral_code: ReferralCode,
    referrer_user_id: Uuid,
    campaign: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
}

impl From<Referral> for DeepLinkMetadataResponse {
    fn from(referral: Referral) -> Self {
        Self {
            id: referral.id,
            status: referral.status(),
            slug: referral.slug,
            link: referral.link,
            referral_code: referral.referral_code,
            referrer_user_id: referral.referrer_user_id,
            campaign: referral.campaign,
            expires_at: referral.expires_at,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReferralRequest {
    campaign: Option<String>,
    idempotency_key: Option<String>,
}

#[derive(Deserialize)]
pub struct ListQuery {
    status: Option<ReferralStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateReferralRequest {
    referral_code: ReferralCode,
    slug: String,
    vendor_signature: Option<String>,
}

#[derive(Serialize)]
pub struct ValidateReferralResponse {
    validated: bool,
    token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptReferralResponse {
    referral_id: Uuid,
    status: ReferralStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    token_consumed_utc: Option<OffsetDateTime>,
}

#[derive(Deserialize)]
pub struct CancelReferralRequest {
    reason: Option<String>,
}

pub async fn list_referrals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
    Extension(user): Extension<UserApp>,
) -> Result<Json<Vec<ReferralResponse>>, ApiError> {
    let referrals = state.engine().list_by_user(user.id, query.status).await?;
    let now = state.clock().now();

    Ok(Json(
        referrals
            .into_iter()
            .map(|r| ReferralResponse::from_entity(r, now))
            .collect(),
    ))
}

pub async fn get_referral(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(user): Extension<UserApp>,
) -> Result<Json<ReferralResponse>, ApiError> {
    let referral = state.engine().get_by_id(id, user.id).await?;
    Ok(Json(ReferralResponse::from_entity(referral, state.clock().now())))
}

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserApp>,
) -> Result<Json<ReferralStats>, ApiError> {
    Ok(Json(state.stats().get_stats(user.id).await?))
}

pub async fn create_referral(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserApp>,
    Json(payload): Json<CreateReferralRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Applied { referral, written } = state
        .engine()
        .create(CreateReferral {
            user_id: user.id,
            campaign: payload.campaign,
            idempotency_key: payload.idempotency_key,
        })
        .await?;

    // A replayed idempotency key answers with the stored referral as-is.
    let status = if written {
        state.publish(AppEvent::ReferralCreated((&referral).into()));
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    let location = format!("/api/referrals/{}", referral.id);
    Ok((
        status,
        [(header::LOCATION, location)],
        Json(ReferralResponse::from_entity(referral, state.clock().now())),
    ))
}

pub async fn validate_referral(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateReferralRequest>,
) -> Result<Json<ValidateReferralResponse>, ApiError> {
    let outcome = state
        .engine()
        .validate(ValidateReferral {
            referral_code: payload.referral_code,
            slug: payload.slug,
            vendor_signature: payload.vendor_signature,
        })
        .await?;

    if outcome.written {
        state.publish(AppEvent::ReferralReserved((&outcome.referral).into()));
    }

    Ok(Json(ValidateReferralResponse {
        validated: outcome.validated,
        token: outcome.token,
    }))
}

pub async fn get_deep_link(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<DeepLinkMetadataResponse>, ApiError> {
    let referral = state.engine().get_by_slug(&slug).await?;
    Ok(Json(referral.into()))
}

/// Public: the recipient may or may not be signed in. A valid bearer token
/// records who accepted.
pub async fn accept_referral(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Json<AcceptReferralResponse>, ApiError> {
    let accepted_by = auth.and_then(|TypedHeader(auth)| user_id_from_token(auth.token(), &state));
    let Applied { referral, written } = state.engine().accept(&token, accepted_by).await?;

    if written {
        state.publish(AppEvent::ReferralAccepted((&referral).into()));
    }

    Ok(Json(AcceptReferralResponse {
        referral_id: referral.id,
        status: referral.status(),
        token_consumed_utc: referral.token_consumed_at(),
    }))
}

pub async fn cancel_referral(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(user): Extension<UserApp>,
    payload: Option<Json<CancelReferralRequest>>,
) -> Result<Json<ReferralResponse>, ApiError> {
    let reason = payload
        .and_then(|Json(p)| p.reason)
        .unwrap_or_else(|| "cancelled by referrer".into());

    let Applied { referral, written } = state.engine().cancel(id, user.id, &reason).await?;
    if written {
        state.publish(AppEvent::ReferralCancelled((&referral).into()));
    }

    Ok(Json(ReferralResponse::from_entity(referral, state.clock().now())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualTimeSource,
        config::{ApplicationConfig, Config, DatabaseConfig, JwtConfig, ReferralConfig},
        fraud::SlidingWindowFraudGate,
        repository::InMemoryStore,
    };
    use secrecy::Secret;
    use tokio::sync::broadcast;

    fn config() -> Config {
        Config {
            application: ApplicationConfig {
                host: "127.0.0.1".into(),
                port: 0,
                debug_mode: "debug".into(),
                request_timeout_secs: 10,
            },
            database: DatabaseConfig {
                host: "localhost".into(),
                port: 5432,
                username: "postgres".into(),
                password: Secret::new("password".into()),
                database_name: "referrals".into(),
                require_ssl: false,
            },
            jwt: JwtConfig {
                secret: Secret::new("s3cret".into()),
                iss: "referral-server".into(),
                exp: 3600,
            },
            referral: ReferralConfig {
                max_creates_per_window: 100,
                ..ReferralConfig::default()
            },
        }
    }

    fn state() -> (Arc<AppState>, UserApp) {
        let config = config();
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualTimeSource::default());
        let fraud = Arc::new(SlidingWindowFraudGate::new(&config.referral, clock.clone()));
        let user = UserApp {
            id: Uuid::new_v4(),
            display_name: "Sam".into(),
            referral_code: "SAM-3F4X9K".into(),
        };
        store.add_user(user.clone());

        let state = AppState::new(config, store.clone(), store, fraud, clock);
        (Arc::new(state), user)
    }

    fn drain(rx: &mut broadcast::Receiver<AppEvent>) -> Vec<AppEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn create_request(key: Option<&str>) -> Json<CreateReferralRequest> {
        Json(CreateReferralRequest {
            campaign: None,
            idempotency_key: key.map(str::to_owned),
        })
    }

    #[tokio::test]
    async fn replayed_create_answers_ok_without_event() {
        let (state, user) = state();
        let mut rx = state.get_sender().subscribe();

        let first = create_referral(
            State(state.clone()),
            Extension(user.clone()),
            create_request(Some("k1")),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(first.status(), StatusCode::CREATED);

        let replay = create_referral(
            State(state.clone()),
            Extension(user.clone()),
            create_request(Some("k1")),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(replay.status(), StatusCode::OK);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AppEvent::ReferralCreated(_)));
        assert_eq!(
            state.engine().list_by_user(user.id, None).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn replayed_transitions_publish_once() {
        let (state, user) = state();
        create_referral(State(state.clone()), Extension(user.clone()), create_request(None))
            .await
            .unwrap();
        create_referral(State(state.clone()), Extension(user.clone()), create_request(None))
            .await
            .unwrap();
        let referrals = state.engine().list_by_user(user.id, None).await.unwrap();
        let (redeemed, cancelled) = (&referrals[0], &referrals[1]);

        let mut rx = state.get_sender().subscribe();

        for _ in 0..2 {
            validate_referral(
                State(state.clone()),
                Json(ValidateReferralRequest {
                    referral_code: user.referral_code.clone(),
                    slug: redeemed.slug.clone(),
                    vendor_signature: None,
                }),
            )
            .await
            .unwrap();
        }

        for _ in 0..2 {
            accept_referral(State(state.clone()), Path(redeemed.token.clone()), None)
                .await
                .unwrap();
        }

        for _ in 0..2 {
            cancel_referral(
                State(state.clone()),
                Path(cancelled.id),
                Extension(user.clone()),
                None,
            )
            .await
            .unwrap();
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], AppEvent::ReferralReserved(_)));
        assert!(matches!(events[1], AppEvent::ReferralAccepted(_)));
        assert!(matches!(events[2], AppEvent::ReferralCancelled(_)));
    }
}
