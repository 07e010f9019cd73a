use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::OnceLock;
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http, web, Error, HttpMessage, HttpResponse,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures::future::{ok, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AuthError, ErrorBody, StoreError};
use crate::models::{Identity, User};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub exp: usize,
}

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

pub fn create_jwt(identity: &Identity, secret: &str, ttl_hours: i64) -> Result<String, AuthError> {
    let expiration = Utc::now() + Duration::hours(ttl_hours);
    let claims = Claims {
        sub: identity.id.clone(),
        username: identity.display_name.clone(),
        exp: expiration.timestamp() as usize,
    };
    Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))?)
}

pub fn validate_jwt(token: &str, secret: &str) -> Result<Identity, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(Identity::new(token_data.claims.sub, token_data.claims.username))
}

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]{3,32}$").expect("valid username regex"))
}

pub fn is_valid_username(username: &str) -> bool {
    username_pattern().is_match(username)
}

/// Resolves `Authorization: Bearer <jwt>` into an `Identity` request extension.
/// Requests without the header pass through as anonymous.
#[derive(Clone)]
pub struct Authentication {
    secret: Rc<String>,
}

impl Authentication {
    pub fn new(secret: impl Into<String>) -> Self {
        Authentication { secret: Rc::new(secret.into()) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware { service, secret: self.secret.clone() })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string());

        if let Some(token) = token {
            match validate_jwt(&token, &self.secret) {
                Ok(identity) => {
                    req.extensions_mut().insert(identity);
                }
                Err(e) => {
                    warn!("Rejected bearer token: {}", e);
                    let (req_parts, _payload) = req.into_parts();
                    let resp = HttpResponse::Unauthorized()
                        .json(ErrorBody {
                            error: "unauthenticated",
                            message: format!("Invalid token: {}", e),
                        })
                        .map_into_boxed_body();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

// Signup Endpoint
pub async fn signup(
    data: web::Data<AppState>,
    info: web::Json<Credentials>,
) -> Result<HttpResponse, AuthError> {
    let Credentials { username, password } = info.into_inner();
    if !is_valid_username(&username) {
        return Err(AuthError::InvalidUsername);
    }
    // bcrypt blocks; run it on the blocking pool.
    let hashed = web::block(move || hash(password, DEFAULT_COST)).await??;

    let user = User {
        user_id: Uuid::new_v4().to_string(),
        username: username.clone(),
        password: hashed,
    };
    match data.users.insert(&user).await {
        Ok(()) => {
            info!("User {} signed up", user.username);
            Ok(HttpResponse::Ok().json(serde_json::json!({ "user_id": user.user_id })))
        }
        Err(StoreError::Duplicate(_)) => Err(AuthError::UsernameTaken(username)),
        Err(e) => Err(e.into()),
    }
}

// Login Endpoint
pub async fn login(
    data: web::Data<AppState>,
    info: web::Json<Credentials>,
) -> Result<HttpResponse, AuthError> {
    let Credentials { username, password } = info.into_inner();
    let user = data
        .users
        .find_by_username(&username)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    let stored = user.password.clone();
    let matches = web::block(move || verify(password, &stored)).await??;
    if !matches {
        return Err(AuthError::InvalidCredentials);
    }

    let identity = Identity::new(user.user_id, user.username);
    let token = create_jwt(&identity, &data.config.jwt_secret, data.config.token_ttl_hours)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "token": token,
        "user_id": identity.id,
        "username": identity.display_name,
    })))
}
