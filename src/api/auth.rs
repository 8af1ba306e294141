//! Bearer token authentication (HS256 JWT).

use crate::api::state::SharedState;
use crate::utils::error::{AppError, Result};
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
}

fn mac(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AppError::ConfigError {
        message: "JWT secret cannot be used as an HMAC key".to_string(),
    })
}

/// 簽發 HS256 token (測試與 dev-token 指令使用)
pub fn sign_token(secret: &str, claims: &Claims) -> Result<String> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header, payload);

    let mut mac = mac(secret)?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature))
}

pub fn verify_token(settings: &AuthSettings, token: &str, now: i64) -> Result<Claims> {
    let invalid = || AppError::unauthorized("Invalid token");

    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let header: Header = URL_SAFE_NO_PAD
        .decode(header)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or_else(invalid)?;
    if header.alg != "HS256" {
        return Err(AppError::unauthorized("Unsupported token algorithm"));
    }

    let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| invalid())?;
    let mut mac = mac(&settings.jwt_secret)?;
    mac.update(header_payload(token).as_bytes());
    mac.verify_slice(&signature).map_err(|_| invalid())?;

    let claims: Claims = URL_SAFE_NO_PAD
        .decode(payload)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .ok_or_else(invalid)?;

    if claims.exp <= now {
        return Err(AppError::unauthorized("Token expired"));
    }
    if let Some(expected) = &settings.audience {
        if claims.aud.as_deref() != Some(expected.as_str()) {
            return Err(AppError::unauthorized("Token audience mismatch"));
        }
    }
    if claims.sub.trim().is_empty() {
        return Err(invalid());
    }
    Ok(claims)
}

fn header_payload(token: &str) -> &str {
    token.rsplit_once('.').map(|(head, _)| head).unwrap_or(token)
}

/// 已驗證的使用者
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &SharedState) -> Result<Self> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .map(str::trim)
            .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;

        let claims = verify_token(&state.auth, token, chrono::Utc::now().timestamp())?;
        Ok(AuthUser {
            user_id: claims.sub,
            email: claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(audience: Option<&str>) -> AuthSettings {
        AuthSettings {
            jwt_secret: "0123456789abcdef0123".into(),
            audience: audience.map(String::from),
        }
    }

    fn claims(exp: i64) -> Claims {
        Claims {
            sub: "user-1".into(),
            email: Some("host@example.com".into()),
            exp,
            aud: Some("authenticated".into()),
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let s = settings(Some("authenticated"));
        let token = sign_token(&s.jwt_secret, &claims(2_000)).unwrap();

        let verified = verify_token(&s, &token, 1_000).unwrap();
        assert_eq!(verified, claims(2_000));
    }

    #[test]
    fn test_rejections() {
        let s = settings(None);
        let token = sign_token(&s.jwt_secret, &claims(2_000)).unwrap();

        assert!(verify_token(&s, &token, 2_000).is_err());
        assert!(verify_token(&s, "a.b", 0).is_err());
        assert!(verify_token(&s, &format!("{}x", token), 0).is_err());

        let other = sign_token("another-secret-value", &claims(2_000)).unwrap();
        assert!(matches!(
            verify_token(&s, &other, 0),
            Err(AppError::Unauthorized { .. })
        ));

        let wrong_audience = settings(Some("service_role"));
        assert!(verify_token(&wrong_audience, &token, 0).is_err());
    }

    #[test]
    fn test_alg_none_is_rejected() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"user-1","exp":9999999999}"#);
        let token = format!("{}.{}.", header, payload);
        assert!(verify_token(&settings(None), &token, 0).is_err());
    }
}
