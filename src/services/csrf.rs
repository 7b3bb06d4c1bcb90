//! Anti-forgery tokens for mutating requests: short-lived HS256 JWTs bound to
//! the actor that requested them.

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::models::actor::{Actor, ActorKind};

const PURPOSE: &str = "csrf";

#[derive(Debug, Serialize, Deserialize)]
struct CsrfClaims {
    /// Actor id, absent for the system actor.
    sub: Option<i64>,
    kind: ActorKind,
    exp: i64,
    purpose: String,
}

pub struct CsrfGuard {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl CsrfGuard {
    pub fn new(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    /// Issue a token for `actor`. Returns the token and its expiry (epoch seconds).
    pub fn issue(&self, actor: &Actor) -> Result<(String, i64), CsrfError> {
        let exp = Utc::now().timestamp().saturating_add(self.ttl_secs);
        let claims = CsrfClaims {
            sub: actor.id,
            kind: actor.kind,
            exp,
            purpose: PURPOSE.to_string(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok((token, exp))
    }

    /// Check that `token` was issued to this same actor and has not expired.
    pub fn verify(&self, token: &str, actor: &Actor) -> Result<(), CsrfError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.required_spec_claims = ["exp".to_string()].into_iter().collect();

        let data = jsonwebtoken::decode::<CsrfClaims>(token, &self.decoding, &validation)?;
        let claims = data.claims;
        if claims.purpose != PURPOSE || claims.sub != actor.id || claims.kind != actor.kind {
            return Err(CsrfError::WrongActor);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CsrfError {
    #[error("Invalid anti-forgery token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    #[error("Anti-forgery token was issued to another actor")]
    WrongActor,
}
