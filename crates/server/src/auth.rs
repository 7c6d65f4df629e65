//! Bearer token authentication
//!
//! Tokens are compact HS256 JWTs carrying the subject in a `userID` claim.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use grantcraft_core::SubjectId;

use crate::{Result, ServerError};

/// Maps a bearer token to the subject it was issued for
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, bearer: &str) -> Result<SubjectId>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    #[serde(rename = "userID")]
    user_id: String,
    iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
}

pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is checked only when the token carries one
        validation.required_spec_claims.clear();
        Self {
            encoding: EncodingKey::from_secret(secret.as_ref()),
            decoding: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }

    /// Signed token for `subject`, without expiry
    pub fn issue(&self, subject: &SubjectId) -> Result<String> {
        let claims = Claims {
            user_id: subject.as_str().to_string(),
            iat: Utc::now().timestamp(),
            exp: None,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ServerError::Unauthorized(format!("encoding token: {}", e)))
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, bearer: &str) -> Result<SubjectId> {
        let claims = jsonwebtoken::decode::<Claims>(bearer.trim(), &self.decoding, &self.validation)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => "token expired",
                    ErrorKind::InvalidSignature => "invalid signature",
                    ErrorKind::InvalidAlgorithm => "unexpected signing method",
                    _ => "malformed token",
                };
                ServerError::Unauthorized(reason.to_string())
            })?
            .claims;

        if claims.user_id.is_empty() {
            return Err(ServerError::Unauthorized("missing userID claim".to_string()));
        }
        Ok(SubjectId::new(claims.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(secret: &str, header: Header, user: &str, exp: Option<i64>) -> String {
        let claims = Claims {
            user_id: user.to_string(),
            iat: 0,
            exp,
        };
        jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_issue_then_authenticate() {
        let auth = JwtAuthenticator::new("secret");
        let token = auth.issue(&SubjectId::new("subject-1")).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(auth.authenticate(&token).unwrap(), SubjectId::new("subject-1"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = JwtAuthenticator::new("a").issue(&SubjectId::new("s")).unwrap();
        let err = JwtAuthenticator::new("b").authenticate(&token).unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized: invalid signature");
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let auth = JwtAuthenticator::new("secret");
        let genuine = auth.issue(&SubjectId::new("alice")).unwrap();
        let forged = token("other", Header::default(), "mallory", None);

        let mut parts: Vec<&str> = genuine.split('.').collect();
        parts[1] = forged.split('.').nth(1).unwrap();
        assert!(auth.authenticate(&parts.join(".")).is_err());
    }

    #[test]
    fn test_expired_rejected() {
        let auth = JwtAuthenticator::new("secret");
        let expired = token("secret", Header::default(), "alice", Some(1));
        let err = auth.authenticate(&expired).unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized: token expired");

        let later = Utc::now().timestamp() + 3600;
        let valid = token("secret", Header::default(), "alice", Some(later));
        assert_eq!(auth.authenticate(&valid).unwrap(), SubjectId::new("alice"));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let auth = JwtAuthenticator::new("secret");
        let hs512 = token("secret", Header::new(Algorithm::HS512), "alice", None);
        let err = auth.authenticate(&hs512).unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized: unexpected signing method");
    }

    #[test]
    fn test_empty_subject_rejected() {
        let auth = JwtAuthenticator::new("secret");
        let anonymous = token("secret", Header::default(), "", None);
        assert!(auth.authenticate(&anonymous).is_err());
    }

    #[test]
    fn test_malformed() {
        let auth = JwtAuthenticator::new("secret");
        for bad in ["not-a-token", "a.b.c.d", ""] {
            let err = auth.authenticate(bad).unwrap_err();
            assert_eq!(err.to_string(), "Unauthorized: malformed token");
        }
    }
}
