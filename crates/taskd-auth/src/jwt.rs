//! Token issuance and validation
//!
//! Tokens are compact JWTs signed with the service's Ed25519 key:
//!
//! ```json
//! {
//!   "sub": "6f1c…",          // account id
//!   "jti": "0b9e…",          // unique per issuance
//!   "roles": ["USER"],
//!   "typ": "access",         // access | refresh | basic
//!   "iat": 1700000000,
//!   "exp": 1700001200,
//!   "iss": "taskd"
//! }
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Header, Validation};
use serde::{Deserialize, Serialize};
use taskd_config::AuthConfig;
use taskd_store::RevocationStore;
use taskd_types::{TokenType, VerifiedIdentity};
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{AuthError, Result},
    keys::KeyPair,
    validation::{decode_header_algorithm, validate_algorithm, validate_timestamps},
};

/// Signed token payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (account id)
    pub sub: Uuid,
    /// Token id
    pub jti: Uuid,
    /// Roles, in grant order
    pub roles: Vec<String>,
    /// Token type
    pub typ: TokenType,
    /// Issued at (Unix seconds)
    pub iat: u64,
    /// Expires at (Unix seconds)
    pub exp: u64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    /// Natural expiry as a timestamp
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.exp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Request-scoped identity carried by these claims
    pub fn to_identity(&self) -> VerifiedIdentity {
        VerifiedIdentity {
            subject: self.sub,
            token_id: self.jti,
            roles: self.roles.clone(),
            token_type: self.typ,
            expires_at: self.expires_at(),
        }
    }
}

/// An access/refresh pair issued together
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Signed access token
    pub access: String,
    /// Signed refresh token
    pub refresh: String,
    /// Access token expiry
    pub access_expires_at: DateTime<Utc>,
    /// Refresh token expiry
    pub refresh_expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish_non_exhaustive()
    }
}

/// Issuance and validation settings
#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Value of the `iss` claim
    pub issuer: String,
    /// Access token lifetime
    pub access_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_ttl: Duration,
    /// Tolerated clock drift when validating
    pub clock_skew: Duration,
}

impl From<&AuthConfig> for TokenSettings {
    fn from(config: &AuthConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            access_ttl: Duration::from_secs(config.access_ttl_secs),
            refresh_ttl: Duration::from_secs(config.refresh_ttl_secs),
            clock_skew: Duration::from_secs(config.clock_skew_secs),
        }
    }
}

/// Builds and verifies signed tokens
///
/// Holds the process keypair by shared reference; signing and verification
/// take no locks.
pub struct TokenCodec {
    keys: Arc<KeyPair>,
    settings: TokenSettings,
    revocations: Arc<dyn RevocationStore>,
    validation: Validation,
}

impl TokenCodec {
    /// Create a codec signing with `keys` and checking revocation in `revocations`
    pub fn new(
        keys: Arc<KeyPair>,
        settings: TokenSettings,
        revocations: Arc<dyn RevocationStore>,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = settings.clock_skew.as_secs();
        validation.validate_aud = false;
        validation.set_issuer(&[settings.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Self { keys, settings, revocations, validation }
    }

    /// Lifetimes and issuer used for new tokens
    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// Issue an access/refresh pair for a subject
    ///
    /// Both tokens share subject and roles; each gets its own token id and
    /// expiry.
    ///
    /// # Errors
    ///
    /// Fails only if signing fails.
    pub fn issue(&self, subject: Uuid, roles: &[String]) -> Result<TokenPair> {
        let now = unix_now();

        let access = self.claims_for(subject, roles, TokenType::Access, now, self.settings.access_ttl);
        let refresh =
            self.claims_for(subject, roles, TokenType::Refresh, now, self.settings.refresh_ttl);

        let pair = TokenPair {
            access: self.sign(&access)?,
            refresh: self.sign(&refresh)?,
            access_expires_at: access.expires_at(),
            refresh_expires_at: refresh.expires_at(),
        };

        debug!(
            subject = %subject,
            access_id = %access.jti,
            refresh_id = %refresh.jti,
            "Issued token pair"
        );

        Ok(pair)
    }

    fn claims_for(
        &self,
        subject: Uuid,
        roles: &[String],
        typ: TokenType,
        now: u64,
        ttl: Duration,
    ) -> Claims {
        Claims {
            sub: subject,
            jti: Uuid::new_v4(),
            roles: roles.to_vec(),
            typ,
            iat: now,
            exp: now + ttl.as_secs(),
            iss: self.settings.issuer.clone(),
        }
    }

    pub(crate) fn sign(&self, claims: &Claims) -> Result<String> {
        jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), claims, self.keys.encoding_key())
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Check structure, algorithm, signature, issuer and expiry
    ///
    /// Does not consult the revocation store; use [`TokenCodec::validate`]
    /// for anything that grants access.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let alg = decode_header_algorithm(token)?;
        validate_algorithm(&alg)?;

        let data = jsonwebtoken::decode::<Claims>(token, self.keys.decoding_key(), &self.validation)?;

        validate_timestamps(&data.claims, unix_now(), self.settings.clock_skew.as_secs())?;

        Ok(data.claims)
    }

    /// Fully validate a token
    ///
    /// In order: structure, algorithm, signature and expiry, revocation,
    /// then the expected type if one is given.
    ///
    /// # Errors
    ///
    /// - Any verification failure, or `TokenRevoked`
    /// - `WrongTokenType` if `expected` is given and differs
    /// - `Store` if the revocation store cannot be consulted
    pub async fn validate(&self, token: &str, expected: Option<TokenType>) -> Result<Claims> {
        let claims = self.verify(token)?;

        let revoked = self
            .revocations
            .exists(claims.jti)
            .await
            .map_err(|e| AuthError::Store(e.to_string()))?;
        if revoked {
            return Err(AuthError::TokenRevoked);
        }

        if let Some(expected) = expected
            && claims.typ != expected
        {
            return Err(AuthError::WrongTokenType { expected, actual: claims.typ });
        }

        Ok(claims)
    }
}

fn unix_now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use jsonwebtoken::EncodingKey;
    use taskd_store::MemoryBackend;
    use taskd_types::ROLE_ADMIN;

    use super::*;

    fn settings() -> TokenSettings {
        TokenSettings {
            issuer: "taskd-test".to_string(),
            access_ttl: Duration::from_secs(1200),
            refresh_ttl: Duration::from_secs(86400),
            clock_skew: Duration::ZERO,
        }
    }

    fn codec() -> (TokenCodec, Arc<MemoryBackend>) {
        let (_, keys) = KeyPair::generate().unwrap();
        let store = Arc::new(MemoryBackend::new());
        (TokenCodec::new(Arc::new(keys), settings(), store.clone()), store)
    }

    fn roles() -> Vec<String> {
        vec![ROLE_ADMIN.to_string()]
    }

    #[tokio::test]
    async fn test_issue_and_validate_access() {
        let (codec, _) = codec();
        let subject = Uuid::new_v4();
        let pair = codec.issue(subject, &roles()).unwrap();

        let claims = codec.validate(&pair.access, Some(TokenType::Access)).await.unwrap();
        assert_eq!(claims.sub, subject);
        assert_eq!(claims.roles, roles());
        assert_eq!(claims.typ, TokenType::Access);
        assert_eq!(claims.iss, "taskd-test");
        assert_eq!(claims.exp - claims.iat, 1200);
    }

    #[tokio::test]
    async fn test_issue_and_validate_refresh() {
        let (codec, _) = codec();
        let subject = Uuid::new_v4();
        let pair = codec.issue(subject, &roles()).unwrap();

        let claims = codec.validate(&pair.refresh, Some(TokenType::Refresh)).await.unwrap();
        assert_eq!(claims.sub, subject);
        assert_eq!(claims.typ, TokenType::Refresh);
        assert_eq!(claims.exp - claims.iat, 86400);
        assert!(pair.refresh_expires_at > pair.access_expires_at);
    }

    #[tokio::test]
    async fn test_pair_has_distinct_token_ids() {
        let (codec, _) = codec();
        let pair = codec.issue(Uuid::new_v4(), &roles()).unwrap();

        let access = codec.verify(&pair.access).unwrap();
        let refresh = codec.verify(&pair.refresh).unwrap();
        assert_ne!(access.jti, refresh.jti);

        let again = codec.issue(access.sub, &roles()).unwrap();
        assert_ne!(codec.verify(&again.access).unwrap().jti, access.jti);
    }

    #[tokio::test]
    async fn test_validate_without_expected_type() {
        let (codec, _) = codec();
        let pair = codec.issue(Uuid::new_v4(), &[]).unwrap();
        assert_eq!(codec.validate(&pair.refresh, None).await.unwrap().typ, TokenType::Refresh);
    }

    #[tokio::test]
    async fn test_wrong_type_rejected() {
        let (codec, _) = codec();
        let pair = codec.issue(Uuid::new_v4(), &roles()).unwrap();

        let err = codec.validate(&pair.access, Some(TokenType::Refresh)).await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::WrongTokenType { expected: TokenType::Refresh, actual: TokenType::Access }
        ));
    }

    #[tokio::test]
    async fn test_revoked_token_rejected() {
        let (codec, store) = codec();
        let pair = codec.issue(Uuid::new_v4(), &roles()).unwrap();

        let claims = codec.validate(&pair.refresh, Some(TokenType::Refresh)).await.unwrap();
        store.insert(claims.jti, claims.expires_at()).await.unwrap();

        for _ in 0..3 {
            let err = codec.validate(&pair.refresh, Some(TokenType::Refresh)).await.unwrap_err();
            assert!(matches!(err, AuthError::TokenRevoked));
        }
        // the access token of the same pair is unaffected
        assert!(codec.validate(&pair.access, Some(TokenType::Access)).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (codec, _) = codec();
        let now = unix_now();
        let claims = Claims {
            sub: Uuid::new_v4(),
            jti: Uuid::new_v4(),
            roles: roles(),
            typ: TokenType::Access,
            iat: now - 7200,
            exp: now - 3600,
            iss: "taskd-test".to_string(),
        };
        let token = codec.sign(&claims).unwrap();

        assert!(matches!(codec.validate(&token, None).await, Err(AuthError::TokenExpired)));
    }

    #[tokio::test]
    async fn test_future_iat_rejected() {
        let (codec, _) = codec();
        let now = unix_now();
        let claims = Claims {
            sub: Uuid::new_v4(),
            jti: Uuid::new_v4(),
            roles: vec![],
            typ: TokenType::Access,
            iat: now + 3600,
            exp: now + 7200,
            iss: "taskd-test".to_string(),
        };
        let token = codec.sign(&claims).unwrap();

        assert!(matches!(codec.verify(&token), Err(AuthError::InvalidTokenFormat(_))));
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let store = Arc::new(MemoryBackend::new());
        let (_, keys) = KeyPair::generate().unwrap();
        let keys = Arc::new(keys);
        let other = TokenCodec::new(
            keys.clone(),
            TokenSettings { issuer: "someone-else".into(), ..settings() },
            store.clone(),
        );
        let ours = TokenCodec::new(keys, settings(), store);

        let pair = other.issue(Uuid::new_v4(), &[]).unwrap();
        assert!(matches!(ours.verify(&pair.access), Err(AuthError::InvalidIssuer)));
    }

    #[tokio::test]
    async fn test_foreign_key_rejected() {
        let (ours, _) = codec();
        let (theirs, _) = codec();

        let pair = theirs.issue(Uuid::new_v4(), &roles()).unwrap();
        assert!(matches!(ours.validate(&pair.access, None).await, Err(AuthError::InvalidSignature)));
    }

    #[tokio::test]
    async fn test_tampered_payload_rejected() {
        let (codec, _) = codec();
        let pair = codec.issue(Uuid::new_v4(), &[]).unwrap();

        let parts: Vec<&str> = pair.access.split('.').collect();
        let mut payload: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        payload["roles"] = serde_json::json!([ROLE_ADMIN]);
        let forged = format!(
            "{}.{}.{}",
            parts[0],
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap()),
            parts[2]
        );

        assert!(matches!(codec.validate(&forged, None).await, Err(AuthError::InvalidSignature)));
    }

    #[tokio::test]
    async fn test_hmac_with_public_key_rejected() {
        let (codec, _) = codec();
        let now = unix_now();
        let claims = Claims {
            sub: Uuid::new_v4(),
            jti: Uuid::new_v4(),
            roles: roles(),
            typ: TokenType::Access,
            iat: now,
            exp: now + 600,
            iss: "taskd-test".to_string(),
        };

        // classic confusion attack: HMAC keyed with the published public key
        let secret = codec.keys.verifying_key().as_bytes().to_vec();
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&secret),
        )
        .unwrap();

        assert!(matches!(
            codec.validate(&token, None).await,
            Err(AuthError::UnsupportedAlgorithm(_))
        ));
    }

    #[tokio::test]
    async fn test_none_algorithm_rejected() {
        let (codec, _) = codec();
        let pair = codec.issue(Uuid::new_v4(), &roles()).unwrap();
        let payload = pair.access.split('.').nth(1).unwrap();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);

        let unsigned = format!("{}.{}.", header, payload);
        assert!(matches!(
            codec.validate(&unsigned, None).await,
            Err(AuthError::UnsupportedAlgorithm(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_tokens_rejected() {
        let (codec, _) = codec();
        for token in ["", "garbage", "a.b.c", "a.b.c.d"] {
            let err = codec.validate(token, None).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidTokenFormat(_)), "{}: {:?}", token, err);
        }
    }

    #[test]
    fn test_claims_identity() {
        let claims = Claims {
            sub: Uuid::new_v4(),
            jti: Uuid::new_v4(),
            roles: roles(),
            typ: TokenType::Refresh,
            iat: 1_700_000_000,
            exp: 1_700_086_400,
            iss: "taskd".into(),
        };
        let identity = claims.to_identity();
        assert_eq!(identity.subject, claims.sub);
        assert_eq!(identity.token_id, claims.jti);
        assert_eq!(identity.token_type, TokenType::Refresh);
        assert_eq!(identity.expires_at.timestamp(), 1_700_086_400);
    }

    #[test]
    fn test_token_pair_debug_hides_tokens() {
        let (codec, _) = codec();
        let pair = codec.issue(Uuid::new_v4(), &[]).unwrap();
        assert!(!format!("{:?}", pair).contains(&pair.access));
    }
}
