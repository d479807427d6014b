//! Who may read an asset.
//!
//! A pure decision: published assets are public, draft assets are limited to
//! their allow-list, and a signed bypass token can vouch for a caller who is
//! not on it. Token problems of any kind mean denial; nothing here panics or
//! propagates an error to the read path.

use crate::models::asset::Asset;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct BypassClaims {
    #[serde(default)]
    sub: String,
}

/// Decides read access for one asset and one (possibly anonymous) caller.
#[derive(Clone)]
pub struct AccessController {
    jwt_secret: Option<String>,
}

impl AccessController {
    /// `jwt_secret` is the shared HS256 secret for bypass tokens; `None`
    /// disables the token path entirely.
    pub fn new(jwt_secret: Option<String>) -> Self {
        Self { jwt_secret }
    }

    /// True if the caller may read the asset.
    pub fn can_view(
        &self,
        asset: &Asset,
        principal: Option<&str>,
        bypass_token: Option<&str>,
    ) -> bool {
        if !asset.draft {
            return true;
        }
        if asset.access_limited.is_empty() {
            return true;
        }
        if let Some(principal) = principal {
            if asset.access_limited.iter().any(|allowed| allowed == principal) {
                return true;
            }
        }
        if let (Some(secret), Some(token)) = (self.jwt_secret.as_deref(), bypass_token) {
            if let Some(subject) = verified_subject(secret, token) {
                return asset.auth_bypass_ids.iter().any(|id| *id == subject);
            }
        }
        false
    }
}

/// Decode the token and return its `sub` claim, or `None` on any signature,
/// decoding or expiry failure. Fail closed.
fn verified_subject(secret: &str, token: &str) -> Option<String> {
    let mut validation = Validation::new(Algorithm::HS256);
    // Tokens carry only a subject; `exp` is honored when present but not
    // demanded.
    validation.required_spec_claims.clear();

    decode::<BypassClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .ok()
        .map(|data| data.claims.sub)
        .filter(|sub| !sub.is_empty())
}
