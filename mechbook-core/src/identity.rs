use serde::{Deserialize, Serialize};
use chrono::Utc;
use jsonwebtoken::dangerous::insecure_decode;
use mechbook_shared::{Booking, Masked};
use std::fmt;

use crate::{CoreError, CoreResult};

/// Which side of the marketplace the signed-in user is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Owner,
    Mechanic,
}

impl Role {
    /// Maps the role claim issued by the auth service
    pub fn from_claim(role: &str) -> Option<Self> {
        match role.to_ascii_uppercase().as_str() {
            "OWNER" | "USER" | "CUSTOMER" => Some(Role::Owner),
            "MECHANIC" => Some(Role::Mechanic),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => f.write_str("owner"),
            Role::Mechanic => f.write_str("mechanic"),
        }
    }
}

/// Claims carried by the bearer token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenClaims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// Who is driving a booking session. Passed in explicitly, never read from globals.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    token: Masked<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: Role, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            token: Masked(token.into()),
        }
    }

    /// Build an identity from the bearer token handed out by the auth service.
    ///
    /// The signature is not checked here; the booking service verifies it on
    /// every call. Expiry is checked so a stale session fails fast.
    pub fn from_bearer(token: &str) -> CoreResult<Self> {
        let data = insecure_decode::<TokenClaims>(token)
            .map_err(|e| CoreError::IdentityError(e.to_string()))?;

        if (data.claims.exp as i64) <= Utc::now().timestamp() {
            return Err(CoreError::IdentityError("ExpiredSignature".to_string()));
        }

        let role = Role::from_claim(&data.claims.role).ok_or_else(|| {
            CoreError::IdentityError(format!("Unsupported role: {}", data.claims.role))
        })?;

        tracing::debug!(user_id = %data.claims.sub, %role, "Identity resolved from bearer token");

        Ok(Self::new(data.claims.sub, role, token))
    }

    pub fn token(&self) -> &str {
        self.token.expose()
    }

    /// Whether this identity is the owner or mechanic on `booking`, matching its role
    pub fn participates_in(&self, booking: &Booking) -> bool {
        match self.role {
            Role::Owner => booking.owner_id == self.user_id,
            Role::Mechanic => booking.mechanic_id == self.user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(role: &str, ttl: Duration) -> String {
        let claims = TokenClaims {
            sub: "user-42".to_string(),
            role: role.to_string(),
            exp: (Utc::now() + ttl).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"server-only")).unwrap()
    }

    #[test]
    fn test_identity_from_mechanic_token() {
        let token = token_for("MECHANIC", Duration::hours(1));
        let identity = Identity::from_bearer(&token).unwrap();

        assert_eq!(identity.user_id, "user-42");
        assert_eq!(identity.role, Role::Mechanic);
        assert_eq!(identity.token(), token);
    }

    #[test]
    fn test_owner_role_aliases() {
        assert_eq!(Role::from_claim("user"), Some(Role::Owner));
        assert_eq!(Role::from_claim("CUSTOMER"), Some(Role::Owner));
        assert_eq!(Role::from_claim("ADMIN"), None);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let token = token_for("ADMIN", Duration::hours(1));
        let result = Identity::from_bearer(&token);
        assert!(matches!(result, Err(CoreError::IdentityError(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = token_for("OWNER", Duration::hours(-2));
        assert!(Identity::from_bearer(&token).is_err());
    }

    #[test]
    fn test_malformed_token_rejected() {
        let result = Identity::from_bearer("not-a-jwt");
        assert!(matches!(result, Err(CoreError::IdentityError(_))));
    }

    #[test]
    fn test_participation_follows_role() {
        let booking = Booking::new(
            "user-42".to_string(),
            "mech-7".to_string(),
            "Honda".to_string(),
            "Fit".to_string(),
            "Battery".to_string(),
        );
        assert!(Identity::new("user-42", Role::Owner, "t").participates_in(&booking));
        assert!(!Identity::new("user-42", Role::Mechanic, "t").participates_in(&booking));
        assert!(Identity::new("mech-7", Role::Mechanic, "t").participates_in(&booking));
    }

    #[test]
    fn test_token_masked_in_debug() {
        let identity = Identity::new("u-1", Role::Owner, "secret-token");
        assert!(!format!("{:?}", identity).contains("secret-token"));
    }
}
