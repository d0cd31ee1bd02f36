use serde::{Deserialize, Serialize};

/// JWT claims carried by a bearer token. Token issuance lives in the
/// identity service; this crate only validates and reads them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthClaims {
    /// User id (standard JWT subject claim)
    pub sub: String,
    pub username: String,
    /// Role names granted to the user, e.g. "admin"
    pub roles: Vec<String>,
    pub exp: usize, // Expiration timestamp (standard JWT claim)
    pub iat: usize, // Issued at timestamp (standard JWT claim)
}

impl AuthClaims {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|role| role == "admin")
    }
}
