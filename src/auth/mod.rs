// Public API - what other modules can use
pub use extract::AdminUser;
pub use token::TokenConfig;
pub use types::AuthClaims;

// Internal modules
mod extract;
mod token;
mod types;
