//! Authorization tokens: the bank-issued, time-boxed ceiling on offline
//! spending, and the store that owns the single active one.

pub mod issue;
pub mod store;
pub mod types;

pub use issue::issue_token;
pub use store::TokenStore;
pub use types::{AuthorizationToken, TokenStatus};
