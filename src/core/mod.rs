//! Core Components
//!
//! Transport, time, PKCE, OAuth1 signing and OIDC/OpenID discovery shared by
//! every flow.

pub mod clock;
pub mod discovery;
pub mod oauth1;
pub mod openid_discovery;
pub mod pkce;
pub mod transport;

pub use clock::*;
pub use discovery::*;
pub use openid_discovery::*;
pub use pkce::*;
pub use transport::*;
