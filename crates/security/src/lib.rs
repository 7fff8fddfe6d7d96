//! Credentials for the model server
//!
//! Two concerns live here: short-lived cloud access tokens used to call the
//! blob store and the secret manager ([`TokenSource`]), and the optional origin
//! credential ([`CredentialProvider`]).

pub mod token;
pub mod credentials;

// Re-export commonly used types
pub use token::{AdcTokenSource, StaticTokenSource, TokenSource};
pub use credentials::{CredentialProvider, EnvCredentialProvider, SecretManagerProvider};
