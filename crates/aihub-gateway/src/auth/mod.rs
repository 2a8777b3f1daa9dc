//! Backend authentication.
//!
//! `TokenSource` implementations acquire bearer tokens, `CredentialCache`
//! shares them across requests, and `AuthRewriter` turns them into the headers
//! a backend expects.

pub mod credential;
pub mod rewriter;
pub mod source;

pub use credential::{AccessToken, Credential, CredentialCache};
pub use rewriter::AuthRewriter;
pub use source::{ManagedIdentitySource, StaticTokenSource, TokenSource};
