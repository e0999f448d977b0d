pub mod client;
pub mod error;

pub use client::{HttpSigner, Signer};
pub use error::SignerError;
