//! Security Triangle Token Handling
//!
//! Decoding of token responses and delivery of tokens to SPUs.

pub mod delivery;
pub mod http;
pub mod response;

pub use delivery::{DeliveryConfig, TokenDeliveryClient};
pub use http::{classify_response, HttpTokenTransport};
pub use response::{DeliveryOutcome, MandatoryTarget, PodTokenResponse, TokenResponse};
