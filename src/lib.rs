pub mod api;
pub mod asset;
pub mod broadcast;
pub mod config;
pub mod cooperative;
pub mod error;
pub mod fees;
pub mod logging;
pub mod refund;
pub mod signer;
pub mod swap;
pub mod ws;
