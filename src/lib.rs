pub mod asn1;
pub mod config;
pub mod crypto;
pub mod pki;
pub mod store;
pub mod telemetry;
