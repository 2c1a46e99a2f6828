pub mod crl;
pub mod oid;
