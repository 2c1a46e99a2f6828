//! Reference adapters for the CRL engine ports.

mod compensating;
mod memory;

pub use compensating::CompensatingUnitOfWork;
pub use memory::MemoryCaStore;
