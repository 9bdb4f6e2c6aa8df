pub mod enforcer;
pub mod error;

pub use enforcer::QuotaEnforcer;
pub use error::QuotaError;
