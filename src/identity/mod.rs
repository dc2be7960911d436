//! Session identity resolution.

pub mod carriers;
pub mod pointer;
mod resolver;

pub use carriers::IdentityCarrier;
pub use pointer::{FilePointerStore, LatestSession, MemoryPointerStore, SessionPointerStore};
pub use resolver::{Identity, IdentitySource, SessionIdentityResolver};
