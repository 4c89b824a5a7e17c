pub mod address;
pub mod directory;
pub mod identity;
pub mod net;
pub mod policy;
pub mod service;
pub mod socketmap;

pub use policy::{Action, Engine, FailureMode};
pub use service::{Service, ServiceError};
