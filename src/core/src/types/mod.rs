//! Reference types shared by the authorization engine

pub mod entity;
pub mod reference;
pub mod subject;

pub use entity::{EntityReference, EntityType};
pub use reference::SecurityReference;
pub use subject::{GroupSecurityReference, UserSecurityReference};
