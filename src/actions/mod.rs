//! Side effects triggered from the keyboard or by the supervisor: opening a
//! browser and probing the datastore.

pub mod browser;
pub mod datastore;
