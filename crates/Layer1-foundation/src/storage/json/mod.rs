//! JSON record storage

mod store;

pub use store::JsonStore;
