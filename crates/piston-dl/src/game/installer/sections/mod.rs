//! One `PlanSource` per content category.

pub mod assets;
pub mod client;
pub mod libraries;
pub mod runtime;

pub use assets::AssetsSource;
pub use client::ClientSource;
pub use libraries::LibrariesSource;
pub use runtime::RuntimeSource;
