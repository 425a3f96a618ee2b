pub mod hash;
pub mod platform;
