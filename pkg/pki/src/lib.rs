pub mod bundle;
pub mod ca;
