pub mod definitions;
pub mod mode;
pub mod store;
