pub mod measure;
pub mod print;
pub mod suite;
pub mod version;
pub mod xform;
