pub mod annotations;
pub mod crd;
pub mod key;
pub mod version;
