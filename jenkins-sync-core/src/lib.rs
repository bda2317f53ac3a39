pub mod helpers;
pub mod kubernetes;
pub mod resources;

pub const DEFAULT_BASE_DOMAIN: &str = "alauda.io";
