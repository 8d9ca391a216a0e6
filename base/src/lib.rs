pub mod defs;
pub mod tr;
pub mod util;
