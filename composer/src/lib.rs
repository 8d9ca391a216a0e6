// This file makes `composer` into a rust library crate.

// The file `main.rs` still exists to make `composer` into an executable.

pub mod import_obj;
pub mod mesh;
pub mod texture;
pub mod texturing;

pub use base;
pub use base::tr;
