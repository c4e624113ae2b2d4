pub mod data;
pub mod hooks;

pub use data::*;
pub use hooks::*;
