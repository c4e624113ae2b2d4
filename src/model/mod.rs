pub mod common;
pub mod entity;
pub mod schema;
pub mod submitted;

pub use common::*;
pub use entity::*;
pub use schema::*;
pub use submitted::*;
