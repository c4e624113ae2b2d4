pub mod coerce;
pub mod crud_service;
pub mod populate;
pub mod resolver;
pub mod search;
pub mod view;

pub use coerce::*;
pub use crud_service::*;
pub use populate::*;
pub use resolver::*;
pub use search::*;
pub use view::*;
