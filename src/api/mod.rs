pub mod extractor;
pub mod handlers;
pub mod routes;

pub use extractor::*;
pub use handlers::*;
pub use routes::*;
