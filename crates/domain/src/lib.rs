pub mod categories;
pub mod entities;
pub mod ports;
pub mod repositories;

pub use categories::*;
pub use entities::*;
pub use ports::*;
pub use repositories::*;
