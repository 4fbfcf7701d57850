pub mod package;
pub mod price;

pub use package::*;
pub use price::*;
