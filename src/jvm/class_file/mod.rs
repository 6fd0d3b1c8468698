mod attribute;
mod class;
mod constants;
mod field;
mod method;
mod reader;
mod serialize;
mod version;

pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
pub use reader::*;
pub use serialize::*;
pub use version::*;
