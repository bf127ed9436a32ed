mod value;
pub use value::*;
