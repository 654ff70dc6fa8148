pub mod primitive;
pub mod type_code;
pub mod value_codec;

pub use primitive::Primitive;
pub use type_code::{TypeCode, TypeTag};
pub use value_codec::{convert_element, read_element, write_element, CastMode, Element};
