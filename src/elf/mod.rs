mod image;
mod parser;
mod types;

pub use image::ObjectImage;
pub(crate) use parser::ElfParser;
