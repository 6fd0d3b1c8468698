use super::BinaryName;

/// Errors from the class-file and type-model layer
#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// The constant pool cannot hold more than 65535 entries
    ConstantPoolOverflow,

    /// A name failed binary-name/unqualified-name validation
    InvalidName(String),

    /// Raw class bytes that don't parse as a class-file header
    MalformedClass(&'static str),

    /// The hierarchy oracle had no way to resolve a class
    MissingClass(BinaryName),
}
