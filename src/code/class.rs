use super::Method;
use crate::jvm::{BinaryName, ClassAccessFlags};

/// An in-memory class under transformation
///
/// How instances get here (class-file loading, code generation) is up to the
/// embedding layer; the transformer only rewrites method bodies and never
/// touches the class's name, descriptor surface, or access flags.
#[derive(Debug)]
pub struct Class {
    pub name: BinaryName,
    pub superclass: BinaryName,
    pub access_flags: ClassAccessFlags,
    pub methods: Vec<Method>,
}

impl Class {
    pub fn new(name: BinaryName, superclass: BinaryName) -> Class {
        Class {
            name,
            superclass,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            methods: vec![],
        }
    }

    pub fn add_method(&mut self, method: Method) {
        self.methods.push(method);
    }
}
