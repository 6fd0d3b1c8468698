use super::{Attribute, AttributeLike, Serialize};
use crate::jvm::{BinaryName, Error, FieldType, MethodDescriptor, Name, RenderDescriptor, UnqualifiedName};
use crate::util::{Offset, OffsetVec, Width};
use byteorder::WriteBytesExt;
use std::collections::HashMap;

/// Class file constants pool builder
///
/// The pool is append only; once fully built up it is consumed into a regular
/// [`OffsetVec`]. All `get_*` methods deduplicate, so requesting the same
/// constant twice yields the same index.
pub struct ConstantsPool {
    constants: OffsetVec<Constant>,

    utf8s: HashMap<String, Utf8ConstantIndex>,
    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    fieldrefs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex), FieldRefConstantIndex>,
    methodrefs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex), MethodRefConstantIndex>,
}

impl ConstantsPool {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantsPool {
        ConstantsPool {
            constants: OffsetVec::new_starting_at(Offset(1)),
            utf8s: HashMap::new(),
            classes: HashMap::new(),
            name_and_types: HashMap::new(),
            fieldrefs: HashMap::new(),
            methodrefs: HashMap::new(),
        }
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some
    /// constants take two spaces.
    fn push_constant(&mut self, constant: Constant) -> Result<ConstantIndex, Error> {
        let offset = self.constants.offset_len().0;
        if offset + constant.width() > u16::MAX as usize {
            return Err(Error::ConstantPoolOverflow);
        }
        self.constants.push(constant);
        Ok(ConstantIndex(offset as u16))
    }

    /// Consume the pool and return the final vector of constants
    pub fn into_offset_vec(self) -> OffsetVec<Constant> {
        self.constants
    }

    /// Get or insert a utf8 constant
    pub fn get_utf8(&mut self, utf8: &str) -> Result<Utf8ConstantIndex, Error> {
        if let Some(idx) = self.utf8s.get(utf8) {
            Ok(*idx)
        } else {
            let constant = Constant::Utf8(utf8.to_string());
            let idx = Utf8ConstantIndex(self.push_constant(constant)?);
            self.utf8s.insert(utf8.to_string(), idx);
            Ok(idx)
        }
    }

    /// Get or insert a class constant
    pub fn get_class(&mut self, name: &BinaryName) -> Result<ClassConstantIndex, Error> {
        let name_idx = self.get_utf8(name.as_str())?;
        if let Some(idx) = self.classes.get(&name_idx) {
            Ok(*idx)
        } else {
            let idx = ClassConstantIndex(self.push_constant(Constant::Class(name_idx))?);
            self.classes.insert(name_idx, idx);
            Ok(idx)
        }
    }

    /// Get or insert a name & type constant
    pub fn get_name_and_type(
        &mut self,
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    ) -> Result<NameAndTypeConstantIndex, Error> {
        let key = (name, descriptor);
        if let Some(idx) = self.name_and_types.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::NameAndType { name, descriptor };
            let idx = NameAndTypeConstantIndex(self.push_constant(constant)?);
            self.name_and_types.insert(key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a field reference constant
    pub fn get_field_ref(
        &mut self,
        class: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &FieldType,
    ) -> Result<FieldRefConstantIndex, Error> {
        let class_idx = self.get_class(class)?;
        let name_idx = self.get_utf8(name.as_str())?;
        let descriptor_idx = self.get_utf8(&descriptor.render())?;
        let name_and_type = self.get_name_and_type(name_idx, descriptor_idx)?;
        let key = (class_idx, name_and_type);
        if let Some(idx) = self.fieldrefs.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::FieldRef(class_idx, name_and_type);
            let idx = FieldRefConstantIndex(self.push_constant(constant)?);
            self.fieldrefs.insert(key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a method reference constant
    pub fn get_method_ref(
        &mut self,
        class: &BinaryName,
        name: &UnqualifiedName,
        descriptor: &MethodDescriptor,
    ) -> Result<MethodRefConstantIndex, Error> {
        let class_idx = self.get_class(class)?;
        let name_idx = self.get_utf8(name.as_str())?;
        let descriptor_idx = self.get_utf8(&descriptor.render())?;
        let name_and_type = self.get_name_and_type(name_idx, descriptor_idx)?;
        let key = (class_idx, name_and_type);
        if let Some(idx) = self.methodrefs.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodRef(class_idx, name_and_type);
            let idx = MethodRefConstantIndex(self.push_constant(constant)?);
            self.methodrefs.insert(key, idx);
            Ok(idx)
        }
    }

    /// Serialize and wrap an attribute, interning its name
    pub fn get_attribute<A: AttributeLike>(&mut self, attribute: A) -> Result<Attribute, Error> {
        let name_index = self.get_utf8(A::NAME)?;
        let mut info = vec![];
        attribute.serialize(&mut info).map_err(Error::IoError)?;
        Ok(Attribute { name_index, info })
    }
}

impl Default for ConstantsPool {
    fn default() -> ConstantsPool {
        ConstantsPool::new()
    }
}

/// Constants as in the constant pool
///
/// Only the constant forms the record emitter produces are modelled; the read
/// side skips over the remaining tags without materializing them.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method
    MethodRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    Utf8(String),
}

impl Constant {
    const CLASS_TAG: u8 = 7;
    const FIELDREF_TAG: u8 = 9;
    const METHODREF_TAG: u8 = 10;
    const NAMEANDTYPE_TAG: u8 = 12;
    const UTF8_TAG: u8 = 1;
}

impl Width for Constant {
    fn width(&self) -> usize {
        // `Long` and `Double` constants would occupy two pool entries, but the
        // emitter never produces them
        1
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            Constant::Class(utf8) => {
                Constant::CLASS_TAG.serialize(writer)?;
                utf8.serialize(writer)?;
            }
            Constant::FieldRef(class, name_and_type) => {
                Constant::FIELDREF_TAG.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef(class, name_and_type) => {
                Constant::METHODREF_TAG.serialize(writer)?;
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                Constant::NAMEANDTYPE_TAG.serialize(writer)?;
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::Utf8(string) => {
                Constant::UTF8_TAG.serialize(writer)?;
                let bytes = string.as_bytes();
                (bytes.len() as u16).serialize(writer)?;
                writer.write_all(bytes)?;
            }
        }
        Ok(())
    }
}

/// The constant pool is serialized with a `(count + 1)` length prefix
impl Serialize for OffsetVec<Constant> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        (self.offset_len().0 as u16).serialize(writer)?;
        for (_, _, constant) in self.iter() {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

macro_rules! constant_index {
    ($name:ident) => {
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
        pub struct $name(pub ConstantIndex);

        impl Serialize for $name {
            fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                self.0.serialize(writer)
            }
        }
    };
}

/// Untyped index into the constant pool
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ConstantIndex(pub u16);

impl ConstantIndex {
    /// The zero index, used where "no entry" is meant (eg. a catch-all handler)
    pub const ZERO: ConstantIndex = ConstantIndex(0);
}

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

constant_index!(Utf8ConstantIndex);
constant_index!(ClassConstantIndex);
constant_index!(NameAndTypeConstantIndex);
constant_index!(FieldRefConstantIndex);
constant_index!(MethodRefConstantIndex);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deduplicates_entries() {
        let mut pool = ConstantsPool::new();
        let a = pool.get_utf8("counter").unwrap();
        let b = pool.get_utf8("counter").unwrap();
        assert_eq!(a, b);

        let cls1 = pool.get_class(&BinaryName::OBJECT).unwrap();
        let cls2 = pool.get_class(&BinaryName::OBJECT).unwrap();
        assert_eq!(cls1, cls2);

        // 1 utf8 + 1 utf8 (class name) + 1 class entry
        assert_eq!(pool.into_offset_vec().len(), 3);
    }

    #[test]
    fn pool_indices_start_at_one() {
        let mut pool = ConstantsPool::new();
        let idx = pool.get_utf8("x").unwrap();
        assert_eq!(idx.0 .0, 1);
    }
}
