use super::ClassFile;
use crate::jvm::{BinaryName, ClassAccessFlags, Error, Name};
use byteorder::{BigEndian, ReadBytesExt};
use std::collections::HashMap;
use std::io::Read;

/// The slice of a class file's header that the hierarchy oracle needs:
/// access flags, the class's own name, and its superclass name.
#[derive(Debug, Clone)]
pub struct ClassSummary {
    pub access_flags: ClassAccessFlags,
    pub this_class: BinaryName,

    /// `None` only for `java/lang/Object`
    pub super_class: Option<BinaryName>,
}

impl ClassSummary {
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    /// Parse the summary from raw class bytes
    ///
    /// Only the constant pool entries needed to resolve the class and
    /// superclass names are materialized; everything else is skipped over.
    pub fn parse(class_bytes: &[u8]) -> Result<ClassSummary, Error> {
        let mut reader = class_bytes;
        let reader = &mut reader;

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|_| Error::MalformedClass("truncated magic"))?;
        if magic != ClassFile::MAGIC {
            return Err(Error::MalformedClass("bad magic"));
        }
        let _minor = read_u16(reader)?;
        let _major = read_u16(reader)?;

        let constant_count = read_u16(reader)?;
        let mut utf8s: HashMap<u16, String> = HashMap::new();
        let mut class_name_indices: HashMap<u16, u16> = HashMap::new();

        let mut index = 1;
        while index < constant_count {
            let tag = read_u8(reader)?;
            let mut wide = false;
            match tag {
                // Utf8
                1 => {
                    let len = read_u16(reader)? as usize;
                    let mut bytes = vec![0u8; len];
                    reader
                        .read_exact(&mut bytes)
                        .map_err(|_| Error::MalformedClass("truncated utf8 constant"))?;
                    let string = String::from_utf8(bytes)
                        .map_err(|_| Error::MalformedClass("invalid utf8 constant"))?;
                    utf8s.insert(index, string);
                }
                // Integer, Float
                3 | 4 => skip(reader, 4)?,
                // Long, Double (occupy two pool entries)
                5 | 6 => {
                    skip(reader, 8)?;
                    wide = true;
                }
                // Class
                7 => {
                    let utf8_index = read_u16(reader)?;
                    class_name_indices.insert(index, utf8_index);
                }
                // String, MethodType, Module, Package
                8 | 16 | 19 | 20 => skip(reader, 2)?,
                // FieldRef, MethodRef, InterfaceMethodRef, NameAndType, Dynamic, InvokeDynamic
                9 | 10 | 11 | 12 | 17 | 18 => skip(reader, 4)?,
                // MethodHandle
                15 => skip(reader, 3)?,
                _ => return Err(Error::MalformedClass("unknown constant pool tag")),
            }
            index += if wide { 2 } else { 1 };
        }

        let access_flags = ClassAccessFlags::from_bits_truncate(read_u16(reader)?);
        let this_class_index = read_u16(reader)?;
        let super_class_index = read_u16(reader)?;

        let class_name = |index: u16| -> Result<BinaryName, Error> {
            let utf8_index = class_name_indices
                .get(&index)
                .ok_or(Error::MalformedClass("class index out of range"))?;
            let name = utf8s
                .get(utf8_index)
                .ok_or(Error::MalformedClass("class name index out of range"))?;
            BinaryName::from_str(name).map_err(Error::InvalidName)
        };

        let this_class = class_name(this_class_index)?;
        let super_class = if super_class_index == 0 {
            None
        } else {
            Some(class_name(super_class_index)?)
        };

        Ok(ClassSummary {
            access_flags,
            this_class,
            super_class,
        })
    }
}

fn read_u8(reader: &mut &[u8]) -> Result<u8, Error> {
    reader
        .read_u8()
        .map_err(|_| Error::MalformedClass("unexpected end of class file"))
}

fn read_u16(reader: &mut &[u8]) -> Result<u16, Error> {
    reader
        .read_u16::<BigEndian>()
        .map_err(|_| Error::MalformedClass("unexpected end of class file"))
}

fn skip(reader: &mut &[u8], n: usize) -> Result<(), Error> {
    let current = *reader;
    if current.len() < n {
        return Err(Error::MalformedClass("unexpected end of class file"));
    }
    *reader = &current[n..];
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{ConstantsPool, Serialize, Version};
    use crate::jvm::ClassAccessFlags;

    fn class_bytes(
        name: &str,
        super_name: Option<&str>,
        access_flags: ClassAccessFlags,
    ) -> Vec<u8> {
        let mut constants = ConstantsPool::new();
        let this_class = constants
            .get_class(&BinaryName::from_str(name).unwrap())
            .unwrap();
        let super_class = match super_name {
            Some(super_name) => {
                constants
                    .get_class(&BinaryName::from_str(super_name).unwrap())
                    .unwrap()
                    .0
            }
            None => crate::jvm::class_file::ConstantIndex::ZERO,
        };
        let class_file = ClassFile {
            version: Version::JAVA8,
            constants: constants.into_offset_vec(),
            access_flags,
            this_class,
            super_class: crate::jvm::class_file::ClassConstantIndex(super_class),
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        };
        let mut bytes = vec![];
        class_file.serialize(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn round_trips_header() {
        let bytes = class_bytes(
            "com/example/Widget",
            Some("java/lang/Object"),
            ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        );
        let summary = ClassSummary::parse(&bytes).unwrap();
        assert_eq!(summary.this_class.as_str(), "com/example/Widget");
        assert_eq!(
            summary.super_class.as_ref().map(|n| n.as_str()),
            Some("java/lang/Object")
        );
        assert!(!summary.is_interface());
    }

    #[test]
    fn detects_interfaces() {
        let bytes = class_bytes(
            "com/example/Shape",
            Some("java/lang/Object"),
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
        );
        let summary = ClassSummary::parse(&bytes).unwrap();
        assert!(summary.is_interface());
    }

    #[test]
    fn rejects_garbage() {
        assert!(ClassSummary::parse(&[0xCA, 0xFE]).is_err());
        assert!(ClassSummary::parse(&[0u8; 16]).is_err());
    }
}
