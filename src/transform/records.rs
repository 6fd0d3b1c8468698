use super::Error;
use crate::jvm::class_file::{
    BytecodeArray, ClassFile, Code, ConstantsPool, Field, Method, Version,
};
use crate::jvm::{
    BinaryName, ClassAccessFlags, FieldAccessFlags, FieldType, MethodAccessFlags,
    MethodDescriptor, Name, RenderDescriptor, UnqualifiedName,
};
use std::collections::HashMap;

/// Synthesizes and caches the saved-frame record classes
///
/// Each distinct live-type signature gets exactly one record class: public
/// fields `_0.._n` in canonical order, a public no-arg constructor chaining
/// to the runtime base class, and the `pointcut` int field inherited from it.
pub struct SavedFrameRecords {
    classes: HashMap<BinaryName, Vec<u8>>,
}

impl SavedFrameRecords {
    pub fn new() -> SavedFrameRecords {
        SavedFrameRecords {
            classes: HashMap::new(),
        }
    }

    /// Emit the record class for this signature unless it is already cached
    pub fn ensure(
        &mut self,
        record_class: &BinaryName,
        sorted_types: &[FieldType],
    ) -> Result<(), Error> {
        // The empty signature maps to the runtime's own base class
        if sorted_types.is_empty() || self.classes.contains_key(record_class) {
            return Ok(());
        }
        let class_bytes = record_class_bytes(record_class, sorted_types)?;
        log::debug!(
            "generated saved-frame record {} ({} fields)",
            record_class.as_str(),
            sorted_types.len(),
        );
        self.classes.insert(record_class.clone(), class_bytes);
        Ok(())
    }

    /// All generated record classes, as raw class-file bytes
    pub fn classes(&self) -> &HashMap<BinaryName, Vec<u8>> {
        &self.classes
    }

    pub fn contains(&self, class_name: &BinaryName) -> bool {
        self.classes.contains_key(class_name)
    }
}

impl Default for SavedFrameRecords {
    fn default() -> SavedFrameRecords {
        SavedFrameRecords::new()
    }
}

fn record_class_bytes(
    record_class: &BinaryName,
    sorted_types: &[FieldType],
) -> Result<Vec<u8>, Error> {
    let mut constants = ConstantsPool::new();
    let this_class = constants.get_class(record_class)?;
    let super_class = constants.get_class(&BinaryName::SAVEDFRAME)?;

    let mut fields = vec![];
    for (index, value_type) in sorted_types.iter().enumerate() {
        let name_index = constants.get_utf8(UnqualifiedName::record_field(index).as_str())?;
        let descriptor_index = constants.get_utf8(&value_type.render())?;
        fields.push(Field {
            access_flags: FieldAccessFlags::PUBLIC,
            name_index,
            descriptor_index,
            attributes: vec![],
        });
    }

    // Constructor body: aload_0, invokespecial super.<init>()V, return
    let super_init = constants.get_method_ref(
        &BinaryName::SAVEDFRAME,
        &UnqualifiedName::INIT,
        &MethodDescriptor {
            parameters: vec![],
            return_type: None,
        },
    )?;
    let super_init_index = (super_init.0).0;
    let constructor_code = Code {
        max_stack: 1,
        max_locals: 1,
        code_array: BytecodeArray(vec![
            0x2a, // aload_0
            0xb7, // invokespecial
            (super_init_index >> 8) as u8,
            super_init_index as u8,
            0xb1, // return
        ]),
        exception_table: vec![],
        attributes: vec![],
    };
    let code_attribute = constants.get_attribute(constructor_code)?;
    let constructor = Method {
        access_flags: MethodAccessFlags::PUBLIC,
        name_index: constants.get_utf8(UnqualifiedName::INIT.as_str())?,
        descriptor_index: constants.get_utf8("()V")?,
        attributes: vec![code_attribute],
    };

    let class_file = ClassFile {
        version: Version::JAVA8,
        constants: constants.into_offset_vec(),
        access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        this_class,
        super_class,
        interfaces: vec![],
        fields,
        methods: vec![constructor],
        attributes: vec![],
    };
    class_file
        .to_bytes()
        .map_err(|err| Error::Class(crate::jvm::Error::IoError(err)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ClassSummary;

    #[test]
    fn record_classes_parse_back() {
        let mut records = SavedFrameRecords::new();
        let types = vec![FieldType::int(), FieldType::object(BinaryName::STRING)];
        let name = crate::transform::record_class_name(&types);
        records.ensure(&name, &types).unwrap();

        let bytes = &records.classes()[&name];
        let summary = ClassSummary::parse(bytes).unwrap();
        assert_eq!(summary.this_class, name);
        assert_eq!(summary.super_class, Some(BinaryName::SAVEDFRAME));
        assert!(!summary.is_interface());
    }

    #[test]
    fn records_are_emitted_once() {
        let mut records = SavedFrameRecords::new();
        let types = vec![FieldType::long()];
        let name = crate::transform::record_class_name(&types);
        records.ensure(&name, &types).unwrap();
        records.ensure(&name, &types).unwrap();
        assert_eq!(records.classes().len(), 1);
        assert!(records.contains(&name));
    }

    #[test]
    fn base_class_is_never_generated() {
        let mut records = SavedFrameRecords::new();
        records.ensure(&BinaryName::SAVEDFRAME, &[]).unwrap();
        assert!(records.classes().is_empty());
    }
}
