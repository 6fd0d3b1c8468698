use crate::code::{Instruction, Method};
use crate::jvm::{BinaryName, UnqualifiedName};

/// Decides which classes, methods, and call sites get rewritten
///
/// This is the pluggable boundary: the transformer itself only ever asks, it
/// never decides.
pub trait TransformPolicy {
    fn should_transform_class(&self, class_name: &BinaryName) -> bool;

    fn should_transform_method(&self, class_name: &BinaryName, method: &Method) -> bool;

    fn should_transform_call_site(
        &self,
        class_name: &BinaryName,
        method: &Method,
        call: &Instruction,
    ) -> bool;
}

/// Transform everything except constructors, initializers, and the runtime's
/// own classes
pub struct DefaultPolicy;

impl TransformPolicy for DefaultPolicy {
    fn should_transform_class(&self, class_name: &BinaryName) -> bool {
        !class_name.is_runtime_class()
    }

    fn should_transform_method(&self, _class_name: &BinaryName, method: &Method) -> bool {
        method.name != UnqualifiedName::INIT
            && method.name != UnqualifiedName::CLINIT
            && !method.code.is_empty()
    }

    fn should_transform_call_site(
        &self,
        _class_name: &BinaryName,
        _method: &Method,
        call: &Instruction,
    ) -> bool {
        !call.is_constructor_invocation()
    }
}
