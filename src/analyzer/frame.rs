use super::AnalyzeError;
use crate::code::InsnId;
use crate::jvm::{BaseType, BinaryName, ClassGraph, FieldType, RefType};

/// A tagged value occupying one word of stack or local-variable space
///
/// Two-word values (`long`, `double`) are represented as an adjacent pair of
/// items with matching word indices; they are only meaningful as that pair.
/// Equality is structural throughout, which is what makes "replace every
/// occurrence of this exact uninitialized value" work after `<init>`.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum FrameItem {
    /// Undefined or dead slot
    Top,
    Int,
    Float,
    Long0,
    Long1,
    Double0,
    Double1,
    /// Initialized null reference
    Null,
    /// Initialized reference of a named class
    Object(BinaryName),
    /// One-dimensional array of a primitive type
    PrimitiveArray(BaseType),
    /// Array of references (or of nested arrays)
    ReferenceArray(Box<FrameItem>),
    /// Reference to allocated-but-unconstructed memory, tied to its `new` site
    UninitializedObject { site: InsnId, class: BinaryName },
    /// A constructor's `this` before the superclass constructor has run
    UninitializedThis(BinaryName),
}

impl FrameItem {
    /// Number of words this value occupies
    pub fn words_number(&self) -> usize {
        match self {
            FrameItem::Long0 | FrameItem::Long1 | FrameItem::Double0 | FrameItem::Double1 => 2,
            _ => 1,
        }
    }

    /// Which word of a multi-word value this item is
    pub fn word_index(&self) -> usize {
        match self {
            FrameItem::Long1 | FrameItem::Double1 => 1,
            _ => 0,
        }
    }

    pub fn is_starting_word(&self) -> bool {
        self.word_index() == 0
    }

    pub fn is_initialized_reference(&self) -> bool {
        matches!(
            self,
            FrameItem::Null
                | FrameItem::Object(_)
                | FrameItem::PrimitiveArray(_)
                | FrameItem::ReferenceArray(_)
        )
    }

    pub fn is_uninitialized_reference(&self) -> bool {
        matches!(
            self,
            FrameItem::UninitializedObject { .. } | FrameItem::UninitializedThis(_)
        )
    }

    pub fn is_reference(&self) -> bool {
        self.is_initialized_reference() || self.is_uninitialized_reference()
    }

    /// Initialized, known-non-null reference (array or object)
    pub fn is_not_null_reference(&self) -> bool {
        matches!(
            self,
            FrameItem::Object(_) | FrameItem::PrimitiveArray(_) | FrameItem::ReferenceArray(_)
        )
    }

    /// Build a (possibly nested) reference-array item
    pub fn reference_array(element: FrameItem, dimensions: usize) -> FrameItem {
        let mut result = element;
        for _ in 0..dimensions {
            result = FrameItem::ReferenceArray(Box::new(result));
        }
        result
    }

    /// The two-word pairs
    pub const LONG: [FrameItem; 2] = [FrameItem::Long0, FrameItem::Long1];
    pub const DOUBLE: [FrameItem; 2] = [FrameItem::Double0, FrameItem::Double1];

    /// The concrete value type of a storable item
    ///
    /// `Top`, `Null`, and uninitialized references have no storable type.
    pub fn field_type(&self) -> Result<FieldType, AnalyzeError> {
        match self {
            FrameItem::Int => Ok(FieldType::int()),
            FrameItem::Float => Ok(FieldType::float()),
            FrameItem::Long0 | FrameItem::Long1 => Ok(FieldType::long()),
            FrameItem::Double0 | FrameItem::Double1 => Ok(FieldType::double()),
            FrameItem::Object(name) => Ok(FieldType::object(name.clone())),
            FrameItem::PrimitiveArray(base) => Ok(FieldType::array(FieldType::Base(*base))),
            FrameItem::ReferenceArray(element) => Ok(FieldType::array(element.field_type()?)),
            other => Err(AnalyzeError::NotStorable(other.clone())),
        }
    }

    /// Frame items for a declared field type (one item, or a two-word pair)
    pub fn of_field_type<'g>(
        field_type: &FieldType,
        graph: &'g ClassGraph<'g>,
    ) -> Result<Vec<FrameItem>, AnalyzeError> {
        match field_type {
            FieldType::Base(BaseType::Boolean)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Int) => Ok(vec![FrameItem::Int]),
            FieldType::Base(BaseType::Float) => Ok(vec![FrameItem::Float]),
            FieldType::Base(BaseType::Long) => Ok(FrameItem::LONG.to_vec()),
            FieldType::Base(BaseType::Double) => Ok(FrameItem::DOUBLE.to_vec()),
            FieldType::Ref(ref_type) => Ok(vec![FrameItem::of_ref_type(ref_type, graph)?]),
        }
    }

    /// Frame item for a reference type
    pub fn of_ref_type<'g>(
        ref_type: &RefType,
        graph: &'g ClassGraph<'g>,
    ) -> Result<FrameItem, AnalyzeError> {
        match ref_type {
            RefType::Object(name) => Ok(FrameItem::Object(graph.frame_class(name)?)),
            RefType::PrimitiveArray(arr) => {
                let element = FrameItem::PrimitiveArray(arr.element_type);
                Ok(FrameItem::reference_array(element, arr.additional_dimensions))
            }
            RefType::ObjectArray(arr) => {
                let element = FrameItem::Object(graph.frame_class(&arr.element_type)?);
                Ok(FrameItem::reference_array(element, arr.dimensions()))
            }
        }
    }
}

/// Snapshot of the local variables and operand stack at one program point
///
/// Trailing `Top` locals are always trimmed; the stack top is the last
/// element. A `return` is only valid while `this_initialized` is true, which
/// is how constructors are forced to chain to a superclass constructor.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Frame {
    pub locals: Vec<FrameItem>,
    pub stack: Vec<FrameItem>,
    pub this_initialized: bool,
}

impl Frame {
    pub fn new() -> Frame {
        Frame {
            locals: vec![],
            stack: vec![],
            this_initialized: true,
        }
    }

    /// Local at `index`, `Top` when past the trimmed tail
    pub fn local(&self, index: u16) -> FrameItem {
        self.locals
            .get(index as usize)
            .cloned()
            .unwrap_or(FrameItem::Top)
    }

    /// Overwrite a local, clearing any multi-word value it tears apart
    pub fn set_local(&mut self, index: u16, item: FrameItem) {
        let index = index as usize;
        if item == FrameItem::Top {
            if self.locals.len() > index {
                self.erase_local(index);
            }
        } else {
            while self.locals.len() <= index {
                self.locals.push(FrameItem::Top);
            }
            self.erase_local(index);
            self.locals[index] = item;
        }
        self.normalize_locals();
    }

    /// Overwrite consecutive locals (for two-word pairs)
    pub fn set_locals(&mut self, index: u16, items: &[FrameItem]) {
        for (offset, item) in items.iter().enumerate() {
            self.set_local(index + offset as u16, item.clone());
        }
    }

    /// Clear the full span of the value occupying `index`
    fn erase_local(&mut self, index: usize) {
        let item = self.locals[index].clone();
        let start = index - item.word_index();
        for word in 0..item.words_number() {
            if start + word < self.locals.len() {
                self.locals[start + word] = FrameItem::Top;
            }
        }
    }

    /// Trim trailing `Top` locals
    pub fn normalize_locals(&mut self) {
        while self.locals.last() == Some(&FrameItem::Top) {
            self.locals.pop();
        }
    }

    /// Replace every occurrence of `original` across locals and stack
    ///
    /// Used when `<init>` runs: the exact uninitialized value becomes the
    /// initialized object everywhere at once.
    pub fn replace_all(&mut self, original: &FrameItem, replacement: &FrameItem) {
        for local in self.locals.iter_mut() {
            if local == original {
                *local = replacement.clone();
            }
        }
        for stack_item in self.stack.iter_mut() {
            if stack_item == original {
                *stack_item = replacement.clone();
            }
        }
    }
}

impl Default for Frame {
    fn default() -> Frame {
        Frame::new()
    }
}

/// The frame a method starts with, derived from its descriptor
pub fn initial_frame<'g>(
    owner: &BinaryName,
    method: &crate::code::Method,
    graph: &'g ClassGraph<'g>,
) -> Result<Frame, AnalyzeError> {
    let mut frame = Frame::new();
    if !method.is_static() {
        if method.name == crate::jvm::UnqualifiedName::INIT && owner != &BinaryName::OBJECT {
            frame.locals.push(FrameItem::UninitializedThis(owner.clone()));
            frame.this_initialized = false;
        } else {
            frame.locals.push(FrameItem::Object(graph.frame_class(owner)?));
        }
    }
    for parameter in &method.descriptor.parameters {
        frame
            .locals
            .extend(FrameItem::of_field_type(parameter, graph)?);
    }
    Ok(frame)
}

/// The frame an exception handler starts with: locals carried over, the stack
/// replaced with the single caught exception
pub fn exception_frame<'g>(
    current: &Frame,
    catch_type: Option<&BinaryName>,
    graph: &'g ClassGraph<'g>,
) -> Result<Frame, AnalyzeError> {
    let caught = match catch_type {
        Some(name) => graph.frame_class(name)?,
        None => graph.frame_class(&BinaryName::THROWABLE)?,
    };
    let mut frame = current.clone();
    frame.stack.clear();
    frame.stack.push(FrameItem::Object(caught));
    Ok(frame)
}

/// Merge two frame items at a control-flow confluence point
///
/// This is the finite lattice of the analysis: every step either keeps an
/// item or moves it toward a common ancestor / `Top`, so the fixed point
/// terminates.
pub fn merge_items<'g>(
    item1: &FrameItem,
    item2: &FrameItem,
    graph: &'g ClassGraph<'g>,
) -> Result<FrameItem, AnalyzeError> {
    if item1 == item2 {
        return Ok(item1.clone());
    }
    match (item1, item2) {
        (FrameItem::Object(class1), FrameItem::Object(class2)) => {
            Ok(FrameItem::Object(graph.common_superclass(class1, class2)?))
        }
        (FrameItem::PrimitiveArray(_), FrameItem::PrimitiveArray(_)) => {
            // Same element type was covered by the equality check above
            Ok(FrameItem::Object(BinaryName::OBJECT))
        }
        (FrameItem::ReferenceArray(element1), FrameItem::ReferenceArray(element2)) => {
            let element = merge_items(element1, element2, graph)?;
            Ok(FrameItem::ReferenceArray(Box::new(element)))
        }
        (item, FrameItem::Null) | (FrameItem::Null, item) if item.is_not_null_reference() => {
            Ok(item.clone())
        }
        (item1, item2) if item1.is_not_null_reference() && item2.is_not_null_reference() => {
            Ok(FrameItem::Object(BinaryName::OBJECT))
        }
        _ => Ok(FrameItem::Top),
    }
}

/// Merge two frames at a control-flow confluence point
///
/// Locals merge index-wise (mismatched tails degrade to `Top` and are
/// trimmed); stacks must agree on depth, a depth mismatch is a hard analysis
/// error.
pub fn merge_frames<'g>(
    frame1: &Frame,
    frame2: &Frame,
    graph: &'g ClassGraph<'g>,
) -> Result<Frame, AnalyzeError> {
    let mut result = Frame::new();

    let locals_number = frame1.locals.len().min(frame2.locals.len());
    for i in 0..locals_number {
        result
            .locals
            .push(merge_items(&frame1.locals[i], &frame2.locals[i], graph)?);
    }
    result.normalize_locals();

    if frame1.stack.len() != frame2.stack.len() {
        return Err(AnalyzeError::StackSizeMismatch {
            size1: frame1.stack.len(),
            size2: frame2.stack.len(),
        });
    }
    for i in 0..frame1.stack.len() {
        result
            .stack
            .push(merge_items(&frame1.stack[i], &frame2.stack[i], graph)?);
    }

    if frame1.this_initialized != frame2.this_initialized {
        return Err(AnalyzeError::ThisInitializedMismatch);
    }
    result.this_initialized = frame1.this_initialized;
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::{ClassData, ClassGraphArenas, Name, UnqualifiedName};

    fn obj(name: &BinaryName) -> FrameItem {
        FrameItem::Object(name.clone())
    }

    #[test]
    fn merge_is_idempotent_and_commutative() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        graph.insert_java_library_types();

        let samples = [
            FrameItem::Top,
            FrameItem::Int,
            FrameItem::Float,
            FrameItem::Long0,
            FrameItem::Null,
            obj(&BinaryName::STRING),
            obj(&BinaryName::INTEGER),
            FrameItem::PrimitiveArray(BaseType::Int),
            FrameItem::reference_array(obj(&BinaryName::NUMBER), 1),
        ];
        for item1 in &samples {
            assert_eq!(&merge_items(item1, item1, &graph).unwrap(), item1);
            for item2 in &samples {
                assert_eq!(
                    merge_items(item1, item2, &graph).unwrap(),
                    merge_items(item2, item1, &graph).unwrap(),
                    "merge of {:?} and {:?} is not commutative",
                    item1,
                    item2,
                );
            }
        }
    }

    #[test]
    fn object_merges_to_common_superclass() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        graph.insert_java_library_types();

        assert_eq!(
            merge_items(&obj(&BinaryName::INTEGER), &obj(&BinaryName::NUMBER), &graph).unwrap(),
            obj(&BinaryName::NUMBER)
        );
        assert_eq!(
            merge_items(&obj(&BinaryName::INTEGER), &obj(&BinaryName::STRING), &graph).unwrap(),
            obj(&BinaryName::OBJECT)
        );
    }

    #[test]
    fn null_merges_into_references() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        graph.insert_java_library_types();

        assert_eq!(
            merge_items(&FrameItem::Null, &obj(&BinaryName::STRING), &graph).unwrap(),
            obj(&BinaryName::STRING)
        );
        assert_eq!(
            merge_items(
                &FrameItem::Null,
                &FrameItem::PrimitiveArray(BaseType::Long),
                &graph
            )
            .unwrap(),
            FrameItem::PrimitiveArray(BaseType::Long)
        );
    }

    #[test]
    fn mismatched_arrays_degrade() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        graph.insert_java_library_types();

        assert_eq!(
            merge_items(
                &FrameItem::PrimitiveArray(BaseType::Int),
                &FrameItem::PrimitiveArray(BaseType::Long),
                &graph
            )
            .unwrap(),
            obj(&BinaryName::OBJECT)
        );
        assert_eq!(
            merge_items(
                &FrameItem::reference_array(obj(&BinaryName::INTEGER), 1),
                &FrameItem::reference_array(obj(&BinaryName::NUMBER), 1),
                &graph
            )
            .unwrap(),
            FrameItem::reference_array(obj(&BinaryName::NUMBER), 1)
        );
    }

    #[test]
    fn primitive_and_top_merges() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);

        assert_eq!(
            merge_items(&FrameItem::Int, &FrameItem::Float, &graph).unwrap(),
            FrameItem::Top
        );
        assert_eq!(
            merge_items(&FrameItem::Long0, &FrameItem::Null, &graph).unwrap(),
            FrameItem::Top
        );
    }

    #[test]
    fn frame_merge_trims_locals_and_rejects_stack_mismatch() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        graph.insert_java_library_types();

        let mut frame1 = Frame::new();
        frame1.locals = vec![FrameItem::Int, obj(&BinaryName::STRING)];
        let mut frame2 = Frame::new();
        frame2.locals = vec![FrameItem::Int, FrameItem::Float];

        let merged = merge_frames(&frame1, &frame2, &graph).unwrap();
        assert_eq!(merged.locals, vec![FrameItem::Int]);

        frame2.stack.push(FrameItem::Int);
        assert!(matches!(
            merge_frames(&frame1, &frame2, &graph),
            Err(AnalyzeError::StackSizeMismatch { .. })
        ));
    }

    #[test]
    fn set_local_clears_torn_pairs() {
        let mut frame = Frame::new();
        frame.set_locals(0, &FrameItem::LONG);
        assert_eq!(frame.locals, vec![FrameItem::Long0, FrameItem::Long1]);

        // Overwriting the second word kills the whole pair
        frame.set_local(1, FrameItem::Int);
        assert_eq!(frame.locals, vec![FrameItem::Top, FrameItem::Int]);

        frame.set_local(1, FrameItem::Top);
        assert!(frame.locals.is_empty());
    }

    #[test]
    fn initial_frames() {
        use crate::code::Method;
        use crate::jvm::{MethodAccessFlags, MethodDescriptor};

        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        graph.insert_java_library_types();
        let owner = BinaryName::from_str("c/Example").unwrap();
        graph.add_class(ClassData::new(owner.clone(), Some(BinaryName::OBJECT)));

        let method = Method::new(
            UnqualifiedName::from_str("run").unwrap(),
            MethodDescriptor {
                parameters: vec![FieldType::int(), FieldType::double()],
                return_type: None,
            },
            MethodAccessFlags::PUBLIC,
        );
        let frame = initial_frame(&owner, &method, &graph).unwrap();
        assert_eq!(
            frame.locals,
            vec![
                obj(&owner),
                FrameItem::Int,
                FrameItem::Double0,
                FrameItem::Double1
            ]
        );
        assert!(frame.this_initialized);

        let constructor = Method::new(
            crate::jvm::UnqualifiedName::INIT,
            MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
            MethodAccessFlags::PUBLIC,
        );
        let frame = initial_frame(&owner, &constructor, &graph).unwrap();
        assert_eq!(frame.locals, vec![FrameItem::UninitializedThis(owner)]);
        assert!(!frame.this_initialized);
    }
}
