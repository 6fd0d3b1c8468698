use super::class_file::ClassSummary;
use super::{BinaryName, Error, Name};
use elsa::map::FrozenMap;
use std::fs;
use std::path::PathBuf;
use typed_arena::Arena;

/// Supplier of raw class bytes by binary name
///
/// This is the boundary to whatever holds the classes being analyzed: a
/// directory of compiled classes, an in-memory table in tests, a jar
/// extraction, etc.
pub trait ClassBodyResolver {
    fn class_body(&self, name: &BinaryName) -> Option<Vec<u8>>;
}

/// Resolver that walks a list of class-path-style root directories
pub struct ClassPathResolver {
    roots: Vec<PathBuf>,
}

impl ClassPathResolver {
    pub fn new(roots: Vec<PathBuf>) -> ClassPathResolver {
        ClassPathResolver { roots }
    }
}

impl ClassBodyResolver for ClassPathResolver {
    fn class_body(&self, name: &BinaryName) -> Option<Vec<u8>> {
        for root in &self.roots {
            let path = root.join(format!("{}.class", name.as_str()));
            if let Ok(bytes) = fs::read(&path) {
                return Some(bytes);
            }
        }
        None
    }
}

/// What the graph records per class: just enough to answer subtype and
/// common-superclass queries.
#[derive(Debug)]
pub struct ClassData {
    pub name: BinaryName,

    /// `None` only for `java/lang/Object`
    pub superclass: Option<BinaryName>,

    pub is_interface: bool,
}

impl ClassData {
    pub fn new(name: BinaryName, superclass: Option<BinaryName>) -> ClassData {
        ClassData {
            name,
            superclass,
            is_interface: false,
        }
    }
}

pub struct ClassGraphArenas {
    class_arena: Arena<ClassData>,
}

impl ClassGraphArenas {
    pub fn new() -> Self {
        ClassGraphArenas {
            class_arena: Arena::new(),
        }
    }
}

impl Default for ClassGraphArenas {
    fn default() -> Self {
        ClassGraphArenas::new()
    }
}

/// The class-hierarchy oracle
///
/// Tracks superclass relationships between named classes. Entries are added
/// eagerly (tests, known JDK types) or resolved lazily from raw class bytes
/// through a [`ClassBodyResolver`]; either way they are interned for the
/// lifetime of the graph, so repeated queries never re-parse bytes.
pub struct ClassGraph<'g> {
    arenas: &'g ClassGraphArenas,
    classes: FrozenMap<&'g BinaryName, &'g ClassData>,
    resolver: Option<Box<dyn ClassBodyResolver>>,
}

impl<'g> ClassGraph<'g> {
    /// New graph containing only `java/lang/Object`
    pub fn new(arenas: &'g ClassGraphArenas) -> Self {
        let graph = ClassGraph {
            arenas,
            classes: FrozenMap::new(),
            resolver: None,
        };
        graph.add_class(ClassData::new(BinaryName::OBJECT, None));
        graph
    }

    /// New graph that falls back to raw class bytes for unknown names
    pub fn with_resolver(
        arenas: &'g ClassGraphArenas,
        resolver: Box<dyn ClassBodyResolver>,
    ) -> Self {
        let mut graph = ClassGraph::new(arenas);
        graph.resolver = Some(resolver);
        graph
    }

    /// Add a class to the graph
    pub fn add_class(&self, data: ClassData) -> &'g ClassData {
        let data = &*self.arenas.class_arena.alloc(data);
        self.classes.insert(&data.name, data);
        data
    }

    /// Add the standard library types the analyzer and transformer lean on
    ///
    /// Anything else gets resolved through the class-body resolver on demand.
    pub fn insert_java_library_types(&self) {
        let classes: &[(&BinaryName, &BinaryName)] = &[
            (&BinaryName::STRING, &BinaryName::OBJECT),
            (&BinaryName::CLASS, &BinaryName::OBJECT),
            (&BinaryName::NUMBER, &BinaryName::OBJECT),
            (&BinaryName::INTEGER, &BinaryName::NUMBER),
            (&BinaryName::THROWABLE, &BinaryName::OBJECT),
            (&BinaryName::EXCEPTION, &BinaryName::THROWABLE),
            (&BinaryName::RUNTIMEEXCEPTION, &BinaryName::EXCEPTION),
            (&BinaryName::ERROR, &BinaryName::THROWABLE),
            (&BinaryName::METHODHANDLE, &BinaryName::OBJECT),
            (&BinaryName::METHODTYPE, &BinaryName::OBJECT),
            (&BinaryName::REFLECT_METHOD, &BinaryName::OBJECT),
            (&BinaryName::SAVEDFRAME, &BinaryName::OBJECT),
        ];
        for (name, superclass) in classes {
            if self.classes.get(*name).is_none() {
                self.add_class(ClassData::new((*name).clone(), Some((*superclass).clone())));
            }
        }
    }

    /// Look up a class, resolving it from raw bytes if necessary
    pub fn lookup(&'g self, name: &BinaryName) -> Result<&'g ClassData, Error> {
        if let Some(data) = self.classes.get(name) {
            return Ok(data);
        }
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| Error::MissingClass(name.clone()))?;
        let bytes = resolver
            .class_body(name)
            .ok_or_else(|| Error::MissingClass(name.clone()))?;
        let summary = ClassSummary::parse(&bytes)?;
        let is_interface = summary.is_interface();
        Ok(self.add_class(ClassData {
            name: summary.this_class,
            superclass: summary.super_class,
            is_interface,
        }))
    }

    /// The name a frame should record for a reference of this class
    ///
    /// Interfaces collapse to `java/lang/Object`: the verifier-level type
    /// system treats interface types as `Object` and re-checks assignability
    /// at `invokeinterface` time, which is also what keeps the merge lattice
    /// finite over interface-heavy code.
    pub fn frame_class(&'g self, name: &BinaryName) -> Result<BinaryName, Error> {
        let data = self.lookup(name)?;
        if data.is_interface {
            Ok(BinaryName::OBJECT)
        } else {
            Ok(data.name.clone())
        }
    }

    /// Superclass chain, outermost first (`java/lang/Object` down to `name`)
    fn relation_chain(&'g self, name: &BinaryName) -> Result<Vec<BinaryName>, Error> {
        let mut chain = vec![name.clone()];
        let mut current = self.lookup(name)?;
        while let Some(superclass) = &current.superclass {
            chain.insert(0, superclass.clone());
            current = self.lookup(superclass)?;
        }
        Ok(chain)
    }

    /// Is `sub` the same class as `superclass` or one of its descendants?
    pub fn is_subclass(&'g self, sub: &BinaryName, superclass: &BinaryName) -> Result<bool, Error> {
        if superclass == &BinaryName::OBJECT {
            return Ok(true);
        }
        Ok(self.relation_chain(sub)?.contains(superclass))
    }

    /// Nearest common superclass of two classes
    ///
    /// Total because every class chain ends at `java/lang/Object`.
    pub fn common_superclass(
        &'g self,
        class1: &BinaryName,
        class2: &BinaryName,
    ) -> Result<BinaryName, Error> {
        let chain1 = self.relation_chain(class1)?;
        let mut candidate = self.lookup(class2)?;
        loop {
            if chain1.contains(&candidate.name) {
                return Ok(candidate.name.clone());
            }
            match &candidate.superclass {
                Some(superclass) => candidate = self.lookup(superclass)?,
                None => return Ok(BinaryName::OBJECT),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::Name;

    fn name(s: &str) -> BinaryName {
        BinaryName::from_str(s).unwrap()
    }

    #[test]
    fn subclass_queries() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        graph.insert_java_library_types();

        assert!(graph
            .is_subclass(&BinaryName::INTEGER, &BinaryName::NUMBER)
            .unwrap());
        assert!(graph
            .is_subclass(&BinaryName::INTEGER, &BinaryName::OBJECT)
            .unwrap());
        assert!(!graph
            .is_subclass(&BinaryName::NUMBER, &BinaryName::INTEGER)
            .unwrap());
        assert!(graph
            .is_subclass(&BinaryName::OBJECT, &BinaryName::OBJECT)
            .unwrap());
    }

    #[test]
    fn common_superclasses() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        graph.insert_java_library_types();

        assert_eq!(
            graph
                .common_superclass(&BinaryName::INTEGER, &BinaryName::NUMBER)
                .unwrap(),
            BinaryName::NUMBER
        );
        assert_eq!(
            graph
                .common_superclass(&BinaryName::INTEGER, &BinaryName::STRING)
                .unwrap(),
            BinaryName::OBJECT
        );
        assert_eq!(
            graph
                .common_superclass(&BinaryName::RUNTIMEEXCEPTION, &BinaryName::ERROR)
                .unwrap(),
            BinaryName::THROWABLE
        );
        assert_eq!(
            graph
                .common_superclass(&BinaryName::STRING, &BinaryName::STRING)
                .unwrap(),
            BinaryName::STRING
        );
    }

    #[test]
    fn user_hierarchy() {
        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::new(&arenas);
        graph.add_class(ClassData::new(name("a/Base"), Some(BinaryName::OBJECT)));
        graph.add_class(ClassData::new(name("a/Left"), Some(name("a/Base"))));
        graph.add_class(ClassData::new(name("a/Right"), Some(name("a/Base"))));

        assert!(graph.is_subclass(&name("a/Left"), &name("a/Base")).unwrap());
        assert_eq!(
            graph
                .common_superclass(&name("a/Left"), &name("a/Right"))
                .unwrap(),
            name("a/Base")
        );
        assert!(matches!(
            graph.lookup(&name("a/Unknown")),
            Err(Error::MissingClass(_))
        ));
    }

    #[test]
    fn resolves_from_class_bytes() {
        use crate::jvm::class_file::{ClassFile, ConstantsPool, Serialize, Version};
        use crate::jvm::ClassAccessFlags;
        use std::collections::HashMap;

        struct MapResolver(HashMap<String, Vec<u8>>);
        impl ClassBodyResolver for MapResolver {
            fn class_body(&self, name: &BinaryName) -> Option<Vec<u8>> {
                self.0.get(name.as_str()).cloned()
            }
        }

        let mut constants = ConstantsPool::new();
        let this_class = constants.get_class(&name("b/Widget")).unwrap();
        let super_class = constants.get_class(&BinaryName::OBJECT).unwrap();
        let class_file = ClassFile {
            version: Version::JAVA8,
            constants: constants.into_offset_vec(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class,
            interfaces: vec![],
            fields: vec![],
            methods: vec![],
            attributes: vec![],
        };
        let mut bytes = vec![];
        class_file.serialize(&mut bytes).unwrap();

        let mut bodies = HashMap::new();
        bodies.insert("b/Widget".to_string(), bytes);

        let arenas = ClassGraphArenas::new();
        let graph = ClassGraph::with_resolver(&arenas, Box::new(MapResolver(bodies)));
        graph.insert_java_library_types();
        assert!(graph
            .is_subclass(&name("b/Widget"), &BinaryName::OBJECT)
            .unwrap());
        assert_eq!(
            graph
                .common_superclass(&name("b/Widget"), &BinaryName::STRING)
                .unwrap(),
            BinaryName::OBJECT
        );
    }
}
