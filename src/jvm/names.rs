use std::borrow::Cow;
use std::fmt::{Debug, Error as FmtError, Formatter};

/// Names of methods and fields
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.2>
#[derive(Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct UnqualifiedName(Cow<'static, str>);

/// Names of classes and interfaces
///
/// See <https://docs.oracle.com/javase/specs/jvms/se16/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct BinaryName(Cow<'static, str>);

impl AsRef<str> for UnqualifiedName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl AsRef<str> for BinaryName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

pub trait Name: Sized {
    /// Check if a string would be a valid name
    fn check_valid(name: impl AsRef<str>) -> Result<(), String>;

    /// Extract the raw underlying string data
    fn as_cow(&self) -> &Cow<'static, str>;

    /// Extract the raw underlying string name
    fn as_str(&self) -> &str {
        self.as_cow().as_ref()
    }

    /// Try to construct a name from a string
    fn from_string(name: String) -> Result<Self, String>;

    fn from_str(name: &str) -> Result<Self, String> {
        Self::from_string(name.to_string())
    }
}

impl Name for UnqualifiedName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.contains(&['.', ';', '[', '/'][..]) {
            Err(format!(
                "Unqualified name '{}' contains an illegal character",
                name
            ))
        } else if name.is_empty() {
            Err(String::from("Unqualified name is empty"))
        } else {
            Ok(())
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        match Self::check_valid(&name) {
            Ok(()) => Ok(UnqualifiedName(Cow::Owned(name))),
            Err(msg) => Err(msg),
        }
    }
}

impl Name for BinaryName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.is_empty() {
            Err(String::from("Binary name is empty"))
        } else {
            name.split('/').map(UnqualifiedName::check_valid).collect()
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        match Self::check_valid(&name) {
            Ok(()) => Ok(BinaryName(Cow::Owned(name))),
            Err(msg) => Err(msg),
        }
    }
}

impl Debug for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl Debug for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl UnqualifiedName {
    const fn name(value: &'static str) -> UnqualifiedName {
        UnqualifiedName(Cow::Borrowed(value))
    }

    /// Field name of the `n`th saved value on a generated record
    pub fn record_field(n: usize) -> UnqualifiedName {
        UnqualifiedName(Cow::Owned(format!("_{}", n)))
    }

    // Special unqualified names - only these may contain angle brackets
    pub const INIT: Self = Self::name("<init>");
    pub const CLINIT: Self = Self::name("<clinit>");

    // JDK names
    pub const INVOKE: Self = Self::name("invoke");

    // Runtime entry points referenced by rewritten methods
    pub const DISPATCHTARGET: Self = Self::name("dispatchTarget");
    pub const ISSUSPENDING: Self = Self::name("isSuspending");
    pub const POPFRAME: Self = Self::name("popFrame");
    pub const PUSHFRAME: Self = Self::name("pushFrame");
    pub const INVOKEREFLECTIVE: Self = Self::name("invokeReflective");

    // Field holding the dispatch number on every saved-frame record
    pub const POINTCUT: Self = Self::name("pointcut");
}

impl BinaryName {
    const fn name(value: &'static str) -> BinaryName {
        BinaryName(Cow::Borrowed(value))
    }

    // JDK names
    pub const CLASS: Self = Self::name("java/lang/Class");
    pub const CLONEABLE: Self = Self::name("java/lang/Cloneable");
    pub const ERROR: Self = Self::name("java/lang/Error");
    pub const EXCEPTION: Self = Self::name("java/lang/Exception");
    pub const INTEGER: Self = Self::name("java/lang/Integer");
    pub const METHODHANDLE: Self = Self::name("java/lang/invoke/MethodHandle");
    pub const METHODTYPE: Self = Self::name("java/lang/invoke/MethodType");
    pub const NUMBER: Self = Self::name("java/lang/Number");
    pub const OBJECT: Self = Self::name("java/lang/Object");
    pub const REFLECT_METHOD: Self = Self::name("java/lang/reflect/Method");
    pub const RUNTIMEEXCEPTION: Self = Self::name("java/lang/RuntimeException");
    pub const SERIALIZABLE: Self = Self::name("java/io/Serializable");
    pub const STRING: Self = Self::name("java/lang/String");
    pub const THROWABLE: Self = Self::name("java/lang/Throwable");

    // Names we generate against
    pub const CONTINUATION: Self = Self::name("classflow/runtime/Continuation");
    pub const SAVEDFRAME: Self = Self::name("classflow/runtime/SavedFrame");

    /// Name of the generated record class for a live-type signature hash
    pub fn saved_frame_record(hash_hex: &str) -> BinaryName {
        BinaryName(Cow::Owned(format!(
            "{}${}",
            Self::SAVEDFRAME.as_str(),
            hash_hex
        )))
    }

    /// Does this name live under the runtime's own package?
    pub fn is_runtime_class(&self) -> bool {
        self.as_str().starts_with("classflow/runtime/")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(BinaryName::from_str("java/lang/Object").is_ok());
        assert!(BinaryName::from_str("Lone").is_ok());
        assert!(UnqualifiedName::from_str("counter").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(BinaryName::from_str("").is_err());
        assert!(BinaryName::from_str("java//lang").is_err());
        assert!(UnqualifiedName::from_str("a.b").is_err());
        assert!(UnqualifiedName::from_str("a/b").is_err());
    }

    #[test]
    fn record_names() {
        assert_eq!(
            BinaryName::saved_frame_record("ab12").as_str(),
            "classflow/runtime/SavedFrame$ab12"
        );
        assert!(BinaryName::SAVEDFRAME.is_runtime_class());
        assert!(!BinaryName::OBJECT.is_runtime_class());
    }
}
