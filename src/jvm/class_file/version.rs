use super::Serialize;
use byteorder::WriteBytesExt;

/// Class file version
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html#jvms-4.1-200-B.2
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Version {
    pub minor: u16,
    pub major: u16,
}

impl Version {
    pub const JAVA8: Version = Version {
        minor: 0,
        major: 52,
    };
    pub const JAVA11: Version = Version {
        minor: 0,
        major: 55,
    };
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.minor.serialize(writer)?;
        self.major.serialize(writer)?;
        Ok(())
    }
}
