//! Protocol revisions and the server's self-reported version.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EwsError, EwsResult};
use crate::xml::{XmlNamespace, XmlReader};

/// The schema revisions a request may target, oldest first.
///
/// Ordering follows release order, so `requested >= minimum` is the
/// version-gate test.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServerVersion {
    /// Exchange 2007 Service Pack 1, the oldest supported generation.
    Exchange2007_SP1,
    /// Exchange 2010.
    Exchange2010,
    /// Exchange 2010 Service Pack 1.
    Exchange2010_SP1,
    /// Exchange 2010 Service Pack 2.
    Exchange2010_SP2,
    /// Exchange 2013.
    Exchange2013,
    /// Exchange 2013 Service Pack 1.
    Exchange2013_SP1,
    /// Exchange 2016 and Exchange Online.
    Exchange2016,
}

impl ServerVersion {
    /// The oldest generation this client can talk to.
    pub const OLDEST: Self = Self::Exchange2007_SP1;

    /// The wire name used in `RequestServerVersion@Version`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exchange2007_SP1 => "Exchange2007_SP1",
            Self::Exchange2010 => "Exchange2010",
            Self::Exchange2010_SP1 => "Exchange2010_SP1",
            Self::Exchange2010_SP2 => "Exchange2010_SP2",
            Self::Exchange2013 => "Exchange2013",
            Self::Exchange2013_SP1 => "Exchange2013_SP1",
            Self::Exchange2016 => "Exchange2016",
        }
    }

    /// Returns `true` if this is the oldest supported generation.
    pub fn is_oldest(self) -> bool {
        self == Self::OLDEST
    }
}

impl Default for ServerVersion {
    fn default() -> Self {
        Self::Exchange2013_SP1
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerVersion {
    type Err = EwsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Exchange2007_SP1" => Ok(Self::Exchange2007_SP1),
            "Exchange2010" => Ok(Self::Exchange2010),
            "Exchange2010_SP1" => Ok(Self::Exchange2010_SP1),
            "Exchange2010_SP2" => Ok(Self::Exchange2010_SP2),
            "Exchange2013" => Ok(Self::Exchange2013),
            "Exchange2013_SP1" => Ok(Self::Exchange2013_SP1),
            "Exchange2016" => Ok(Self::Exchange2016),
            other => Err(EwsError::Validation(format!(
                "unknown server version {other:?}"
            ))),
        }
    }
}

crate::xml_value_from_str!(ServerVersion);

/// The version information a server reports in `t:ServerVersionInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVersionInfo {
    /// Major product version.
    pub major_version: Option<u32>,
    /// Minor product version.
    pub minor_version: Option<u32>,
    /// Major build number.
    pub major_build_number: Option<u32>,
    /// Minor build number.
    pub minor_build_number: Option<u32>,
    /// Schema version string, such as `V2_23` or `Exchange2013_SP1`.
    pub version: Option<String>,
}

impl ServerVersionInfo {
    /// Reads the attributes of a `t:ServerVersionInfo` element and leaves it.
    pub fn read(reader: &mut XmlReader) -> EwsResult<Self> {
        reader.read_start_element(XmlNamespace::Types, "ServerVersionInfo")?;
        let info = Self {
            major_version: reader.read_optional_attribute("MajorVersion")?,
            minor_version: reader.read_optional_attribute("MinorVersion")?,
            major_build_number: reader.read_optional_attribute("MajorBuildNumber")?,
            minor_build_number: reader.read_optional_attribute("MinorBuildNumber")?,
            version: reader.read_optional_attribute("Version")?,
        };
        reader.skip_current_element()?;
        Ok(info)
    }

    /// The schema version, if the server reported a known one.
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.version.as_deref().and_then(|v| v.parse().ok())
    }
}

impl fmt::Display for ServerVersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |value: Option<u32>| value.map_or_else(|| "?".to_string(), |v| v.to_string());
        write!(
            f,
            "{}.{}.{}.{}",
            part(self.major_version),
            part(self.minor_version),
            part(self.major_build_number),
            part(self.minor_build_number)
        )?;
        if let Some(version) = &self.version {
            write!(f, " ({version})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_order() {
        assert!(ServerVersion::Exchange2007_SP1 < ServerVersion::Exchange2010);
        assert!(ServerVersion::Exchange2010_SP2 < ServerVersion::Exchange2013);
        assert!(ServerVersion::Exchange2013_SP1 < ServerVersion::Exchange2016);
        assert!(ServerVersion::OLDEST.is_oldest());
    }

    #[test]
    fn test_wire_names() {
        for version in [
            ServerVersion::Exchange2007_SP1,
            ServerVersion::Exchange2010_SP1,
            ServerVersion::Exchange2016,
        ] {
            assert_eq!(version.as_str().parse::<ServerVersion>().unwrap(), version);
        }
        assert!("Exchange2003".parse::<ServerVersion>().is_err());
    }

    #[test]
    fn test_read_server_version_info() {
        let xml = br#"<h:ServerVersionInfo xmlns:h="http://schemas.microsoft.com/exchange/services/2006/types" MajorVersion="15" MinorVersion="1" MajorBuildNumber="2507" MinorBuildNumber="6" Version="V2017_07_11"/>"#;
        let mut reader = XmlReader::parse(xml).unwrap();
        let info = ServerVersionInfo::read(&mut reader).unwrap();

        assert_eq!(info.major_version, Some(15));
        assert_eq!(info.major_build_number, Some(2507));
        assert_eq!(info.version.as_deref(), Some("V2017_07_11"));
        assert_eq!(info.server_version(), None);
        assert_eq!(info.to_string(), "15.1.2507.6 (V2017_07_11)");
        assert!(!reader.has_more());
    }
}
