//! Conversion between element/attribute text and typed values.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// A value that can be read from and written to XML text.
pub trait XmlValue: Sized {
    /// Parses the text content of an element or attribute.
    fn parse_xml(text: &str) -> Result<Self, String>;

    /// Renders the value as element or attribute text.
    fn to_xml(&self) -> String;
}

impl XmlValue for String {
    fn parse_xml(text: &str) -> Result<Self, String> {
        Ok(text.to_string())
    }

    fn to_xml(&self) -> String {
        self.clone()
    }
}

impl XmlValue for bool {
    fn parse_xml(text: &str) -> Result<Self, String> {
        match text.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(format!("not an xs:boolean: {other:?}")),
        }
    }

    fn to_xml(&self) -> String {
        String::from(if *self { "true" } else { "false" })
    }
}

impl XmlValue for DateTime<Utc> {
    fn parse_xml(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Ok(parsed.with_timezone(&Utc));
        }
        // xs:dateTime without an offset is read as UTC
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| e.to_string())
    }

    fn to_xml(&self) -> String {
        self.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

/// Implements [`XmlValue`] through `FromStr` and `Display`.
///
/// Used for the integer types and for the protocol's wire-named enums.
#[macro_export]
macro_rules! xml_value_from_str {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::xml::XmlValue for $ty {
                fn parse_xml(text: &str) -> ::std::result::Result<Self, ::std::string::String> {
                    text.trim()
                        .parse::<$ty>()
                        .map_err(|e| ::std::string::ToString::to_string(&e))
                }

                fn to_xml(&self) -> ::std::string::String {
                    ::std::string::ToString::to_string(self)
                }
            }
        )*
    };
}

xml_value_from_str!(i32, i64, u8, u16, u32, u64, usize);

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bool_accepts_numeric_forms() {
        assert!(bool::parse_xml("1").unwrap());
        assert!(!bool::parse_xml(" false ").unwrap());
        assert!(bool::parse_xml("yes").is_err());
    }

    #[test]
    fn test_datetime_with_and_without_offset() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(
            DateTime::<Utc>::parse_xml("2024-03-01T12:30:00Z").unwrap(),
            expected
        );
        assert_eq!(
            DateTime::<Utc>::parse_xml("2024-03-01T14:30:00+02:00").unwrap(),
            expected
        );
        assert_eq!(
            DateTime::<Utc>::parse_xml("2024-03-01T12:30:00").unwrap(),
            expected
        );
        assert_eq!(expected.to_xml(), "2024-03-01T12:30:00Z");
    }

    #[test]
    fn test_integer_trims_whitespace() {
        assert_eq!(u32::parse_xml(" 42\n").unwrap(), 42);
        assert!(u32::parse_xml("-1").is_err());
    }
}
