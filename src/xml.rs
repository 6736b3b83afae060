//! Streaming XML helpers shared by the connectors.
//!
//! Both sources are read with `quick_xml` in push style. Nesting is checked
//! here rather than by the reader so that a mismatched end tag surfaces as
//! [`LoadError::MalformedSource`] with the offending path.

use std::io::BufRead;

use quick_xml::events::{BytesCData, BytesStart, BytesText};
use quick_xml::Reader;

use crate::error::LoadError;

/// Build a reader configured for the connectors: empty elements expanded
/// into start/end pairs, end-name checking left to [`ElementPath`].
pub fn streaming_reader<R: BufRead>(input: R) -> Reader<R> {
    let mut reader = Reader::from_reader(input);
    let config = reader.config_mut();
    config.expand_empty_elements = true;
    config.check_end_names = false;
    reader
}

/// Explicit stack of open element names.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ElementPath {
    names: Vec<String>,
}

impl ElementPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: String) {
        self.names.push(name);
    }

    /// Close the innermost element, which must be `name`.
    pub fn pop(&mut self, name: &str) -> Result<(), LoadError> {
        match self.names.last() {
            Some(open) if open == name => {
                self.names.pop();
                Ok(())
            }
            Some(open) => Err(LoadError::MalformedSource(format!(
                "end tag </{}> does not match open element <{}> at /{}",
                name,
                open,
                self.names.join("/")
            ))),
            None => Err(LoadError::MalformedSource(format!(
                "end tag </{}> without an open element",
                name
            ))),
        }
    }

    pub fn depth(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Whether the full path equals `expected`.
    pub fn is(&self, expected: &[&str]) -> bool {
        matches_tokens(&self.names, expected)
    }

    /// Path below `prefix`, if the path starts with it.
    pub fn relative_to(&self, prefix: &[&str]) -> Option<&[String]> {
        if self.names.len() < prefix.len() || !matches_tokens(&self.names[..prefix.len()], prefix)
        {
            return None;
        }
        Some(&self.names[prefix.len()..])
    }

    /// Fail if elements are still open at end of input.
    pub fn ensure_closed(&self) -> Result<(), LoadError> {
        if self.names.is_empty() {
            return Ok(());
        }
        Err(LoadError::MalformedSource(format!(
            "document ended inside /{}",
            self.names.join("/")
        )))
    }
}

/// Token-wise comparison of an element path against string literals.
pub fn matches_tokens(names: &[String], expected: &[&str]) -> bool {
    names.len() == expected.len() && names.iter().zip(expected).all(|(a, b)| a == b)
}

pub fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

pub fn end_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

/// Value of attribute `name`, unescaped.
pub fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, LoadError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| LoadError::MalformedSource(err.to_string()))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = attr.unescape_value()?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// All attributes of an element as (name, value) pairs, in document order.
pub fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, LoadError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| LoadError::MalformedSource(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

pub fn text(e: &BytesText<'_>) -> Result<String, LoadError> {
    Ok(e.unescape()?.into_owned())
}

pub fn cdata(e: &BytesCData<'_>) -> String {
    String::from_utf8_lossy(e).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_requires_matching_name() {
        let mut path = ElementPath::new();
        path.push("Collection".into());
        path.push("DVD".into());
        assert!(path.is(&["Collection", "DVD"]));
        assert_eq!(
            path.relative_to(&["Collection"]).map(|r| r.len()),
            Some(1)
        );
        assert!(path.relative_to(&["Library"]).is_none());

        let err = path.pop("Title").unwrap_err();
        assert!(matches!(err, LoadError::MalformedSource(_)));
        assert_eq!(path.depth(), 2);
        path.pop("DVD").unwrap();
        path.pop("Collection").unwrap();
        assert!(path.pop("Collection").is_err());
    }

    #[test]
    fn unclosed_path_is_malformed() {
        let mut path = ElementPath::new();
        assert!(path.ensure_closed().is_ok());
        path.push("Collection".into());
        assert!(path.ensure_closed().is_err());
    }

    #[test]
    fn attributes_are_unescaped() {
        let mut reader = streaming_reader(&b"<Actor FirstName=\"Tom &amp; Co\" LastName='Hanks'/>"[..]);
        let mut buf = Vec::new();
        match reader.read_event_into(&mut buf).unwrap() {
            quick_xml::events::Event::Start(e) => {
                assert_eq!(element_name(&e), "Actor");
                assert_eq!(
                    attribute(&e, "FirstName").unwrap().as_deref(),
                    Some("Tom & Co")
                );
                assert_eq!(attribute(&e, "Missing").unwrap(), None);
                assert_eq!(attributes(&e).unwrap().len(), 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
