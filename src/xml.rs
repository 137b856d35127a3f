//! Small XML helpers for the fixed-shape fragments the protocol exchanges.
//!
//! Everything goes through the `quick-xml` event walker below. The walker
//! reports byte offsets of element content so signed regions can be digested
//! over the exact received bytes of the element the walk actually saw.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::errors::{SecurityError, SecurityResult};

/// One step of a depth-first walk. `path` always ends with the current element.
/// `content_start` and `content_end` are byte offsets into the walked
/// document delimiting the element's content; they are equal for a
/// self-closing element.
pub(crate) enum XmlEvent<'p> {
    Open {
        path: &'p [String],
        attributes: Vec<(String, String)>,
        content_start: usize,
    },
    Text {
        path: &'p [String],
        text: String,
    },
    Close {
        path: &'p [String],
        content_end: usize,
    },
}

fn malformed(err: impl std::fmt::Display) -> SecurityError {
    SecurityError::MalformedInput(format!("XML: {}", err))
}

fn element_name(start: &BytesStart<'_>) -> SecurityResult<String> {
    String::from_utf8(start.name().as_ref().to_vec()).map_err(malformed)
}

fn element_attributes(start: &BytesStart<'_>) -> SecurityResult<Vec<(String, String)>> {
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(malformed)?;
        let key = String::from_utf8(attribute.key.as_ref().to_vec()).map_err(malformed)?;
        let value = attribute.unescape_value().map_err(malformed)?.into_owned();
        attributes.push((key, value));
    }
    Ok(attributes)
}

/// Walk `xml`, calling `visit` for every element open, text node and close.
/// Self-closing elements produce an `Open` immediately followed by `Close`.
pub(crate) fn walk<F>(xml: &str, mut visit: F) -> SecurityResult<()>
where
    F: FnMut(XmlEvent<'_>) -> SecurityResult<()>,
{
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => {
                path.push(element_name(&start)?);
                let attributes = element_attributes(&start)?;
                visit(XmlEvent::Open {
                    path: &path,
                    attributes,
                    content_start: reader.buffer_position(),
                })?;
            }
            Event::Empty(start) => {
                path.push(element_name(&start)?);
                let attributes = element_attributes(&start)?;
                let position = reader.buffer_position();
                visit(XmlEvent::Open {
                    path: &path,
                    attributes,
                    content_start: position,
                })?;
                visit(XmlEvent::Close {
                    path: &path,
                    content_end: position,
                })?;
                path.pop();
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(malformed)?.into_owned();
                visit(XmlEvent::Text { path: &path, text })?;
            }
            Event::CData(data) => {
                let text = String::from_utf8(data.into_inner().into_owned()).map_err(malformed)?;
                visit(XmlEvent::Text { path: &path, text })?;
            }
            Event::End(_) => {
                let content_end = xml[..reader.buffer_position()]
                    .rfind("</")
                    .ok_or_else(|| malformed("end tag without opening bracket"))?;
                visit(XmlEvent::Close {
                    path: &path,
                    content_end,
                })?;
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if path.is_empty() {
        Ok(())
    } else {
        Err(malformed(format!("unclosed element {}", path.join("/"))))
    }
}

/// Local part of a possibly prefixed element name.
pub(crate) fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// True if `path` is exactly `expected`, compared by local name.
pub(crate) fn path_is(path: &[String], expected: &[&str]) -> bool {
    path.len() == expected.len() && path_ends_with(path, expected)
}

/// True if the tail of `path` matches `suffix` by local name.
pub(crate) fn path_ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(element, expected)| local_name(element) == *expected)
}

/// Raw text between the end of the opening tag of the first `<tag ...>` and
/// the first following `</tag>`. Only for trusted or already authenticated
/// fragments; received signed regions are located with [`walk`].
pub(crate) fn raw_inner<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut search_from = 0;
    let start = loop {
        let candidate = search_from + xml[search_from..].find(&open)?;
        let after = xml[candidate + open.len()..].chars().next()?;
        if after == '>' || after == '/' || after.is_whitespace() {
            break candidate;
        }
        search_from = candidate + open.len();
    };
    let content_start = start + xml[start..].find('>')? + 1;
    if xml[..content_start].ends_with("/>") {
        return Some("");
    }
    let content_end = content_start + xml[content_start..].find(&close)?;
    Some(&xml[content_start..content_end])
}

pub(crate) fn escape(text: &str) -> String {
    quick_xml::escape::escape(text).into_owned()
}

/// `<tag>escaped text</tag>`
pub(crate) fn text_element(tag: &str, text: &str) -> String {
    format!("<{}>{}</{}>", tag, escape(text), tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_inner_returns_exact_bytes() {
        let xml = "<a><Freshness xmlns=\"x\" us:Id=\"Freshness\"><b>1</b>  <c/></Freshness></a>";
        assert_eq!(raw_inner(xml, "Freshness"), Some("<b>1</b>  <c/>"));
    }

    #[test]
    fn test_raw_inner_skips_longer_tag_names() {
        let xml = "<SignedInfoX>no</SignedInfoX><SignedInfo>yes</SignedInfo>";
        assert_eq!(raw_inner(xml, "SignedInfo"), Some("yes"));
        assert_eq!(raw_inner(xml, "Missing"), None);
    }

    #[test]
    fn test_walk_reports_paths_and_text() {
        let mut seen = Vec::new();
        walk("<x:a><b attr=\"v\">t&amp;u</b><c/></x:a>", |event| {
            match event {
                XmlEvent::Open { path, attributes, .. } => {
                    seen.push(format!("open {} {:?}", path.join("/"), attributes))
                }
                XmlEvent::Text { path, text } => seen.push(format!("text {} {}", path.join("/"), text)),
                XmlEvent::Close { path, .. } => seen.push(format!("close {}", path.join("/"))),
            }
            Ok(())
        })
        .expect("Should walk well-formed XML");

        assert_eq!(
            seen,
            vec![
                "open x:a []",
                "open x:a/b [(\"attr\", \"v\")]",
                "text x:a/b t&u",
                "close x:a/b",
                "open x:a/c []",
                "close x:a/c",
                "close x:a",
            ]
        );
    }

    #[test]
    fn test_walk_offsets_follow_structure_not_text() {
        let xml = "<r><!-- <b>fake</b> --><b x=\"1\">real <i/></b><b/></r>";
        let mut spans = Vec::new();
        let mut start = 0;
        walk(xml, |event| {
            match event {
                XmlEvent::Open { path, content_start, .. } if path_is(path, &["r", "b"]) => {
                    start = content_start
                }
                XmlEvent::Close { path, content_end } if path_is(path, &["r", "b"]) => {
                    spans.push(&xml[start..content_end])
                }
                _ => {}
            }
            Ok(())
        })
        .expect("Should walk well-formed XML");

        assert_eq!(spans, vec!["real <i/>", ""]);
    }

    #[test]
    fn test_walk_rejects_mismatched_tags() {
        assert!(walk("<a><b></a>", |_| Ok(())).is_err());
        assert!(walk("<a>", |_| Ok(())).is_err());
    }

    #[test]
    fn test_path_suffix_ignores_prefixes() {
        let path = vec!["s:Header".to_string(), "SecurityInfo".to_string(), "ds:KeyName".to_string()];
        assert!(path_ends_with(&path, &["SecurityInfo", "KeyName"]));
        assert!(!path_ends_with(&path, &["KeyInfo", "KeyName"]));
    }
}
