//! Minimal XML scanning for NETCONF envelopes.
//!
//! The engine only needs element names, a handful of attributes and the
//! text of a few well-known elements. [`Document::parse`] walks the tags of
//! a message, checks that they are balanced and properly nested under a
//! single root, and records every element with its byte span so callers can
//! slice inner content. Payload schemas are not interpreted.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::NetconfError;

/// Start, end or empty-element tag at the beginning of the haystack.
static TAG: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(
        r#"^<(/?)(?:([A-Za-z_][\w.\-]*):)?([A-Za-z_][\w.\-]*)((?:\s+[^\s=/>]+\s*=\s*(?:"[^"]*"|'[^']*'))*)\s*(/?)>"#,
    ) {
        Ok(re) => re,
        Err(err) => panic!("invalid TAG regex: {err}"),
    }
});

/// One `name="value"` pair inside a tag.
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r#"([^\s=/>]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#) {
        Ok(re) => re,
        Err(err) => panic!("invalid ATTRIBUTE regex: {err}"),
    }
});

/// An element found while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Local name, without namespace prefix.
    pub name: String,
    /// Nesting depth; the root is 0.
    pub depth: usize,
    /// Attributes as written, values unescaped.
    pub attributes: Vec<(String, String)>,
    /// Span of the content between start and end tag. Empty for `<x/>`.
    pub inner: Range<usize>,
}

impl Element {
    /// Looks up an attribute by local name, ignoring any prefix.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find_map(|(key, value)| {
            let local = key.rsplit(':').next().unwrap_or(key);
            (local == name).then_some(value.as_str())
        })
    }
}

/// A scanned, well-formed XML document.
#[derive(Debug, Clone)]
pub struct Document<'a> {
    source: &'a str,
    elements: Vec<Element>,
}

impl<'a> Document<'a> {
    /// Scans `source`, failing with [`NetconfError::ProtocolContent`] unless
    /// it holds exactly one properly nested root element.
    pub fn parse(source: &'a str) -> Result<Self, NetconfError> {
        let mut elements: Vec<Element> = Vec::new();
        // (qualified name, index into elements)
        let mut open: Vec<(String, usize)> = Vec::new();
        let mut roots = 0usize;
        let mut pos = 0usize;

        while pos < source.len() {
            let rest = &source[pos..];
            let Some(lt) = rest.find('<') else {
                check_text(rest, open.is_empty())?;
                break;
            };
            check_text(&rest[..lt], open.is_empty())?;
            pos += lt;
            let rest = &source[pos..];

            if rest.starts_with("<?") {
                pos += skip_past(rest, "?>", "processing instruction")?;
                continue;
            }
            if rest.starts_with("<!--") {
                pos += skip_past(rest, "-->", "comment")?;
                continue;
            }
            if rest.starts_with("<![CDATA[") {
                if open.is_empty() {
                    return Err(malformed("character data outside the root element"));
                }
                pos += skip_past(rest, "]]>", "CDATA section")?;
                continue;
            }
            if rest.starts_with("<!") {
                return Err(malformed("document type declarations are not allowed"));
            }

            let caps = TAG
                .captures(rest)
                .ok_or_else(|| malformed("invalid tag"))?;
            let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
            let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
            let empty = caps.get(5).is_some_and(|m| !m.as_str().is_empty());
            let local = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
            let qualified = match caps.get(2) {
                Some(prefix) => format!("{}:{}", prefix.as_str(), local),
                None => local.to_string(),
            };
            let attr_text = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
            let tag_end = pos + whole;

            if closing {
                if empty || !attr_text.trim().is_empty() {
                    return Err(malformed("invalid end tag"));
                }
                let Some((expected, index)) = open.pop() else {
                    return Err(malformed(&format!("unexpected end tag </{qualified}>")));
                };
                if expected != qualified {
                    return Err(malformed(&format!(
                        "end tag </{qualified}> does not match <{expected}>"
                    )));
                }
                elements[index].inner.end = pos;
            } else {
                if open.is_empty() {
                    roots += 1;
                    if roots > 1 {
                        return Err(malformed("more than one root element"));
                    }
                }
                elements.push(Element {
                    name: local.to_string(),
                    depth: open.len(),
                    attributes: parse_attributes(attr_text),
                    inner: tag_end..tag_end,
                });
                if !empty {
                    open.push((qualified, elements.len() - 1));
                }
            }
            pos = tag_end;
        }

        if let Some((name, _)) = open.last() {
            return Err(malformed(&format!("unclosed element <{name}>")));
        }
        if roots == 0 {
            return Err(malformed("no root element"));
        }
        Ok(Self { source, elements })
    }

    /// The root element.
    pub fn root(&self) -> &Element {
        // parse() guarantees at least one element and the first one is the root.
        &self.elements[0]
    }

    /// All elements in document order.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// First element with the given local name.
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|el| el.name == name)
    }

    /// Every element with the given local name.
    pub fn find_all<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'s Element> + 's {
        self.elements.iter().filter(move |el| el.name == name)
    }

    /// Elements nested anywhere below `parent`.
    pub fn descendants<'s>(&'s self, parent: &'s Element) -> impl Iterator<Item = &'s Element> + 's {
        self.elements.iter().filter(move |el| {
            el.depth > parent.depth
                && el.inner.start >= parent.inner.start
                && el.inner.end <= parent.inner.end
                && !parent.inner.is_empty()
        })
    }

    /// Raw content between the element's tags.
    pub fn inner_xml(&self, element: &Element) -> &'a str {
        &self.source[element.inner.clone()]
    }

    /// Trimmed, unescaped text content of an element.
    pub fn text(&self, element: &Element) -> String {
        unescape(self.inner_xml(element).trim())
    }

    /// Text of the first element with the given local name.
    pub fn text_of(&self, name: &str) -> Option<String> {
        self.find(name).map(|el| self.text(el))
    }
}

/// Escapes text for use in element content or attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverses [`escape`] for the predefined entities.
pub fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn parse_attributes(text: &str) -> Vec<(String, String)> {
    ATTRIBUTE
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_string();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str();
            Some((name, unescape(value)))
        })
        .collect()
}

fn check_text(text: &str, outside_root: bool) -> Result<(), NetconfError> {
    if outside_root && !text.trim().is_empty() {
        return Err(malformed("text outside the root element"));
    }
    Ok(())
}

fn skip_past(rest: &str, terminator: &str, what: &str) -> Result<usize, NetconfError> {
    rest.find(terminator)
        .map(|idx| idx + terminator.len())
        .ok_or_else(|| malformed(&format!("unterminated {what}")))
}

fn malformed(reason: &str) -> NetconfError {
    NetconfError::ProtocolContent(format!("malformed xml: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_nested_elements_with_prefixes() {
        let xml = r#"<?xml version="1.0"?>
<nc:rpc-reply xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" nc:message-id="42">
  <!-- comment -->
  <nc:data><system><hostname>r1</hostname></system></nc:data>
</nc:rpc-reply>"#;
        let doc = Document::parse(xml).expect("well formed");
        assert_eq!(doc.root().name, "rpc-reply");
        assert_eq!(doc.root().attribute("message-id"), Some("42"));
        assert_eq!(doc.text_of("hostname").as_deref(), Some("r1"));
        let data = doc.find("data").expect("data element");
        assert_eq!(
            doc.inner_xml(data),
            "<system><hostname>r1</hostname></system>"
        );
        assert_eq!(doc.descendants(data).count(), 2);
    }

    #[test]
    fn empty_elements_and_cdata_are_accepted() {
        let doc = Document::parse("<a><b/><c><![CDATA[<not-a-tag>]]></c></a>")
            .expect("well formed");
        assert_eq!(doc.elements().len(), 3);
        assert!(doc.find("b").expect("b").inner.is_empty());
    }

    #[test]
    fn rejects_mismatched_and_unclosed_tags() {
        assert!(Document::parse("<a><b></a></b>").is_err());
        assert!(Document::parse("<a><b></b>").is_err());
        assert!(Document::parse("</a>").is_err());
        assert!(Document::parse("<a></a><b/>").is_err());
        assert!(Document::parse("just text").is_err());
        assert!(Document::parse("").is_err());
        assert!(Document::parse("<a attr=unquoted></a>").is_err());
    }

    #[test]
    fn rejects_doctype() {
        let err = Document::parse("<!DOCTYPE x><x/>").expect_err("doctype");
        assert!(matches!(err, NetconfError::ProtocolContent(_)));
    }

    #[test]
    fn escape_round_trips_predefined_entities() {
        let raw = r#"urn:x?module=a&revision=<1>"'"#;
        assert_eq!(unescape(&escape(raw)), raw);
        assert_eq!(escape("a&b"), "a&amp;b");
    }
}
