//! XML fragment extraction and parsing for model output.
//!
//! LLM completions embed their structured part as a single `<response>`
//! element inside free-form text. [`extract_fragment`] pulls the element out
//! literally; [`parse_fragment`] converts it into a nested [`XmlValue`]
//! mapping that the response validators consume:
//!
//! - a leaf element with only text becomes the trimmed text (empty → null);
//! - a leaf with attributes becomes `{_text, _attributes}`;
//! - an element with children becomes a map keyed by child tag, repeated
//!   tags collapsing to an ordered list;
//! - mixed content stores the non-whitespace text under `_text`.

use std::collections::HashMap;

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("xml parse error: {0}")]
    Parse(String),

    #[error("invalid response: {0}")]
    Validation(String),

    #[error("no <{0}> fragment found in model output")]
    MissingFragment(String),
}

impl XmlError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum XmlValue {
    Null,
    Text(String),
    Map(HashMap<String, XmlValue>),
    List(Vec<XmlValue>),
}

impl XmlValue {
    pub fn get(&self, key: &str) -> Option<&XmlValue> {
        match self {
            XmlValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Text content of this value: a bare text node, or the `_text` entry of
    /// a mixed/attributed element.
    pub fn text_content(&self) -> Option<&str> {
        match self {
            XmlValue::Text(s) => Some(s),
            XmlValue::Map(map) => match map.get("_text") {
                Some(XmlValue::Text(s)) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    /// Text of a child element, if present.
    pub fn text_of(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(XmlValue::text_content)
    }

    /// Attribute value carried by this element.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.get("_attributes")
            .and_then(|attrs| attrs.get(name))
            .and_then(XmlValue::text_content)
    }

    /// A repeated child accepted uniformly in singleton / list / missing
    /// form.
    pub fn list_of(&self, key: &str) -> Vec<&XmlValue> {
        match self.get(key) {
            None | Some(XmlValue::Null) => Vec::new(),
            Some(XmlValue::List(items)) => items.iter().collect(),
            Some(single) => vec![single],
        }
    }
}

/// Locate the first `<tag …>…</tag>` substring, dot-matches-newline, and
/// return it literally.
pub fn extract_fragment(content: &str, tag: &str) -> Option<String> {
    let pattern = format!("(?s)<{0}[^>]*>.*?</{0}>", regex::escape(tag));
    let regex = Regex::new(&pattern).ok()?;
    regex.find(content).map(|m| m.as_str().to_string())
}

/// Parse an XML fragment into the nested mapping of its root element.
pub fn parse_fragment(input: &str) -> Result<XmlValue, XmlError> {
    let mut parser = Parser::new(input.trim());
    parser.skip_prolog();
    let (_, value) = parser.parse_element()?;
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.chars.get(self.pos + i) == Some(&c))
    }

    fn consume(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            self.pos += s.chars().count();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map(char::is_whitespace).unwrap_or(false) {
            self.pos += 1;
        }
    }

    fn skip_prolog(&mut self) {
        loop {
            self.skip_whitespace();
            if self.starts_with("<?") {
                while !self.consume("?>") {
                    if self.bump().is_none() {
                        return;
                    }
                }
            } else if self.starts_with("<!--") {
                self.skip_comment();
            } else {
                return;
            }
        }
    }

    fn skip_comment(&mut self) {
        self.consume("<!--");
        while !self.consume("-->") {
            if self.bump().is_none() {
                return;
            }
        }
    }

    fn parse_name(&mut self) -> Result<String, XmlError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(XmlError::Parse(format!(
                "expected a name at offset {}",
                self.pos
            )));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_attributes(&mut self) -> Result<HashMap<String, XmlValue>, XmlError> {
        let mut attrs = HashMap::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('>') | Some('/') | None => return Ok(attrs),
                _ => {}
            }
            let name = self.parse_name()?;
            self.skip_whitespace();
            if !self.consume("=") {
                return Err(XmlError::Parse(format!("attribute {name} missing '='")));
            }
            self.skip_whitespace();
            let quote = match self.bump() {
                Some(q @ ('"' | '\'')) => q,
                _ => {
                    return Err(XmlError::Parse(format!(
                        "attribute {name} value must be quoted"
                    )))
                }
            };
            let start = self.pos;
            while let Some(c) = self.peek() {
                if c == quote {
                    break;
                }
                self.pos += 1;
            }
            let raw: String = self.chars[start..self.pos].iter().collect();
            if self.bump() != Some(quote) {
                return Err(XmlError::Parse(format!("unterminated value for {name}")));
            }
            attrs.insert(name, XmlValue::Text(decode_entities(&raw)?));
        }
    }

    /// Parse one element; returns `(tag, value)`.
    fn parse_element(&mut self) -> Result<(String, XmlValue), XmlError> {
        if !self.consume("<") {
            return Err(XmlError::Parse(format!(
                "expected '<' at offset {}",
                self.pos
            )));
        }
        let name = self.parse_name()?;
        let attrs = self.parse_attributes()?;

        if self.consume("/>") {
            return Ok((name.clone(), element_value(attrs, Vec::new(), String::new())));
        }
        if !self.consume(">") {
            return Err(XmlError::Parse(format!("malformed start tag <{name}>")));
        }

        let mut children: Vec<(String, XmlValue)> = Vec::new();
        let mut text = String::new();

        loop {
            if self.starts_with("</") {
                self.consume("</");
                let closing = self.parse_name()?;
                self.skip_whitespace();
                if !self.consume(">") {
                    return Err(XmlError::Parse(format!("malformed end tag </{closing}>")));
                }
                if closing != name {
                    return Err(XmlError::Parse(format!(
                        "mismatched tags: <{name}> closed by </{closing}>"
                    )));
                }
                return Ok((name, element_value(attrs, children, text)));
            }
            if self.starts_with("<![CDATA[") {
                self.consume("<![CDATA[");
                let start = self.pos;
                while !self.starts_with("]]>") {
                    if self.bump().is_none() {
                        return Err(XmlError::Parse("unterminated CDATA section".to_string()));
                    }
                }
                text.push_str(&self.chars[start..self.pos].iter().collect::<String>());
                self.consume("]]>");
                continue;
            }
            if self.starts_with("<!--") {
                self.skip_comment();
                continue;
            }
            if self.starts_with("<") {
                let child = self.parse_element()?;
                children.push(child);
                continue;
            }
            match self.bump() {
                Some('&') => {
                    // Back up so the entity decoder sees the ampersand.
                    self.pos -= 1;
                    let entity = self.parse_entity()?;
                    text.push(entity);
                }
                Some(c) => text.push(c),
                None => {
                    return Err(XmlError::Parse(format!("unclosed element <{name}>")));
                }
            }
        }
    }

    fn parse_entity(&mut self) -> Result<char, XmlError> {
        let start = self.pos;
        self.consume("&");
        let mut entity = String::new();
        while let Some(c) = self.peek() {
            if c == ';' {
                break;
            }
            if entity.len() > 8 {
                break;
            }
            entity.push(c);
            self.pos += 1;
        }
        if !self.consume(";") {
            return Err(XmlError::Parse(format!(
                "malformed entity at offset {start}"
            )));
        }
        decode_entity(&entity)
    }
}

fn decode_entity(entity: &str) -> Result<char, XmlError> {
    match entity {
        "lt" => Ok('<'),
        "gt" => Ok('>'),
        "amp" => Ok('&'),
        "quot" => Ok('"'),
        "apos" => Ok('\''),
        _ => {
            let code = if let Some(hex) = entity.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse().ok()
            } else {
                None
            };
            code.and_then(char::from_u32)
                .ok_or_else(|| XmlError::Parse(format!("unknown entity &{entity};")))
        }
    }
}

fn decode_entities(raw: &str) -> Result<String, XmlError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let Some(end) = rest.find(';') else {
            return Err(XmlError::Parse("malformed entity in attribute".to_string()));
        };
        out.push(decode_entity(&rest[1..end])?);
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn element_value(
    attrs: HashMap<String, XmlValue>,
    children: Vec<(String, XmlValue)>,
    text: String,
) -> XmlValue {
    let trimmed = text.trim();

    if !children.is_empty() {
        let mut map: HashMap<String, XmlValue> = HashMap::new();
        for (tag, value) in children {
            match map.remove(&tag) {
                None => {
                    map.insert(tag, value);
                }
                Some(XmlValue::List(mut items)) => {
                    items.push(value);
                    map.insert(tag, XmlValue::List(items));
                }
                Some(existing) => {
                    map.insert(tag, XmlValue::List(vec![existing, value]));
                }
            }
        }
        if !trimmed.is_empty() {
            map.insert("_text".to_string(), XmlValue::Text(trimmed.to_string()));
        }
        if !attrs.is_empty() {
            map.insert("_attributes".to_string(), XmlValue::Map(attrs));
        }
        return XmlValue::Map(map);
    }

    if !attrs.is_empty() {
        let mut map = HashMap::new();
        map.insert("_text".to_string(), XmlValue::Text(trimmed.to_string()));
        map.insert("_attributes".to_string(), XmlValue::Map(attrs));
        return XmlValue::Map(map);
    }

    if trimmed.is_empty() {
        XmlValue::Null
    } else {
        XmlValue::Text(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_finds_the_first_matching_element() {
        let content = "前导文字\n<response>\n<name>方案</name>\n</response>\n结尾";
        let fragment = extract_fragment(content, "response").unwrap();
        assert!(fragment.starts_with("<response>"));
        assert!(fragment.ends_with("</response>"));
        assert!(fragment.contains("方案"));
    }

    #[test]
    fn extract_spans_newlines_and_attributes() {
        let content = "x <decision type=\"reply\">\nabc\n</decision> y";
        let fragment = extract_fragment(content, "decision").unwrap();
        assert_eq!(fragment, "<decision type=\"reply\">\nabc\n</decision>");
    }

    #[test]
    fn extract_returns_none_when_absent() {
        assert!(extract_fragment("no xml here", "response").is_none());
    }

    #[test]
    fn leaf_with_text_becomes_trimmed_text() {
        let value = parse_fragment("<response><name>  标题  </name></response>").unwrap();
        assert_eq!(value.text_of("name"), Some("标题"));
    }

    #[test]
    fn empty_leaf_becomes_null() {
        let value = parse_fragment("<response><research_plan>\n  \n</research_plan></response>")
            .unwrap();
        assert_eq!(value.get("research_plan"), Some(&XmlValue::Null));
    }

    #[test]
    fn leaf_with_attributes_keeps_text_and_attributes() {
        let value =
            parse_fragment("<response><step type=\"conditional\">是否可行</step></response>")
                .unwrap();
        let step = value.get("step").unwrap();
        assert_eq!(step.attr("type"), Some("conditional"));
        assert_eq!(step.text_content(), Some("是否可行"));
    }

    #[test]
    fn repeated_tags_collapse_to_an_ordered_list() {
        let value = parse_fragment(
            "<plan><sub_problem>一</sub_problem><sub_problem>二</sub_problem><sub_problem>三</sub_problem></plan>",
        )
        .unwrap();
        let items = value.list_of("sub_problem");
        let texts: Vec<_> = items.iter().filter_map(|v| v.text_content()).collect();
        assert_eq!(texts, vec!["一", "二", "三"]);
    }

    #[test]
    fn singleton_and_missing_forms_are_uniform() {
        let single = parse_fragment("<plan><sub_problem>一</sub_problem></plan>").unwrap();
        assert_eq!(single.list_of("sub_problem").len(), 1);

        let missing = parse_fragment("<plan><other>x</other></plan>").unwrap();
        assert!(missing.list_of("sub_problem").is_empty());
    }

    #[test]
    fn mixed_content_stores_text_under_underscore_text() {
        let value = parse_fragment("<a>外层文字<b>内层</b></a>").unwrap();
        assert_eq!(value.text_content(), Some("外层文字"));
        assert_eq!(value.text_of("b"), Some("内层"));
    }

    #[test]
    fn cdata_text_is_taken_verbatim() {
        let value =
            parse_fragment("<a><name><![CDATA[含有 <标签> 与 & 符号]]></name></a>").unwrap();
        assert_eq!(value.text_of("name"), Some("含有 <标签> 与 & 符号"));
    }

    #[test]
    fn entities_are_decoded() {
        let value = parse_fragment("<a><t>1 &lt; 2 &amp;&amp; 3 &gt; 2</t></a>").unwrap();
        assert_eq!(value.text_of("t"), Some("1 < 2 && 3 > 2"));
    }

    #[test]
    fn nested_structure_with_attributes() {
        let fragment = r#"<response>
<decision type="accept">
<reasoning>理由</reasoning>
<modification_plan>计划</modification_plan>
</decision>
</response>"#;
        let value = parse_fragment(fragment).unwrap();
        let decision = value.get("decision").unwrap();
        assert_eq!(decision.attr("type"), Some("accept"));
        assert_eq!(decision.text_of("reasoning"), Some("理由"));
        assert_eq!(decision.text_of("modification_plan"), Some("计划"));
    }

    #[test]
    fn comments_and_prolog_are_skipped() {
        let fragment = "<?xml version=\"1.0\"?>\n<!-- 注释 -->\n<a><b>x</b><!-- 中间 --></a>";
        let value = parse_fragment(fragment).unwrap();
        assert_eq!(value.text_of("b"), Some("x"));
    }

    #[test]
    fn self_closing_element_is_null() {
        let value = parse_fragment("<a><b/><c>x</c></a>").unwrap();
        assert_eq!(value.get("b"), Some(&XmlValue::Null));
    }

    #[test]
    fn mismatched_tags_fail_with_a_diagnostic() {
        let err = parse_fragment("<a><b>x</c></a>").unwrap_err();
        assert!(matches!(err, XmlError::Parse(_)));
        assert!(err.to_string().contains("mismatched"));
    }

    #[test]
    fn unclosed_element_fails() {
        assert!(parse_fragment("<a><b>x</b>").is_err());
    }
}
