//! Structural locator engine
//!
//! Parses and evaluates the subset of CSS selector syntax that locators are
//! built from:
//! - type (`div`) and universal (`*`) selectors
//! - `#id`, `.class`, `[attr]`, `[attr=value]`
//! - `:nth-child(n)` with a plain positive integer
//! - child (`>`) and descendant (whitespace) combinators
//!
//! Identifiers accept CSS backslash escapes, and [`css_escape`] produces them,
//! so any id or class string survives the encode/parse trip.

use super::{descendants, sibling_index, Document, NodeId};
use std::fmt::Write as _;
use std::str::FromStr;
use thiserror::Error;

/// Why a locator string could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("unexpected {found:?} at offset {offset}")]
    Unexpected { found: char, offset: usize },
    #[error("unexpected end of selector")]
    UnexpectedEnd,
    #[error("unsupported pseudo-class :{0}")]
    UnsupportedPseudo(String),
    #[error("invalid :nth-child argument {0:?}")]
    InvalidNth(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeMatch {
    name: String,
    value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    positions: Vec<usize>,
    attributes: Vec<AttributeMatch>,
}

/// A parsed locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    compounds: Vec<Compound>,
    /// `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`
    combinators: Vec<Combinator>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        Parser::new(input).parse()
    }

    /// Whether `node` is matched by this selector
    pub fn matches<D: Document + ?Sized>(&self, doc: &D, node: NodeId) -> bool {
        match self.compounds.len() {
            0 => false,
            n => self.matches_at(doc, node, n - 1),
        }
    }

    fn matches_at<D: Document + ?Sized>(&self, doc: &D, node: NodeId, index: usize) -> bool {
        if !compound_matches(doc, node, &self.compounds[index]) {
            return false;
        }
        if index == 0 {
            return true;
        }
        match self.combinators[index - 1] {
            Combinator::Child => doc
                .parent(node)
                .is_some_and(|parent| self.matches_at(doc, parent, index - 1)),
            Combinator::Descendant => {
                let mut current = doc.parent(node);
                while let Some(ancestor) = current {
                    if self.matches_at(doc, ancestor, index - 1) {
                        return true;
                    }
                    current = doc.parent(ancestor);
                }
                false
            }
        }
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn compound_matches<D: Document + ?Sized>(doc: &D, node: NodeId, compound: &Compound) -> bool {
    if let Some(tag) = &compound.tag {
        if !doc.tag_name(node).eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    if compound
        .ids
        .iter()
        .any(|id| doc.element_id(node) != Some(id.as_str()))
    {
        return false;
    }
    let classes = doc.class_list(node);
    if !compound
        .classes
        .iter()
        .all(|wanted| classes.iter().any(|c| c == wanted))
    {
        return false;
    }
    if !compound.positions.is_empty() {
        let position = sibling_index(doc, node).map(|i| i + 1);
        if compound.positions.iter().any(|p| position != Some(*p)) {
            return false;
        }
    }
    compound.attributes.iter().all(|attr| {
        match (doc.attribute(node, &attr.name), &attr.value) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
        }
    })
}

/// Every connected element matching `selector`, in document order
pub fn query_selector_all<D: Document + ?Sized>(doc: &D, selector: &Selector) -> Vec<NodeId> {
    descendants(doc)
        .into_iter()
        .filter(|node| selector.matches(doc, *node))
        .collect()
}

/// First connected element matching `selector`, in document order
pub fn query_selector<D: Document + ?Sized>(doc: &D, selector: &Selector) -> Option<NodeId> {
    descendants(doc)
        .into_iter()
        .find(|node| selector.matches(doc, *node))
}

/// Serialize a string as a CSS identifier (the `CSS.escape()` algorithm)
pub fn css_escape(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    for (i, &ch) in chars.iter().enumerate() {
        let code = ch as u32;
        if code == 0 {
            out.push('\u{FFFD}');
        } else if (0x01..=0x1f).contains(&code)
            || code == 0x7f
            || (i == 0 && ch.is_ascii_digit())
            || (i == 1 && ch.is_ascii_digit() && chars[0] == '-')
        {
            let _ = write!(out, "\\{:x} ", code);
        } else if i == 0 && ch == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if code >= 0x80 || ch == '-' || ch == '_' || ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else {
            out.push('\\');
            out.push(ch);
        }
    }
    out
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || ch == '-' || ch == '\\' || !ch.is_ascii()
}

fn is_ident_char(ch: char) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
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

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn unexpected(&self) -> SelectorError {
        match self.peek() {
            Some(found) => SelectorError::Unexpected {
                found,
                offset: self.pos,
            },
            None => SelectorError::UnexpectedEnd,
        }
    }

    /// Returns whether any whitespace was consumed
    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn expect(&mut self, ch: char) -> Result<(), SelectorError> {
        if self.peek() == Some(ch) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn parse(mut self) -> Result<Selector, SelectorError> {
        self.skip_ws();
        if self.at_end() {
            return Err(SelectorError::Empty);
        }
        let mut compounds = vec![self.compound()?];
        let mut combinators = Vec::new();
        loop {
            let had_ws = self.skip_ws();
            match self.peek() {
                None => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_ws();
                    combinators.push(Combinator::Child);
                }
                Some(_) if had_ws => combinators.push(Combinator::Descendant),
                Some(_) => return Err(self.unexpected()),
            }
            if self.at_end() {
                return Err(SelectorError::UnexpectedEnd);
            }
            compounds.push(self.compound()?);
        }
        Ok(Selector {
            compounds,
            combinators,
        })
    }

    fn compound(&mut self) -> Result<Compound, SelectorError> {
        let start = self.pos;
        let mut compound = Compound::default();
        match self.peek() {
            Some('*') => self.pos += 1,
            Some(ch) if is_ident_start(ch) => {
                compound.tag = Some(self.ident()?.to_ascii_lowercase());
            }
            _ => {}
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.ids.push(self.ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.ident()?);
                }
                Some(':') => {
                    self.pos += 1;
                    compound.positions.push(self.pseudo()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attributes.push(self.attribute()?);
                }
                _ => break,
            }
        }
        if self.pos == start {
            return Err(self.unexpected());
        }
        Ok(compound)
    }

    fn ident(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            if ch == '\\' {
                self.pos += 1;
                out.push(self.escape()?);
                continue;
            }
            if !is_ident_char(ch) {
                break;
            }
            let leading_digit = ch.is_ascii_digit()
                && (self.pos == start || (self.pos == start + 1 && self.chars[start] == '-'));
            if leading_digit {
                return Err(self.unexpected());
            }
            out.push(ch);
            self.pos += 1;
        }
        if out.is_empty() {
            return Err(self.unexpected());
        }
        Ok(out)
    }

    /// Called just after a backslash
    fn escape(&mut self) -> Result<char, SelectorError> {
        match self.peek() {
            None => Err(SelectorError::UnexpectedEnd),
            Some('\n') => Err(self.unexpected()),
            Some(ch) if ch.is_ascii_hexdigit() => {
                let mut hex = String::new();
                while hex.len() < 6 {
                    match self.peek() {
                        Some(h) if h.is_ascii_hexdigit() => {
                            hex.push(h);
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                if self.peek().is_some_and(char::is_whitespace) {
                    self.pos += 1;
                }
                let code = u32::from_str_radix(&hex, 16).unwrap_or(0);
                Ok(match char::from_u32(code) {
                    Some(c) if code != 0 => c,
                    _ => '\u{FFFD}',
                })
            }
            Some(ch) => {
                self.pos += 1;
                Ok(ch)
            }
        }
    }

    fn pseudo(&mut self) -> Result<usize, SelectorError> {
        let name = self.ident()?;
        if !name.eq_ignore_ascii_case("nth-child") {
            return Err(SelectorError::UnsupportedPseudo(name));
        }
        self.expect('(')?;
        let mut arg = String::new();
        while let Some(ch) = self.peek() {
            if ch == ')' {
                break;
            }
            arg.push(ch);
            self.pos += 1;
        }
        self.expect(')')?;
        match arg.trim().parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(SelectorError::InvalidNth(arg)),
        }
    }

    fn attribute(&mut self) -> Result<AttributeMatch, SelectorError> {
        self.skip_ws();
        let name = self.ident()?.to_ascii_lowercase();
        self.skip_ws();
        let value = match self.peek() {
            Some('=') => {
                self.pos += 1;
                self.skip_ws();
                let value = match self.peek() {
                    Some(quote @ ('"' | '\'')) => self.string(quote)?,
                    _ => self.ident()?,
                };
                self.skip_ws();
                Some(value)
            }
            _ => None,
        };
        self.expect(']')?;
        Ok(AttributeMatch { name, value })
    }

    fn string(&mut self, quote: char) -> Result<String, SelectorError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(SelectorError::UnexpectedEnd),
                Some(ch) if ch == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some('\\') => {
                    self.pos += 1;
                    out.push(self.escape()?);
                }
                Some(ch) => {
                    out.push(ch);
                    self.pos += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ElementSpec, MemoryDocument};

    fn page() -> (MemoryDocument, Vec<NodeId>) {
        let mut doc = MemoryDocument::default();
        let body = doc.body();
        let main = doc.append(body, ElementSpec::new("main").id("content"));
        let first = doc.append(main, ElementSpec::new("p").class("lead").class("intro"));
        let second = doc.append(main, ElementSpec::new("p").class("lead"));
        let mark = doc.append(
            second,
            ElementSpec::new("mark").attr("data-highlight-id", "hl-1"),
        );
        (doc, vec![main, first, second, mark])
    }

    #[test]
    fn test_parse_rejects_invalid_input() {
        for input in [
            "", "   ", "div >", "> div", "div,p", "#", ".", "p:hover", "p:nth-child(0)",
            "p:nth-child(2n+1)", "[data-x", "#1abc", "div\\",
        ] {
            assert!(Selector::parse(input).is_err(), "{input:?} should not parse");
        }
    }

    #[test]
    fn test_parse_accepts_locator_shapes() {
        for input in [
            "body",
            "#content",
            "p.lead.intro",
            "main#content > p:nth-child(2)",
            "body > main p",
            "[data-highlight-id=\"hl-1\"]",
            "mark[data-highlight-id=hl-1]",
            "*",
            "#\\31 23",
        ] {
            assert!(Selector::parse(input).is_ok(), "{input:?} should parse");
        }
    }

    #[test]
    fn test_query_by_id_and_classes() {
        let (doc, nodes) = page();
        let by_id: Selector = "#content".parse().unwrap();
        assert_eq!(query_selector_all(&doc, &by_id), vec![nodes[0]]);

        let both: Selector = "p.lead.intro".parse().unwrap();
        assert_eq!(query_selector_all(&doc, &both), vec![nodes[1]]);

        let lead: Selector = "p.lead".parse().unwrap();
        assert_eq!(query_selector_all(&doc, &lead), vec![nodes[1], nodes[2]]);
    }

    #[test]
    fn test_nth_child_and_combinators() {
        let (doc, nodes) = page();
        let child: Selector = "body > main#content > p:nth-child(2)".parse().unwrap();
        assert_eq!(query_selector(&doc, &child), Some(nodes[2]));

        let not_direct: Selector = "body > p".parse().unwrap();
        assert_eq!(query_selector(&doc, &not_direct), None);

        let descendant: Selector = "body mark".parse().unwrap();
        assert_eq!(query_selector(&doc, &descendant), Some(nodes[3]));
    }

    #[test]
    fn test_attribute_selectors() {
        let (doc, nodes) = page();
        let exact: Selector = "[data-highlight-id='hl-1']".parse().unwrap();
        assert_eq!(query_selector(&doc, &exact), Some(nodes[3]));
        let other: Selector = "[data-highlight-id='hl-2']".parse().unwrap();
        assert_eq!(query_selector(&doc, &other), None);
        let present: Selector = "[data-highlight-id]".parse().unwrap();
        assert_eq!(query_selector(&doc, &present), Some(nodes[3]));
    }

    #[test]
    fn test_css_escape() {
        assert_eq!(css_escape("plain-id_1"), "plain-id_1");
        assert_eq!(css_escape("123"), "\\31 23");
        assert_eq!(css_escape("-1a"), "-\\31 a");
        assert_eq!(css_escape("-"), "\\-");
        assert_eq!(css_escape("a b"), "a\\ b");
        assert_eq!(css_escape("w:50%"), "w\\:50\\%");
        assert_eq!(css_escape("caf\u{e9}"), "caf\u{e9}");
    }

    #[test]
    fn test_escaped_identifiers_match_raw_values() {
        let mut doc = MemoryDocument::default();
        let body = doc.body();
        let odd = doc.append(body, ElementSpec::new("div").id("1st item").class("w:50%"));

        let by_id = Selector::parse(&format!("#{}", css_escape("1st item"))).unwrap();
        assert_eq!(query_selector(&doc, &by_id), Some(odd));

        let by_class = Selector::parse(&format!("div.{}", css_escape("w:50%"))).unwrap();
        assert_eq!(query_selector(&doc, &by_class), Some(odd));
    }

    #[test]
    fn test_detached_elements_never_match() {
        let (mut doc, nodes) = page();
        doc.remove(nodes[0]);
        let by_id: Selector = "#content".parse().unwrap();
        assert!(query_selector_all(&doc, &by_id).is_empty());
    }
}
