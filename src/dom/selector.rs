use std::str::FromStr;
use thiserror::Error;

use super::{Document, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("Empty selector")]
    Empty,

    #[error("Unsupported selector syntax: {0:?}")]
    Unsupported(String),
}

/// The subset of CSS selectors the host markup needs: tag, `#id`, `.class`,
/// `[attr]`, `[attr=value]`, `[attr^=prefix]`, descendant combinators and
/// comma-separated alternatives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    alternatives: Vec<Complex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    /// Outermost ancestor first.
    compounds: Vec<Compound>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrMatch {
    name: String,
    op: AttrOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals(String),
    Prefix(String),
}

impl Selector {
    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.alternatives.iter().any(|complex| complex.matches(doc, node))
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.trim().is_empty() {
            return Err(SelectorError::Empty);
        }
        let alternatives = split_outside_brackets(input, |c| c == ',')
            .into_iter()
            .map(|part| {
                let compounds = split_outside_brackets(part, char::is_whitespace)
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .map(parse_compound)
                    .collect::<Result<Vec<_>, _>>()?;
                if compounds.is_empty() {
                    return Err(SelectorError::Unsupported(input.to_string()));
                }
                Ok(Complex { compounds })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Selector { alternatives })
    }
}

impl Complex {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some((last, ancestors)) = self.compounds.split_last() else {
            return false;
        };
        if !last.matches(doc, node) {
            return false;
        }
        // Descendant-only chains: matching each compound against the nearest
        // qualifying ancestor never misses a match.
        let mut current = node;
        for compound in ancestors.iter().rev() {
            loop {
                match doc.parent(current) {
                    Some(parent) => {
                        current = parent;
                        if compound.matches(doc, parent) {
                            break;
                        }
                    }
                    None => return false,
                }
            }
        }
        true
    }
}

impl Compound {
    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        if let Some(tag) = &self.tag {
            if !doc.tag(node).eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if doc.attr(node, "id") != Some(id.as_str()) {
                return false;
            }
        }
        self.classes.iter().all(|class| doc.has_class(node, class))
            && self.attrs.iter().all(|attr| {
                let value = doc.attr(node, &attr.name);
                match (&attr.op, value) {
                    (_, None) => false,
                    (AttrOp::Exists, Some(_)) => true,
                    (AttrOp::Equals(expected), Some(v)) => v == expected,
                    (AttrOp::Prefix(prefix), Some(v)) => v.starts_with(prefix.as_str()),
                }
            })
    }
}

fn split_outside_brackets(input: &str, is_separator: impl Fn(char) -> bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_brackets = false;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => in_brackets = true,
            (None, ']') => in_brackets = false,
            (None, c) if !in_brackets && is_separator(c) => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && is_ident_char(chars[*pos]) {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

fn read_value(chars: &[char], pos: &mut usize) -> Option<String> {
    match chars.get(*pos) {
        Some(&q) if q == '\'' || q == '"' => {
            let start = *pos + 1;
            let end = start + chars[start..].iter().position(|&c| c == q)?;
            *pos = end + 1;
            Some(chars[start..end].iter().collect())
        }
        _ => {
            let ident = read_ident(chars, pos);
            (!ident.is_empty()).then_some(ident)
        }
    }
}

fn parse_compound(src: &str) -> Result<Compound, SelectorError> {
    let unsupported = || SelectorError::Unsupported(src.to_string());
    let chars: Vec<char> = src.chars().collect();
    let mut pos = 0;
    let mut compound = Compound::default();

    if chars.first() == Some(&'*') {
        pos += 1;
    } else {
        let tag = read_ident(&chars, &mut pos);
        if !tag.is_empty() {
            compound.tag = Some(tag.to_ascii_lowercase());
        }
    }

    while pos < chars.len() {
        match chars[pos] {
            '.' => {
                pos += 1;
                let class = read_ident(&chars, &mut pos);
                if class.is_empty() {
                    return Err(unsupported());
                }
                compound.classes.push(class);
            }
            '#' => {
                pos += 1;
                let id = read_ident(&chars, &mut pos);
                if id.is_empty() {
                    return Err(unsupported());
                }
                compound.id = Some(id);
            }
            '[' => {
                pos += 1;
                let name = read_ident(&chars, &mut pos);
                if name.is_empty() {
                    return Err(unsupported());
                }
                let op = match (chars.get(pos), chars.get(pos + 1)) {
                    (Some(']'), _) => AttrOp::Exists,
                    (Some('='), _) => {
                        pos += 1;
                        AttrOp::Equals(read_value(&chars, &mut pos).ok_or_else(unsupported)?)
                    }
                    (Some('^'), Some('=')) => {
                        pos += 2;
                        AttrOp::Prefix(read_value(&chars, &mut pos).ok_or_else(unsupported)?)
                    }
                    _ => return Err(unsupported()),
                };
                if chars.get(pos) != Some(&']') {
                    return Err(unsupported());
                }
                pos += 1;
                compound.attrs.push(AttrMatch { name, op });
            }
            _ => return Err(unsupported()),
        }
    }

    Ok(compound)
}
