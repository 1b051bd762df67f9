//! Header-card parsing for the binary container.
//!
//! Headers are sequences of 2880-byte blocks holding 80-byte keyword
//! cards, terminated by an `END` card. Values are logicals (`T`/`F`),
//! integers, reals, or quoted strings, optionally followed by a
//! `/ comment`.

use std::collections::HashMap;
use std::str;

use crate::errors::{IndexError, Result};

pub const CARD_SIZE: usize = 80;
pub const BLOCK_SIZE: usize = 2880;

/// A parsed keyword value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Logical(bool),
    Integer(i64),
    Real(f64),
    Str(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Logical(v) => Some(*v),
            Value::Integer(v) => Some(*v != 0),
            _ => None,
        }
    }
}

/// One keyword card.
#[derive(Debug, Clone)]
pub struct Card {
    pub name: String,
    pub value: Option<Value>,
    pub comment: Option<String>,
}

/// Parsed header of one HDU, with keyword lookup by name.
#[derive(Debug, Clone, Default)]
pub struct Header {
    cards: Vec<Card>,
    index: HashMap<String, usize>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, card: Card) {
        // first occurrence wins on duplicate keywords
        let idx = self.cards.len();
        self.index.entry(card.name.clone()).or_insert(idx);
        self.cards.push(card);
    }

    pub fn card(&self, name: &str) -> Option<&Card> {
        self.index.get(name).and_then(|&i| self.cards.get(i))
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.card(name)?.value.as_ref()
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.value(name)?.as_int()
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.value(name)?.as_f64()
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.value(name)?.as_str()
    }

    pub fn logical(&self, name: &str) -> Option<bool> {
        self.value(name)?.as_bool()
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Parses one 2880-byte header block into this header.
    ///
    /// Returns `true` once the `END` card has been seen.
    pub(crate) fn parse_block(&mut self, block: &[u8]) -> Result<bool> {
        if block.len() != BLOCK_SIZE {
            return Err(IndexError::InvalidFormat(format!(
                "header block is {} bytes, expected {}",
                block.len(),
                BLOCK_SIZE
            )));
        }
        for raw in block.chunks_exact(CARD_SIZE) {
            let card_str = str::from_utf8(raw).map_err(|_| {
                IndexError::InvalidFormat("non-ASCII bytes in header card".to_string())
            })?;
            let name = card_str[..8].trim();
            if name == "END" {
                return Ok(true);
            }
            if name.is_empty() || name == "COMMENT" || name == "HISTORY" {
                continue;
            }
            let (value, comment) = if card_str.len() >= 10 && &card_str[8..10] == "= " {
                parse_value(&card_str[10..])
            } else {
                (None, None)
            };
            self.push(Card {
                name: name.to_string(),
                value,
                comment,
            });
        }
        Ok(false)
    }
}

fn parse_value(text: &str) -> (Option<Value>, Option<String>) {
    let t = text.trim_start();

    // quoted string: the comment separator may only follow the closing quote
    if let Some(rest) = t.strip_prefix('\'') {
        return match rest.find('\'') {
            Some(end) => {
                let s = rest[..end].trim_end().to_string();
                (Some(Value::Str(s)), comment_of(&rest[end + 1..]))
            }
            None => (Some(Value::Str(rest.trim_end().to_string())), None),
        };
    }

    let (vpart, comment) = match t.find('/') {
        Some(pos) => (&t[..pos], comment_of(&t[pos..])),
        None => (t, None),
    };
    let v = vpart.trim();
    if v.is_empty() {
        return (None, comment);
    }
    if v == "T" {
        return (Some(Value::Logical(true)), comment);
    }
    if v == "F" {
        return (Some(Value::Logical(false)), comment);
    }
    if let Ok(i) = v.parse::<i64>() {
        return (Some(Value::Integer(i)), comment);
    }
    // FITS reals may use a 'D' exponent
    if let Ok(f) = v.replace(['D', 'd'], "E").parse::<f64>() {
        return (Some(Value::Real(f)), comment);
    }
    (Some(Value::Str(v.to_string())), comment)
}

fn comment_of(rest: &str) -> Option<String> {
    let c = rest.strip_prefix('/').unwrap_or(rest).trim();
    if c.is_empty() {
        None
    } else {
        Some(c.to_string())
    }
}
