//! Tokens and argument classification

use std::borrow::Cow;

use crate::expand::{expand_str, NoEnv};
use crate::flags;

/// Role of a token in the argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Starts with `-` and is not consumed as a value.
    Flag,
    /// Consumed by the preceding value flag.
    Value,
    /// Positional argument (the URL).
    PlainString,
}

/// A classified argument.
///
/// Tokens produced by the tokenizer are *templates*: variable references are
/// still unexpanded and a literal `$` (single-quoted or escaped) is stored as
/// `$$`. [`crate::expand::expand`] turns them into literal tokens. Flag tokens
/// and tokens from [`classify`] are literal from the start.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    kind: TokenKind,
    text: String,
    position: usize,
    template: bool,
}

impl Token {
    pub fn literal(kind: TokenKind, text: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
            template: false,
        }
    }

    pub(crate) fn template(kind: TokenKind, text: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            position,
            template: true,
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Raw token text (template encoding for unexpanded tokens).
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Byte offset in the raw command, or the argument index for pre-split input.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_template(&self) -> bool {
        self.template
    }

    /// Text with literal `$` restored and variable references left as written.
    pub fn literal_text(&self) -> Cow<'_, str> {
        if self.template {
            Cow::Owned(expand_str(&self.text, &NoEnv))
        } else {
            Cow::Borrowed(&self.text)
        }
    }
}

/// Decides token kinds left to right.
///
/// A token following a value flag is always a value, even when it begins
/// with `-`. Otherwise anything longer than `-` that starts with `-` is a flag.
#[derive(Debug, Default)]
pub(crate) struct Classifier {
    expecting_value: bool,
}

impl Classifier {
    pub(crate) fn next_kind(&mut self, text: &str) -> TokenKind {
        if self.expecting_value {
            self.expecting_value = false;
            return TokenKind::Value;
        }
        if text.len() > 1 && text.starts_with('-') {
            self.expecting_value = flags::expects_value(text);
            TokenKind::Flag
        } else {
            TokenKind::PlainString
        }
    }
}

/// Classify a pre-split argument list (for example `std::env::args`).
///
/// Positions are argument indices. A leading `curl` argument is skipped.
pub fn classify<I, S>(args: I) -> Vec<Token>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut classifier = Classifier::default();
    args.into_iter()
        .enumerate()
        .filter(|(idx, arg)| !(*idx == 0 && arg.as_ref() == "curl"))
        .map(|(idx, arg)| {
            let text = arg.as_ref();
            Token::literal(classifier.next_kind(text), text, idx)
        })
        .collect()
}
