//! Shell-style tokenizer for raw curl commands
//!
//! Quoting follows POSIX shell rules closely enough for pasted commands:
//!
//! - `'...'` is fully literal
//! - `"..."` keeps everything except `\"`, `\\`, `\$` and `` \` `` escapes
//! - outside quotes a backslash escapes the next character
//! - backslash-newline (also `\r\n`) continues the line and separates words
//! - `#` at the start of a word comments out the rest of the line
//! - an unquoted leading `curl` is dropped
//!
//! `$` stays expandable outside single quotes and unescaped; see [`crate::token::Token`].

use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::TokenizeError;
use crate::token::{Classifier, Token, TokenKind};

/// Split a raw command into classified template tokens.
pub fn tokenize(raw: &str) -> Result<Vec<Token>, TokenizeError> {
    let mut words = split_words(raw)?;
    if words
        .first()
        .is_some_and(|w| !w.quoted && w.literal == "curl")
    {
        words.remove(0);
    }

    let mut classifier = Classifier::default();
    let tokens = words
        .into_iter()
        .map(|word| match classifier.next_kind(&word.literal) {
            TokenKind::Flag => Token::literal(TokenKind::Flag, word.literal, word.position),
            kind => Token::template(kind, word.template, word.position),
        })
        .collect();
    Ok(tokens)
}

#[derive(Debug)]
struct Word {
    template: String,
    literal: String,
    position: usize,
    quoted: bool,
}

#[derive(Debug, Default)]
struct WordBuf {
    template: String,
    literal: String,
    start: Option<usize>,
    quoted: bool,
}

impl WordBuf {
    fn begin(&mut self, pos: usize) {
        self.start.get_or_insert(pos);
    }

    fn push(&mut self, c: char, expandable: bool) {
        self.literal.push(c);
        if c == '$' && !expandable {
            self.template.push_str("$$");
        } else {
            self.template.push(c);
        }
    }

    fn in_word(&self) -> bool {
        self.start.is_some()
    }

    fn finish(&mut self, out: &mut Vec<Word>) {
        if let Some(position) = self.start.take() {
            out.push(Word {
                template: std::mem::take(&mut self.template),
                literal: std::mem::take(&mut self.literal),
                position,
                quoted: std::mem::take(&mut self.quoted),
            });
        }
    }
}

fn split_words(raw: &str) -> Result<Vec<Word>, TokenizeError> {
    let mut chars = raw.char_indices().peekable();
    let mut words = Vec::new();
    let mut word = WordBuf::default();

    while let Some((pos, c)) = chars.next() {
        match c {
            '#' if !word.in_word() => skip_comment(&mut chars),
            c if c.is_whitespace() => word.finish(&mut words),
            '\\' => match chars.next() {
                None => return Err(TokenizeError::DanglingEscape { position: pos }),
                Some((_, '\n')) => word.finish(&mut words),
                Some((_, '\r')) if peek_is(&mut chars, '\n') => {
                    chars.next();
                    word.finish(&mut words);
                }
                Some((_, escaped)) => {
                    word.begin(pos);
                    word.quoted = true;
                    word.push(escaped, false);
                }
            },
            '\'' => {
                word.begin(pos);
                word.quoted = true;
                single_quoted(&mut chars, &mut word, pos)?;
            }
            '"' => {
                word.begin(pos);
                word.quoted = true;
                double_quoted(&mut chars, &mut word, pos)?;
            }
            c => {
                word.begin(pos);
                word.push(c, true);
            }
        }
    }
    word.finish(&mut words);
    Ok(words)
}

fn peek_is(chars: &mut Peekable<CharIndices<'_>>, expected: char) -> bool {
    chars.peek().is_some_and(|&(_, c)| c == expected)
}

fn skip_comment(chars: &mut Peekable<CharIndices<'_>>) {
    while chars.peek().is_some_and(|&(_, c)| c != '\n') {
        chars.next();
    }
}

fn single_quoted(
    chars: &mut Peekable<CharIndices<'_>>,
    word: &mut WordBuf,
    open: usize,
) -> Result<(), TokenizeError> {
    for (_, c) in chars.by_ref() {
        if c == '\'' {
            return Ok(());
        }
        word.push(c, false);
    }
    Err(TokenizeError::UnterminatedQuote {
        quote: '\'',
        position: open,
    })
}

fn double_quoted(
    chars: &mut Peekable<CharIndices<'_>>,
    word: &mut WordBuf,
    open: usize,
) -> Result<(), TokenizeError> {
    let unterminated = TokenizeError::UnterminatedQuote {
        quote: '"',
        position: open,
    };
    while let Some((_, c)) = chars.next() {
        match c {
            '"' => return Ok(()),
            '\\' => match chars.peek().map(|&(_, n)| n) {
                Some(n @ ('"' | '\\' | '$' | '`')) => {
                    chars.next();
                    word.push(n, false);
                }
                Some('\n') => {
                    chars.next();
                }
                Some(_) => word.push('\\', true),
                None => return Err(unterminated),
            },
            c => word.push(c, true),
        }
    }
    Err(unterminated)
}
