//! Content checks applied to user supplied text.
//!
//! Offensive words are matched as case-insensitive substrings, so "darned"
//! trips on "darn".

use std::fs;
use std::path::Path;

use crate::error::ConfigError;

const BUILTIN_WORDS: &str = include_str!("../assets/offensive_words.txt");

/// Tags whose text content is dropped along with the markup.
const DISCARDED_ELEMENTS: [&str; 2] = ["script", "style"];

pub trait ContentFilter: Send + Sync {
    fn contains_offensive_word(&self, text: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct WordList {
    words: Vec<String>,
}

impl WordList {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words = words
            .into_iter()
            .map(|word| word.as_ref().trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect();
        WordList { words }
    }

    /// One word per line; blank lines and `#` comments are skipped.
    pub fn parse(contents: &str) -> Self {
        Self::new(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.starts_with('#')),
        )
    }

    pub fn builtin() -> Self {
        Self::parse(BUILTIN_WORDS)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::WordList {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&contents))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl ContentFilter for WordList {
    fn contains_offensive_word(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.words.iter().any(|word| lower.contains(word.as_str()))
    }
}

/// Strips HTML markup from `text`, along with any stray angle brackets. The
/// result is never longer than the input.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut discarding: Option<&str> = None;

    while let Some(start) = rest.find('<') {
        let (head, tail) = rest.split_at(start);
        if discarding.is_none() {
            push_text(&mut out, head);
        }

        let Some(end) = tag_end(tail) else {
            if discarding.is_none() {
                push_text(&mut out, tail);
            }
            return out;
        };

        let tag = &tail[1..end];
        let name = tag_name(tag);
        match discarding {
            Some(open) if tag.starts_with('/') && name == open => discarding = None,
            Some(_) => {}
            None => {
                if !tag.starts_with('/') {
                    discarding = DISCARDED_ELEMENTS
                        .iter()
                        .copied()
                        .find(|element| *element == name);
                }
            }
        }
        rest = &tail[end + 1..];
    }

    if discarding.is_none() {
        push_text(&mut out, rest);
    }
    out
}

/// Index of the `>` closing a tag that starts at `tail[0] == '<'`, if `tail`
/// starts with something that looks like markup.
fn tag_end(tail: &str) -> Option<usize> {
    let next = tail[1..].chars().next()?;
    if !(next.is_ascii_alphabetic() || next == '/' || next == '!') {
        return None;
    }
    tail.find('>')
}

fn tag_name(tag: &str) -> String {
    tag.trim_start_matches(['/', '!'])
        .chars()
        .take_while(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase()
}

fn push_text(out: &mut String, text: &str) {
    out.extend(text.chars().filter(|c| !matches!(*c, '<' | '>')));
}
