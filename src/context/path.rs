// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Key paths for context entries
//!
//! Entry names are dot separated. Keys that contain `.` or `/` are quoted,
//! either inline (`metadata."app.kubernetes.io/name"`) or with brackets
//! (`metadata.labels["app.kubernetes.io/name"]`).

use smallvec::SmallVec;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;

/// Parsed segments of an entry name
pub type KeyPath = SmallVec<[String; 4]>;

/// Errors raised while parsing an entry name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The name or one of its segments is empty
    #[error("invalid entry name {path:?}: empty segment at position {position}")]
    EmptySegment {
        /// Entry name as supplied
        path: String,
        /// Byte offset of the empty segment
        position: usize,
    },

    /// A quoted key was never closed
    #[error("invalid entry name {path:?}: unterminated {delimiter} starting at position {position}")]
    Unterminated {
        /// Entry name as supplied
        path: String,
        /// The delimiter that was left open
        delimiter: char,
        /// Byte offset of the opening delimiter
        position: usize,
    },

    /// A character that cannot start a segment at this point
    #[error("invalid entry name {path:?}: unexpected {character:?} at position {position}")]
    UnexpectedCharacter {
        /// Entry name as supplied
        path: String,
        /// Offending character
        character: char,
        /// Byte offset of the character
        position: usize,
    },
}

/// Parse an entry name into its key segments
pub fn parse_key_path(path: &str) -> Result<KeyPath, PathError> {
    let mut segments = KeyPath::new();
    let mut chars = path.char_indices().peekable();
    // true while the next thing we read has to be a key
    let mut expect_key = true;

    while let Some(&(position, c)) = chars.peek() {
        match c {
            '.' => {
                if expect_key {
                    return Err(PathError::EmptySegment {
                        path: path.to_string(),
                        position,
                    });
                }
                chars.next();
                expect_key = true;
            }
            '[' => {
                if expect_key && !segments.is_empty() {
                    return Err(unexpected(path, c, position));
                }
                chars.next();
                let quote = match chars.next() {
                    Some((_, q @ ('"' | '\''))) => q,
                    Some((at, other)) => return Err(unexpected(path, other, at)),
                    None => {
                        return Err(PathError::Unterminated {
                            path: path.to_string(),
                            delimiter: '[',
                            position,
                        });
                    }
                };
                let key = read_quoted(&mut chars, quote, path, position)?;
                match chars.next() {
                    Some((_, ']')) => {}
                    Some((at, other)) => return Err(unexpected(path, other, at)),
                    None => {
                        return Err(PathError::Unterminated {
                            path: path.to_string(),
                            delimiter: '[',
                            position,
                        });
                    }
                }
                segments.push(key);
                expect_key = false;
            }
            '"' | '\'' => {
                if !expect_key {
                    return Err(unexpected(path, c, position));
                }
                chars.next();
                segments.push(read_quoted(&mut chars, c, path, position)?);
                expect_key = false;
            }
            _ => {
                if !expect_key {
                    return Err(unexpected(path, c, position));
                }
                let mut key = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c == '.' || c == '[' {
                        break;
                    }
                    key.push(c);
                    chars.next();
                }
                segments.push(key);
                expect_key = false;
            }
        }
    }

    if expect_key {
        return Err(PathError::EmptySegment {
            path: path.to_string(),
            position: path.len(),
        });
    }
    Ok(segments)
}

fn read_quoted(
    chars: &mut Peekable<CharIndices<'_>>,
    quote: char,
    path: &str,
    start: usize,
) -> Result<String, PathError> {
    let mut key = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, escaped)) => key.push(escaped),
                None => break,
            },
            c if c == quote => return Ok(key),
            c => key.push(c),
        }
    }
    Err(PathError::Unterminated {
        path: path.to_string(),
        delimiter: quote,
        position: start,
    })
}

fn unexpected(path: &str, character: char, position: usize) -> PathError {
    PathError::UnexpectedCharacter {
        path: path.to_string(),
        character,
        position,
    }
}

/// Display wrapper that renders a key path back into dotted form
pub struct DisplayPath<'a>(pub &'a [String]);

impl fmt::Display for DisplayPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.0.iter().enumerate() {
            if segment.contains(['.', '/', '"', '[']) {
                write!(f, "[{segment:?}]")?;
                continue;
            }
            if index > 0 {
                f.write_str(".")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}
