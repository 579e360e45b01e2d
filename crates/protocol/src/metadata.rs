//! Parsing for the metadata line that opens every upload.
//!
//! The line is a `;`-separated list of tokens. Two tokens are recognised by
//! their literal prefix, `FileName:` and `Size:`, and may appear in any order.
//! Unrecognised tokens are ignored so clients can append extra fields without
//! breaking older servers.

use std::fmt;

use thiserror::Error;

/// Prefix identifying the file name token.
pub const FILE_NAME_PREFIX: &str = "FileName:";

/// Prefix identifying the declared size token.
pub const SIZE_PREFIX: &str = "Size:";

/// Upper bound on the metadata line, including its terminator.
///
/// A peer that sends more than this many bytes without a newline is treated as
/// a protocol violation rather than buffered indefinitely.
pub const MAX_METADATA_LINE: usize = 8 * 1024;

/// Reasons a metadata line is rejected.
///
/// None of these are reported to the peer; the server closes the connection
/// and logs the variant locally.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum MetadataError {
    /// The line was empty after removing its terminator.
    #[error("metadata line is empty")]
    Empty,

    /// No `FileName:` token was present, or its value was blank.
    #[error("metadata line has no {FILE_NAME_PREFIX} field")]
    MissingFileName,

    /// No `Size:` token was present.
    #[error("metadata line has no {SIZE_PREFIX} field")]
    MissingSize,

    /// The `Size:` value is not a non-negative 64-bit integer.
    #[error("declared size {value:?} is not a non-negative integer")]
    InvalidSize {
        /// The offending text after prefix removal and trimming.
        value: String,
    },

    /// The peer sent more than [`MAX_METADATA_LINE`] bytes without a newline.
    #[error("metadata line exceeds {MAX_METADATA_LINE} bytes")]
    TooLong,
}

/// A parsed upload request: which file, and how large the client says it is.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct FileRequest {
    file_name: String,
    declared_size: u64,
}

impl FileRequest {
    /// Creates a request from its parts.
    #[must_use]
    pub fn new(file_name: impl Into<String>, declared_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            declared_size,
        }
    }

    /// Parses a metadata line.
    ///
    /// A trailing `\n` or `\r\n` is removed first. When a prefix occurs in more
    /// than one token the first occurrence wins. Values are trimmed of
    /// surrounding whitespace after the prefix is stripped.
    ///
    /// # Examples
    ///
    /// ```
    /// use protocol::{FileRequest, MetadataError};
    ///
    /// let request = FileRequest::parse("Size:10;FileName: notes.txt ")?;
    /// assert_eq!(request.file_name(), "notes.txt");
    /// assert_eq!(request.declared_size(), 10);
    ///
    /// assert_eq!(
    ///     FileRequest::parse("FileName:a;Size:-1"),
    ///     Err(MetadataError::InvalidSize { value: "-1".into() })
    /// );
    /// # Ok::<(), MetadataError>(())
    /// ```
    pub fn parse(line: &str) -> Result<Self, MetadataError> {
        let line = strip_line_ending(line);
        if line.is_empty() {
            return Err(MetadataError::Empty);
        }

        let mut file_name = None;
        let mut size = None;
        for token in line.split(';') {
            if file_name.is_none()
                && let Some(value) = token.strip_prefix(FILE_NAME_PREFIX)
            {
                file_name = Some(value.trim());
            } else if size.is_none()
                && let Some(value) = token.strip_prefix(SIZE_PREFIX)
            {
                size = Some(value.trim());
            }
        }

        let file_name = match file_name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(MetadataError::MissingFileName),
        };
        let size = size.ok_or(MetadataError::MissingSize)?;
        let declared_size = size.parse::<u64>().map_err(|_| MetadataError::InvalidSize {
            value: size.to_owned(),
        })?;

        Ok(Self::new(file_name, declared_size))
    }

    /// Returns the file name exactly as the client sent it, minus whitespace.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Returns the total size the client claims the file has.
    #[must_use]
    pub const fn declared_size(&self) -> u64 {
        self.declared_size
    }

    /// Renders the request as a newline-terminated metadata line.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for FileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{FILE_NAME_PREFIX}{};{SIZE_PREFIX}{}",
            self.file_name, self.declared_size
        )
    }
}

fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_line() {
        let request = FileRequest::parse("FileName:report.pdf;Size:2048\n").expect("parse");
        assert_eq!(request, FileRequest::new("report.pdf", 2048));
    }

    #[test]
    fn accepts_fields_in_any_order() {
        let request = FileRequest::parse("Size:7;FileName:a.bin").expect("parse");
        assert_eq!(request.file_name(), "a.bin");
        assert_eq!(request.declared_size(), 7);
    }

    #[test]
    fn ignores_unrecognised_tokens() {
        let request =
            FileRequest::parse("Client:v2;FileName:a.bin;Hash:none;Size:3\r\n").expect("parse");
        assert_eq!(request, FileRequest::new("a.bin", 3));
    }

    #[test]
    fn trims_whitespace_around_values() {
        let request = FileRequest::parse("FileName:  spaced name.txt ;Size: 12 ").expect("parse");
        assert_eq!(request.file_name(), "spaced name.txt");
        assert_eq!(request.declared_size(), 12);
    }

    #[test]
    fn first_occurrence_of_a_prefix_wins() {
        let request = FileRequest::parse("FileName:first;FileName:second;Size:1;Size:2")
            .expect("parse");
        assert_eq!(request, FileRequest::new("first", 1));
    }

    #[test]
    fn prefixes_are_case_sensitive() {
        assert_eq!(
            FileRequest::parse("filename:a;Size:1"),
            Err(MetadataError::MissingFileName)
        );
        assert_eq!(
            FileRequest::parse("FileName:a;size:1"),
            Err(MetadataError::MissingSize)
        );
    }

    #[test]
    fn leading_whitespace_hides_a_prefix() {
        assert_eq!(
            FileRequest::parse("FileName:a; Size:1"),
            Err(MetadataError::MissingSize)
        );
    }

    #[test]
    fn rejects_empty_line() {
        assert_eq!(FileRequest::parse(""), Err(MetadataError::Empty));
        assert_eq!(FileRequest::parse("\n"), Err(MetadataError::Empty));
        assert_eq!(FileRequest::parse("\r\n"), Err(MetadataError::Empty));
    }

    #[test]
    fn rejects_blank_file_name() {
        assert_eq!(
            FileRequest::parse("FileName:   ;Size:1"),
            Err(MetadataError::MissingFileName)
        );
    }

    #[test]
    fn rejects_non_numeric_and_negative_sizes() {
        for value in ["abc", "-5", "1.5", "", "18446744073709551616"] {
            let line = format!("FileName:a;Size:{value}");
            assert_eq!(
                FileRequest::parse(&line),
                Err(MetadataError::InvalidSize {
                    value: value.to_owned()
                }),
                "size {value:?} should be rejected"
            );
        }
    }

    #[test]
    fn accepts_full_u64_range() {
        let request = FileRequest::parse("FileName:big;Size:18446744073709551615").expect("parse");
        assert_eq!(request.declared_size(), u64::MAX);
    }

    #[test]
    fn renders_parseable_line() {
        let request = FileRequest::new("dir/x.log", 99);
        assert_eq!(request.to_line(), "FileName:dir/x.log;Size:99\n");
        assert_eq!(FileRequest::parse(&request.to_line()), Ok(request));
    }

    #[test]
    fn error_messages_name_the_field() {
        assert!(MetadataError::MissingFileName.to_string().contains("FileName:"));
        assert!(MetadataError::MissingSize.to_string().contains("Size:"));
        let invalid = MetadataError::InvalidSize {
            value: "x".to_owned(),
        };
        assert!(invalid.to_string().contains("\"x\""));
    }
}
