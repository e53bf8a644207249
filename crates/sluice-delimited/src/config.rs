//! Setting names and the physical text format shared by parser and formatter.

use encoding_rs::Encoding;
use rhi_sluice_core::{BindingKeys, CodecError, ConfigError, Settings};
use std::borrow::Cow;

/// Parser field delimiter (default `,`).
pub const DELIMITER: &str = "delimiter";
/// Parser quote character (default `"`, blank disables quoting).
pub const QUOTE_CHARACTER: &str = "quote.character";
/// Character encoding label, e.g. `UTF-8`, `latin1` (default `UTF-8`).
pub const ENCODING: &str = "encoding";
/// Number of leading lines of the stream the parser skips (default 0).
pub const HEADER_LINES: &str = "header.lines";

/// Formatter field delimiter (default `,`).
pub const FORMATTER_DELIMITER: &str = "delimited.formatter.delimiter";
/// Formatter quote character (default blank, no quoting).
///
/// Without quoting, a value holding the delimiter or a line break is written
/// as-is and the line cannot be parsed back.
pub const FORMATTER_QUOTE_CHARACTER: &str = "delimited.formatter.quote.character";
/// Formatter policy for attributes sharing an ordinal: `reject` or `last_wins`.
pub const ORDINAL_COLLISION: &str = "ordinal.collision";

/// Per-attribute ordinal.
pub const ATTRIBUTE_ORDINAL: &str = "delimited.formatter.attribute.ordinal";
/// Per-attribute transform id.
pub const ATTRIBUTE_FORMAT_FUNCTION: &str = "delimited.formatter.attribute.format.function";

pub(crate) const BINDING_KEYS: BindingKeys<'static> = BindingKeys {
    ordinal: ATTRIBUTE_ORDINAL,
    transform: ATTRIBUTE_FORMAT_FUNCTION,
};

pub(crate) const DEFAULT_ENCODING: &str = "UTF-8";

/// Delimiter, quote and encoding of one side of the codec.
#[derive(Debug, Clone, Copy)]
pub struct TextFormat {
    pub delimiter: u8,
    pub quote: Option<u8>,
    pub encoding: &'static Encoding,
}

impl TextFormat {
    /// Read a text format from settings, using the given setting names.
    pub fn from_settings(
        settings: &Settings,
        delimiter_key: &str,
        quote_key: &str,
        default_quote: Option<char>,
    ) -> Result<Self, ConfigError> {
        let delimiter = settings
            .char_or(delimiter_key, Some(','))?
            .ok_or_else(|| ConfigError::MissingSetting(delimiter_key.to_string()))?;
        let delimiter = ascii_byte(delimiter_key, delimiter)?;
        let quote = settings
            .char_or(quote_key, default_quote)?
            .map(|q| ascii_byte(quote_key, q))
            .transpose()?;
        if quote == Some(delimiter) {
            return Err(ConfigError::InvalidSetting {
                name: quote_key.to_string(),
                value: (delimiter as char).to_string(),
                reason: "quote character equals the delimiter".into(),
            });
        }

        let label = settings.get_or(ENCODING, DEFAULT_ENCODING);
        let encoding = Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
            ConfigError::InvalidSetting {
                name: ENCODING.to_string(),
                value: label.to_string(),
                reason: "unknown encoding".into(),
            }
        })?;

        Ok(Self {
            delimiter,
            quote,
            encoding,
        })
    }

    /// Decode one physical line. `line` is 1-based, for error reporting.
    pub fn decode<'a>(&self, bytes: &'a [u8], line: usize) -> Result<Cow<'a, str>, CodecError> {
        let (text, had_errors) = self.encoding.decode_without_bom_handling(bytes);
        if had_errors {
            return Err(CodecError::Undecodable {
                line,
                encoding: self.encoding.name().to_string(),
            });
        }
        Ok(text)
    }

    /// Encode one formatted line. `record` is 1-based, for error reporting.
    pub fn encode(&self, text: &str, record: usize) -> Result<Vec<u8>, CodecError> {
        let (bytes, _, had_errors) = self.encoding.encode(text);
        if had_errors {
            return Err(CodecError::Unencodable {
                record,
                encoding: self.encoding.name().to_string(),
            });
        }
        Ok(bytes.into_owned())
    }
}

fn ascii_byte(name: &str, c: char) -> Result<u8, ConfigError> {
    if c.is_ascii() && c != '\n' && c != '\r' {
        Ok(c as u8)
    } else {
        Err(ConfigError::InvalidSetting {
            name: name.to_string(),
            value: c.to_string(),
            reason: "must be a single ASCII character other than a line break".into(),
        })
    }
}
