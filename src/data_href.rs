//! `data:` URI codec.
//!
//! UCWA carries message bodies inline as links whose href is a data URI:
//!
//! ```text
//! data:text/plain;charset=utf-8,Hello%20there
//! data:text/html;base64,PGI+SGk8L2I+
//! ```
//!
//! `base64` payloads decode as raw bytes; `charset=` payloads are
//! percent-decoded. The content type is kept so callers can tell HTML
//! from plain text, and [`DataHref::plain_text`] strips markup.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Result, UcwaError};

const SCHEME: &str = "data:";
const DEFAULT_CONTENT_TYPE: &str = "text/plain";
const DEFAULT_CHARSET: &str = "utf-8";

/// Payload encoding of a data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEncoding {
    /// `;base64`
    Base64,
    /// `;charset=<name>`, percent-encoded payload.
    Charset(String),
}

impl DataEncoding {
    /// `charset=utf-8`.
    pub fn utf8() -> Self {
        Self::Charset(DEFAULT_CHARSET.to_string())
    }
}

/// A decoded data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataHref {
    content_type: String,
    encoding: DataEncoding,
    data: Vec<u8>,
}

impl DataHref {
    /// Wraps raw bytes.
    pub fn new(content_type: impl Into<String>, encoding: DataEncoding, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            encoding,
            data,
        }
    }

    /// UTF-8 text, percent-encoded on the wire.
    pub fn text(content_type: impl Into<String>, text: &str) -> Self {
        Self::new(content_type, DataEncoding::utf8(), text.as_bytes().to_vec())
    }

    /// Parses a `data:` href.
    pub fn decode(href: &str) -> Result<Self> {
        let rest = href
            .strip_prefix(SCHEME)
            .ok_or_else(|| UcwaError::DataHref(format!("missing '{SCHEME}' scheme")))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| UcwaError::DataHref("missing ',' separator".to_string()))?;

        let mut params = header.split(';');
        let content_type = match params.next().map(str::trim) {
            Some(ct) if !ct.is_empty() => ct.to_string(),
            _ => DEFAULT_CONTENT_TYPE.to_string(),
        };

        let mut encoding = DataEncoding::utf8();
        for param in params.map(str::trim) {
            if param.eq_ignore_ascii_case("base64") {
                encoding = DataEncoding::Base64;
                break;
            }
            if let Some((key, value)) = param.split_once('=') {
                if key.trim().eq_ignore_ascii_case("charset") {
                    encoding = DataEncoding::Charset(value.trim().to_string());
                }
            }
        }

        let data = match encoding {
            DataEncoding::Base64 => STANDARD
                .decode(payload.trim())
                .map_err(|e| UcwaError::DataHref(format!("bad base64 payload: {e}")))?,
            DataEncoding::Charset(_) => urlencoding::decode_binary(payload.as_bytes()).into_owned(),
        };

        Ok(Self {
            content_type,
            encoding,
            data,
        })
    }

    /// Serializes back to a `data:` href.
    pub fn encode(&self) -> String {
        match &self.encoding {
            DataEncoding::Base64 => format!(
                "{SCHEME}{};base64,{}",
                self.content_type,
                STANDARD.encode(&self.data)
            ),
            DataEncoding::Charset(charset) => format!(
                "{SCHEME}{};charset={},{}",
                self.content_type,
                charset,
                urlencoding::encode_binary(&self.data)
            ),
        }
    }

    /// MIME type, e.g. `text/html`.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Payload encoding.
    pub fn encoding(&self) -> &DataEncoding {
        &self.encoding
    }

    /// Decoded payload.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decoded payload as text (lossy for invalid UTF-8).
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Whether the payload is HTML.
    pub fn is_html(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("text/html")
    }

    /// Text with any HTML markup removed and entities decoded.
    pub fn plain_text(&self) -> String {
        let text = self.as_text();
        if self.is_html() {
            strip_html(&text)
        } else {
            text
        }
    }
}

impl FromStr for DataHref {
    type Err = UcwaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

impl fmt::Display for DataHref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Whether an href is a data URI.
pub fn is_data_href(href: &str) -> bool {
    href.starts_with(SCHEME)
}

/// Encodes `text` as a data URI.
pub fn encode(text: &str, content_type: &str, encoding: DataEncoding) -> String {
    DataHref::new(content_type, encoding, text.as_bytes().to_vec()).encode()
}

/// Decodes a data URI to text.
pub fn decode(href: &str) -> Result<String> {
    Ok(DataHref::decode(href)?.as_text())
}

fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut tag = String::new();
    let mut in_tag = false;

    for c in html.chars() {
        match (in_tag, c) {
            (false, '<') => {
                in_tag = true;
                tag.clear();
            }
            (true, '>') => {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split(|ch: char| ch.is_whitespace() || ch == '/')
                    .next()
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                if name == "br" || (tag.starts_with('/') && (name == "p" || name == "div")) {
                    out.push('\n');
                }
            }
            (true, _) => tag.push(c),
            (false, _) => out.push(c),
        }
    }

    html_escape::decode_html_entities(&out).trim().to_string()
}
