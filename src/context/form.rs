//! Request body decoding: `application/x-www-form-urlencoded` and
//! `multipart/form-data`.
//!
//! The server buffers the complete body before dispatch, so parsing works on an
//! in-memory [`Bytes`] and file parts are zero-copy slices of it.

use bytes::Bytes;
use thiserror::Error;

use crate::http::Request;

/// Maximum number of headers accepted on a single multipart part.
const MAX_PART_HEADERS: usize = 16;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("request body of {size} bytes exceeds the {max} byte upload limit")]
    TooLarge { size: usize, max: usize },

    #[error("multipart body has no boundary parameter")]
    MissingBoundary,

    #[error("malformed multipart body: {reason}")]
    Malformed { reason: &'static str },

    #[error("malformed multipart part headers: {0}")]
    PartHeaders(#[from] httparse::Error),
}

/// One uploaded file as found in a multipart body.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Decoded body fields and file parts.
#[derive(Debug, Clone, Default)]
pub struct Form {
    fields: Vec<(String, String)>,
    files: Vec<FilePart>,
}

impl Form {
    /// Decodes the body of `request` according to its `Content-Type`.
    ///
    /// Bodies of any other type (JSON, raw bytes) decode to an empty form; they
    /// stay reachable through the raw body.
    ///
    /// # Errors
    ///
    /// [`FormError::TooLarge`] when a form body is larger than `max_size`, and the
    /// multipart variants when the body does not follow RFC 7578 framing.
    pub fn parse(request: &Request, max_size: usize) -> Result<Self, FormError> {
        let Some(content_type) = request.headers().get("content-type") else {
            return Ok(Self::default());
        };
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        let is_form = mime == "application/x-www-form-urlencoded" || mime == "multipart/form-data";
        if is_form && request.body().len() > max_size {
            return Err(FormError::TooLarge {
                size: request.body().len(),
                max: max_size,
            });
        }

        match mime.as_str() {
            "application/x-www-form-urlencoded" => Ok(Self {
                fields: url::form_urlencoded::parse(request.body())
                    .into_owned()
                    .collect(),
                files: Vec::new(),
            }),
            "multipart/form-data" => {
                let boundary = header_param(content_type, "boundary")
                    .filter(|b| !b.is_empty())
                    .ok_or(FormError::MissingBoundary)?;
                parse_multipart(request.body(), &boundary)
            }
            _ => Ok(Self::default()),
        }
    }

    /// The first field named `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == name)
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// The first file part uploaded under `field`.
    pub fn file(&self, field: &str) -> Option<&FilePart> {
        self.files.iter().find(|f| f.field == field)
    }

    pub fn files(&self) -> &[FilePart] {
        &self.files
    }
}

fn parse_multipart(body: &Bytes, boundary: &str) -> Result<Form, FormError> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    // Every delimiter after the first is preceded by CRLF.
    let separator = [b"\r\n".as_slice(), delimiter].concat();

    let mut form = Form::default();
    let mut pos = find(body, delimiter).ok_or(FormError::Malformed {
        reason: "opening boundary not found",
    })? + delimiter.len();

    loop {
        let rest = &body[pos..];
        if rest.starts_with(b"--") {
            return Ok(form);
        }
        if !rest.starts_with(b"\r\n") {
            return Err(FormError::Malformed {
                reason: "boundary not followed by CRLF",
            });
        }
        pos += 2;

        let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
        let head_len = match httparse::parse_headers(&body[pos..], &mut headers)? {
            httparse::Status::Complete((len, _)) => len,
            httparse::Status::Partial => {
                return Err(FormError::Malformed {
                    reason: "truncated part headers",
                });
            }
        };

        let mut disposition = None;
        let mut part_type = None;
        for header in headers.iter().take_while(|h| !h.name.is_empty()) {
            let value = String::from_utf8_lossy(header.value).into_owned();
            if header.name.eq_ignore_ascii_case("content-disposition") {
                disposition = Some(value);
            } else if header.name.eq_ignore_ascii_case("content-type") {
                part_type = Some(value);
            }
        }

        let content_start = pos + head_len;
        let content_len = find(&body[content_start..], &separator).ok_or(FormError::Malformed {
            reason: "closing boundary not found",
        })?;
        let content = body.slice(content_start..content_start + content_len);
        pos = content_start + content_len + separator.len();

        let Some(disposition) = disposition else {
            continue;
        };
        let Some(field) = header_param(&disposition, "name") else {
            continue;
        };

        match header_param(&disposition, "filename") {
            Some(filename) => form.files.push(FilePart {
                field,
                filename,
                content_type: part_type,
                data: content,
            }),
            None => form
                .fields
                .push((field, String::from_utf8_lossy(&content).into_owned())),
        }
    }
}

/// Extracts `key=value` (optionally quoted) from a `;`-separated header value.
fn header_param(header: &str, key: &str) -> Option<String> {
    header.split(';').skip(1).find_map(|param| {
        let (k, v) = param.trim().split_once('=')?;
        k.trim()
            .eq_ignore_ascii_case(key)
            .then(|| v.trim().trim_matches('"').to_owned())
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
