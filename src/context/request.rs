//! Read-only request facade handed to handlers.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::PathParams;
use super::form::{FilePart, Form};
use super::upload::{self, UploadError, UploadedFile};
use crate::http::{Headers, Method, Request};

/// The inbound request plus everything the dispatcher derived from it: matched
/// path parameters and the decoded form body.
///
/// Every lookup returns `Option`; a missing key is never an error.
#[derive(Debug, Clone)]
pub struct RequestView {
    inner: Request,
    params: PathParams,
    form: Form,
}

impl RequestView {
    pub(crate) fn new(inner: Request, params: PathParams, form: Form) -> Self {
        Self {
            inner,
            params,
            form,
        }
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn path(&self) -> &str {
        self.inner.path()
    }

    /// A parameter captured by the matched route pattern, e.g. `id` in `/users/:id`.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn path_params(&self) -> &PathParams {
        &self.params
    }

    /// A query-string parameter, falling back to a form field of the same name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner
            .query_param(name)
            .or_else(|| self.form.field(name))
    }

    /// Whether `name` was sent at all, even with an empty value.
    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.inner.query_param(name)
    }

    pub fn form(&self) -> &Form {
        &self.form
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name)
    }

    pub fn headers(&self) -> &Headers {
        self.inner.headers()
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    /// The value of cookie `name`, searching every `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.inner
            .headers()
            .get_all("cookie")
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.trim_matches('"'))
    }

    pub fn body(&self) -> &Bytes {
        self.inner.body()
    }

    /// Deserializes the body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(self.inner.body())
    }

    /// The raw multipart part uploaded under `field`, still in memory.
    pub fn file(&self, field: &str) -> Option<&FilePart> {
        self.form.file(field)
    }

    /// Writes the file uploaded under `field` to a uniquely named temp file.
    ///
    /// The caller owns the temp file; see [`move_file`](super::move_file).
    ///
    /// # Errors
    ///
    /// [`UploadError::MissingField`] if no file was sent under `field`, or
    /// [`UploadError::Io`] if the temp file could not be written.
    pub async fn uploaded_file(&self, field: &str) -> Result<UploadedFile, UploadError> {
        let part = self.form.file(field).ok_or_else(|| UploadError::MissingField {
            field: field.to_owned(),
        })?;
        upload::spool(part).await
    }

    /// The underlying wire request.
    pub fn inner(&self) -> &Request {
        &self.inner
    }
}
