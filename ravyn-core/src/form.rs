//! Form bodies: URL-encoded and multipart.

use crate::Error;
use crate::error::ErrorDetail;
use bytes::Bytes;
use futures_util::Stream;
use serde_json::{Map, Value};

/// An uploaded file from a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    /// Form field the file was sent under
    pub field: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(field: impl Into<String>, filename: Option<String>, data: impl Into<Bytes>) -> Self {
        Self {
            field: field.into(),
            filename,
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn extension(&self) -> Option<&str> {
        self.filename
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext)
    }

    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
    }

    pub fn exceeds_size(&self, max_bytes: usize) -> bool {
        self.size() > max_bytes
    }

    pub fn text(&self) -> Result<String, Error> {
        String::from_utf8(self.data.to_vec())
            .map_err(|e| Error::BadRequest(format!("Uploaded file is not UTF-8: {}", e)))
    }

    /// Metadata view used when a file is serialized.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "filename": self.filename,
            "content_type": self.content_type,
            "size": self.size(),
        })
    }

    pub async fn save_to(&self, path: impl AsRef<std::path::Path>) -> Result<(), Error> {
        tokio::fs::write(path, &self.data).await.map_err(Error::from)
    }
}

/// Parsed form body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    pub fields: Vec<(String, String)>,
    pub files: Vec<UploadFile>,
}

impl FormData {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn files_for(&self, name: &str) -> Vec<&UploadFile> {
        self.files.iter().filter(|f| f.field == name).collect()
    }

    /// Fields as a JSON object; repeated names become arrays.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for (name, value) in &self.fields {
            match object.get_mut(name) {
                Some(Value::Array(items)) => items.push(Value::String(value.clone())),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(value.clone())]);
                }
                None => {
                    object.insert(name.clone(), Value::String(value.clone()));
                }
            }
        }
        Value::Object(object)
    }
}

/// Parse an `application/x-www-form-urlencoded` body.
pub fn parse_urlencoded(body: &[u8]) -> Result<FormData, Error> {
    let fields: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
        .map_err(|e| Error::BadRequest(format!("Failed to parse form data: {}", e)))?;
    Ok(FormData {
        fields,
        files: Vec::new(),
    })
}

/// Size bounds enforced while a multipart body streams in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartLimits {
    /// Whole body, in bytes
    pub body: Option<u64>,
    /// Per named field, in bytes
    pub fields: Vec<(String, u64)>,
}

impl MultipartLimits {
    pub fn body(mut self, bytes: u64) -> Self {
        self.body = Some(bytes);
        self
    }

    pub fn field(mut self, name: impl Into<String>, bytes: u64) -> Self {
        self.fields.push((name.into(), bytes));
        self
    }

    fn constraints(&self) -> multer::Constraints {
        let mut limit = multer::SizeLimit::new();
        if let Some(bytes) = self.body {
            limit = limit.whole_stream(bytes);
        }
        for (name, bytes) in &self.fields {
            limit = limit.for_field(name.clone(), *bytes);
        }
        multer::Constraints::new().size_limit(limit)
    }
}

/// Parse a buffered `multipart/form-data` body. `content_type` is the full header value.
pub async fn parse_multipart(content_type: &str, body: Bytes) -> Result<FormData, Error> {
    let stream = futures_util::stream::once(async move { Ok::<Bytes, Error>(body) });
    parse_multipart_stream(content_type, stream, &MultipartLimits::default()).await
}

/// Parse a multipart body as it arrives. A field over its limit fails with a
/// `file_too_large` validation error before the rest of the body is read.
pub async fn parse_multipart_stream<S>(
    content_type: &str,
    stream: S,
    limits: &MultipartLimits,
) -> Result<FormData, Error>
where
    S: Stream<Item = Result<Bytes, Error>> + Send + 'static,
{
    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| Error::BadRequest(format!("Invalid multipart boundary: {}", e)))?;
    let mut multipart = multer::Multipart::with_constraints(stream, boundary, limits.constraints());

    let mut form = FormData::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, "Malformed multipart body"))?
    {
        let name = field.name().map(str::to_owned).unwrap_or_default();
        let filename = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(ToString::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, "Failed to read multipart field"))?;

        if filename.is_some() || content_type.is_some() {
            form.files.push(UploadFile {
                field: name,
                filename,
                content_type,
                data,
            });
        } else {
            form.fields
                .push((name, String::from_utf8_lossy(&data).into_owned()));
        }
    }
    Ok(form)
}

fn multipart_error(error: multer::Error, context: &str) -> Error {
    match error {
        multer::Error::FieldSizeExceeded { limit, field_name } => {
            let detail = ErrorDetail::new(
                "file_too_large",
                format!("File should be at most {} bytes", limit),
            );
            Error::validation(vec![match field_name {
                Some(name) => detail.prefixed(name),
                None => detail,
            }])
        }
        multer::Error::StreamSizeExceeded { limit } => {
            Error::http(413, format!("Request body exceeds {} bytes", limit))
        }
        multer::Error::StreamReadFailed(source) => match source.downcast::<Error>() {
            Ok(error) => *error,
            Err(source) => Error::BadRequest(format!("{}: {}", context, source)),
        },
        other => Error::BadRequest(format!("{}: {}", context, other)),
    }
}

/// Build a multipart body. Returns the `Content-Type` header value and the body.
pub fn encode_multipart(
    fields: &[(String, String)],
    files: &[UploadFile],
) -> (String, Bytes) {
    let boundary = format!("ravyn-{}", uuid::Uuid::new_v4().simple());
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    for file in files {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                file.field,
                file.filename.as_deref().unwrap_or("upload")
            )
            .as_bytes(),
        );
        body.extend_from_slice(
            format!(
                "Content-Type: {}\r\n\r\n",
                file.content_type
                    .as_deref()
                    .unwrap_or("application/octet-stream")
            )
            .as_bytes(),
        );
        body.extend_from_slice(&file.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    (
        format!("multipart/form-data; boundary={}", boundary),
        Bytes::from(body),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_urlencoded() {
        let form = parse_urlencoded(b"name=John+Doe&tag=a&tag=b").unwrap();
        assert_eq!(form.get("name"), Some("John Doe"));
        assert_eq!(form.get_all("tag"), vec!["a", "b"]);
        assert_eq!(form.to_json(), json!({"name": "John Doe", "tag": ["a", "b"]}));
    }

    #[test]
    fn test_upload_file_helpers() {
        let file = UploadFile::new("avatar", Some("me.png".into()), &b"\x89PNG"[..])
            .with_content_type("image/png");
        assert_eq!(file.extension(), Some("png"));
        assert!(file.is_image());
        assert!(file.exceeds_size(3));
        assert!(!file.exceeds_size(4));
    }

    #[tokio::test]
    async fn test_multipart_round_trip() {
        let upload = UploadFile::new("doc", Some("notes.txt".into()), "hello")
            .with_content_type("text/plain");
        let (content_type, body) =
            encode_multipart(&[("title".to_string(), "Notes".to_string())], &[upload]);

        let form = parse_multipart(&content_type, body).await.unwrap();
        assert_eq!(form.get("title"), Some("Notes"));
        let files = form.files_for("doc");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename.as_deref(), Some("notes.txt"));
        assert_eq!(files[0].text().unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_oversized_field_fails_while_streaming() {
        let upload = UploadFile::new("doc", Some("big.bin".into()), vec![7u8; 64])
            .with_content_type("application/octet-stream");
        let (content_type, body) = encode_multipart(&[], &[upload]);

        // the body arrives in small chunks; reading stops at the first oversized field
        let chunks: Vec<Result<Bytes, Error>> = body
            .chunks(16)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        let stream = futures_util::stream::iter(chunks);
        let limits = MultipartLimits::default().field("doc", 8);

        let err = parse_multipart_stream(&content_type, stream, &limits)
            .await
            .unwrap_err();
        match err {
            Error::ValidationFailed(errors) => {
                assert_eq!(errors.errors[0].error_type, "file_too_large");
                assert_eq!(errors.errors[0].loc, vec![json!("doc")]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_errors_pass_through() {
        let stream = futures_util::stream::iter(vec![Err::<Bytes, Error>(Error::http(413, "too big"))]);
        let err = parse_multipart_stream(
            "multipart/form-data; boundary=x",
            stream,
            &MultipartLimits::default(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code().as_u16(), 413);
    }

    #[tokio::test]
    async fn test_bad_boundary() {
        let err = parse_multipart("multipart/form-data", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}
