//! Request/response abstraction against a remote endpoint.
//!
//! The engine speaks to servers only through the [`Connector`] trait: JSON
//! GET, binary GET, JSON POST, multipart POST. The HTTP variant is the one
//! shipped; a server definition may still be tagged `ssh` (shell-over-stream)
//! and is rejected at construction. The connector never retries — error
//! classification and the continue/abort decision live in the stage engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Bounded per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status {
        status: u16,
        url: String,
        /// Response body, carried for the progress observer.
        body: String,
    },

    #[error("malformed JSON from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("unsupported server type `{0}`")]
    UnsupportedVariant(String),
}

/// Transport variant for a server definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Http,
    Ssh,
}

/// Connection information for one server, as stored in tool config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDefinition {
    #[serde(rename = "type")]
    pub kind: ServerKind,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Options for a GET request.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Treat the path as a full URL instead of joining it to the host.
    pub absolute: bool,
    /// Extra query parameters.
    pub params: Vec<(String, String)>,
}

impl GetOptions {
    pub fn absolute() -> Self {
        Self {
            absolute: true,
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }
}

/// One file part of a multipart POST.
#[derive(Debug, Clone)]
pub struct FilePart {
    /// Form field name.
    pub name: String,
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Body of a POST request.
#[derive(Debug, Clone)]
pub enum PostBody {
    Json(Value),
    Multipart {
        /// Scalar fields; non-string values are serialized as JSON text.
        fields: serde_json::Map<String, Value>,
        files: Vec<FilePart>,
    },
}

/// A received response. Body bytes are buffered whole; the transfer works
/// on small JSON documents and single file attachments.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub url: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, url: String, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            status,
            url,
            headers,
            body,
        }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<Value, ConnectorError> {
        serde_json::from_slice(&self.body).map_err(|e| ConnectorError::Decode {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Filename from `Content-Disposition: attachment; filename=…`, with
    /// surrounding quotes stripped.
    pub fn attachment_filename(&self) -> Option<String> {
        let disposition = self.header("content-disposition")?;
        if !disposition.trim_start().starts_with("attachment") {
            return None;
        }
        let raw = disposition.split("filename=").nth(1)?;
        let raw = raw.split(';').next().unwrap_or(raw).trim();
        Some(raw.trim_matches(['"', '\'']).to_string())
    }

    /// Error out on any non-2xx status, carrying the body for the observer.
    pub fn ensure_ok(self) -> Result<Self, ConnectorError> {
        if self.ok() {
            Ok(self)
        } else {
            Err(ConnectorError::Status {
                status: self.status,
                url: self.url,
                body: String::from_utf8_lossy(&self.body).into_owned(),
            })
        }
    }
}

/// Capability set the engine requires of any server connection.
pub trait Connector: std::fmt::Debug {
    fn get(&self, path: &str, options: &GetOptions) -> Result<Response, ConnectorError>;
    fn post(&self, path: &str, body: &PostBody) -> Result<Response, ConnectorError>;
}

/// Build the connector variant a server definition calls for.
pub fn build(definition: &ServerDefinition) -> Result<Box<dyn Connector>, ConnectorError> {
    match definition.kind {
        ServerKind::Http => Ok(Box::new(HttpConnector::new(definition)?)),
        ServerKind::Ssh => Err(ConnectorError::UnsupportedVariant("ssh".to_string())),
    }
}

/// Blocking HTTP implementation with basic auth when credentials are set.
#[derive(Debug)]
pub struct HttpConnector {
    client: reqwest::blocking::Client,
    host: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpConnector {
    pub fn new(definition: &ServerDefinition) -> Result<Self, ConnectorError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConnectorError::Transport {
                url: definition.host.clone(),
                message: e.to_string(),
            })?;
        let host = match definition.port {
            Some(port) => format!("{}:{port}", definition.host.trim_end_matches('/')),
            None => definition.host.clone(),
        };
        Ok(Self {
            client,
            host,
            username: definition.username.clone(),
            password: definition.password.clone(),
        })
    }

    fn url_for(&self, path: &str, absolute: bool) -> String {
        if absolute {
            path.to_string()
        } else {
            join_url(&self.host, path)
        }
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    fn read(url: &str, result: reqwest::Result<reqwest::blocking::Response>) -> Result<Response, ConnectorError> {
        let response = result.map_err(|e| ConnectorError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .map_err(|e| ConnectorError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?
            .to_vec();
        Ok(Response::new(status, final_url, headers, body))
    }
}

impl Connector for HttpConnector {
    fn get(&self, path: &str, options: &GetOptions) -> Result<Response, ConnectorError> {
        let url = self.url_for(path, options.absolute);
        let mut request = self.client.get(&url);
        if !options.params.is_empty() {
            request = request.query(&options.params);
        }
        Self::read(&url, self.authorize(request).send())
    }

    fn post(&self, path: &str, body: &PostBody) -> Result<Response, ConnectorError> {
        let url = self.url_for(path, false);
        let request = match body {
            PostBody::Json(value) => self.client.post(&url).json(value),
            PostBody::Multipart { fields, files } => {
                let mut form = reqwest::blocking::multipart::Form::new();
                for (key, value) in fields {
                    let text = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    form = form.text(key.clone(), text);
                }
                for file in files {
                    let part = reqwest::blocking::multipart::Part::bytes(file.bytes.clone())
                        .file_name(file.filename.clone());
                    form = form.part(file.name.clone(), part);
                }
                self.client.post(&url).multipart(form)
            }
        };
        Self::read(&url, self.authorize(request).send())
    }
}

fn join_url(host: &str, path: &str) -> String {
    format!(
        "{}/{}",
        host.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_definition_wire_format() {
        let definition: ServerDefinition = serde_json::from_value(json!({
            "type": "http",
            "host": "https://example.com",
            "username": "u"
        }))
        .unwrap();
        assert_eq!(definition.kind, ServerKind::Http);
        assert_eq!(definition.port, None);

        let round = serde_json::to_value(&definition).unwrap();
        assert_eq!(round["type"], json!("http"));
        assert!(round.get("password").is_none());
    }

    #[test]
    fn ssh_variant_is_rejected_at_construction() {
        let definition = ServerDefinition {
            kind: ServerKind::Ssh,
            host: "example.com".to_string(),
            username: None,
            password: None,
            port: None,
        };
        assert!(matches!(
            build(&definition),
            Err(ConnectorError::UnsupportedVariant(_))
        ));
    }

    #[test]
    fn url_joining_normalizes_slashes() {
        assert_eq!(
            join_url("https://example.com/", "/journals/1"),
            "https://example.com/journals/1"
        );
        assert_eq!(
            join_url("https://example.com", "journals/"),
            "https://example.com/journals/"
        );
    }

    #[test]
    fn attachment_filename_variants() {
        let response = |disposition: &str| {
            Response::new(
                200,
                "https://example.com/x".to_string(),
                vec![("Content-Disposition".to_string(), disposition.to_string())],
                Vec::new(),
            )
        };

        assert_eq!(
            response("attachment; filename=cover.png").attachment_filename(),
            Some("cover.png".to_string())
        );
        assert_eq!(
            response("attachment; filename=\"galley.pdf\"").attachment_filename(),
            Some("galley.pdf".to_string())
        );
        assert_eq!(
            response("attachment; filename='1.pdf'").attachment_filename(),
            Some("1.pdf".to_string())
        );
        assert_eq!(response("inline").attachment_filename(), None);
        assert_eq!(
            Response::new(200, String::new(), Vec::new(), Vec::new()).attachment_filename(),
            None
        );
    }

    #[test]
    fn ensure_ok_carries_body_for_observer() {
        let response = Response::new(
            502,
            "https://example.com/articles/".to_string(),
            Vec::new(),
            b"bad gateway".to_vec(),
        );
        match response.ensure_ok() {
            Err(ConnectorError::Status { status, body, .. }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[test]
    fn json_decode_error_names_the_url() {
        let response = Response::new(
            200,
            "https://example.com/journals/".to_string(),
            Vec::new(),
            b"<html>".to_vec(),
        );
        match response.json() {
            Err(ConnectorError::Decode { url, .. }) => {
                assert_eq!(url, "https://example.com/journals/");
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }
}
