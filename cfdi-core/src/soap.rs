//! Minimal SOAP 1.1 transport for the lookup endpoint.
//!
//! Covers just what the lookup workflow needs: acquiring a handle from a
//! WSDL descriptor, invoking an operation, and overriding the namespace
//! used to address it.
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// Errors raised while acquiring a service client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to fetch service descriptor from {url}: {source}")]
    Fetch { url: String, source: reqwest::Error },
    #[error("service descriptor at {url} returned status {status}")]
    DescriptorStatus {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("malformed service descriptor at {url}: {reason}")]
    Descriptor { url: String, reason: String },
}

/// Errors raised by a SOAP operation call.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("transport error while calling {operation} at {endpoint}: {source}")]
    Transport {
        operation: String,
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("{operation} at {endpoint} returned status {status}: {body}")]
    Status {
        operation: String,
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Handle to a SOAP endpoint described by a WSDL document.
///
/// A handle may be reused across sequential calls. Concurrent callers
/// should each acquire their own handle or serialize access externally.
#[derive(Debug)]
pub struct SoapClient {
    http: Client,
    endpoint: String,
    target_namespace: String,
}

impl SoapClient {
    /// Fetch and parse a WSDL descriptor, producing a reusable handle.
    ///
    /// The operation namespace is taken from the first schema embedded in
    /// the descriptor's types section, falling back to the definitions
    /// element when no schema declares one.
    ///
    /// # Errors
    /// Returns [`ClientError`] if the descriptor cannot be fetched or
    /// parsed, or if it names no endpoint address.
    pub async fn connect(http: Client, wsdl_url: &str) -> Result<Self, ClientError> {
        debug!(url = wsdl_url, "fetching service descriptor");
        let response = http
            .get(wsdl_url)
            .send()
            .await
            .map_err(|source| ClientError::Fetch {
                url: wsdl_url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::DescriptorStatus {
                url: wsdl_url.to_string(),
                status,
            });
        }
        let body = response.text().await.map_err(|source| ClientError::Fetch {
            url: wsdl_url.to_string(),
            source,
        })?;
        let descriptor =
            WsdlDescriptor::parse(&body).map_err(|reason| ClientError::Descriptor {
                url: wsdl_url.to_string(),
                reason,
            })?;
        debug!(
            endpoint = %descriptor.endpoint,
            namespace = %descriptor.target_namespace,
            "service client ready"
        );
        Ok(Self {
            http,
            endpoint: descriptor.endpoint,
            target_namespace: descriptor.target_namespace,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Namespace used to address operations on this handle.
    pub fn target_namespace(&self) -> &str {
        &self.target_namespace
    }

    /// Override the namespace used for subsequent calls.
    pub fn set_target_namespace(&mut self, namespace: impl Into<String>) {
        self.target_namespace = namespace.into();
    }

    /// Invoke `operation` with the given parameters and return the raw
    /// response body.
    ///
    /// # Errors
    /// Returns [`CallError`] if the transport fails or the endpoint answers
    /// with a non-success status.
    pub async fn call(
        &self,
        operation: &str,
        params: &[(&str, &str)],
    ) -> Result<String, CallError> {
        let envelope = self.build_envelope(operation, params);
        let action = format!("{}{}", self.target_namespace, operation);
        debug!(operation, endpoint = %self.endpoint, "calling SOAP operation");
        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", action)
            .body(envelope)
            .send()
            .await
            .map_err(|source| CallError::Transport {
                operation: operation.to_string(),
                endpoint: self.endpoint.clone(),
                source,
            })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| CallError::Transport {
                operation: operation.to_string(),
                endpoint: self.endpoint.clone(),
                source,
            })?;
        if !status.is_success() {
            return Err(CallError::Status {
                operation: operation.to_string(),
                endpoint: self.endpoint.clone(),
                status,
                body,
            });
        }
        Ok(body)
    }

    fn build_envelope(&self, operation: &str, params: &[(&str, &str)]) -> String {
        let mut arguments = String::new();
        for (name, value) in params {
            arguments.push_str(&format!("<{name}>{}</{name}>", escape(*value)));
        }
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\">\
             <soap:Body>\
             <{operation} xmlns=\"{}\">{arguments}</{operation}>\
             </soap:Body>\
             </soap:Envelope>",
            self.target_namespace
        )
    }
}

#[derive(Debug)]
struct WsdlDescriptor {
    endpoint: String,
    target_namespace: String,
}

impl WsdlDescriptor {
    fn parse(xml: &str) -> Result<Self, String> {
        let mut reader = Reader::from_str(xml);
        let mut endpoint = None;
        let mut definitions_namespace = None;
        let mut schema_namespace = None;
        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"definitions" => {
                        definitions_namespace = attribute_value(&e, b"targetNamespace")?;
                    }
                    b"schema" => {
                        if schema_namespace.is_none() {
                            schema_namespace = attribute_value(&e, b"targetNamespace")?;
                        }
                    }
                    b"address" => {
                        if endpoint.is_none() {
                            endpoint = attribute_value(&e, b"location")?;
                        }
                    }
                    _ => {}
                },
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(format!("invalid descriptor XML: {e}")),
            }
        }
        let endpoint =
            endpoint.ok_or_else(|| "descriptor has no soap:address location".to_string())?;
        let target_namespace = schema_namespace
            .or(definitions_namespace)
            .ok_or_else(|| "descriptor declares no targetNamespace".to_string())?;
        Ok(Self {
            endpoint,
            target_namespace,
        })
    }
}

fn attribute_value(element: &BytesStart, name: &[u8]) -> Result<Option<String>, String> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| format!("invalid descriptor attribute: {e}"))?;
        if attribute.key.local_name().as_ref() == name {
            let value = attribute
                .unescape_value()
                .map_err(|e| format!("invalid descriptor attribute value: {e}"))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
