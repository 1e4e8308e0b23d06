//! CFDI document lookup against SAT's ConsultaCFDI service.
use chrono::Utc;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::Config;
use crate::soap::{ClientError, SoapClient};

/// SOAP operation exposed by the lookup service.
pub const CONSULTA_OPERATION: &str = "Consulta";

/// Namespace the endpoint answers with, regardless of what its descriptor
/// declares.
pub const CONSULTA_NAMESPACE: &str = "http://tempuri.org/";

const EXPRESION_IMPRESA_PARAM: &str = "expresionImpresa";
const CFDI_STATUS_VALID: &str = "Vigente";
const NOT_CANCELLABLE: &str = "No cancelable";

/// Identifying fields of a CFDI document.
///
/// All four fields are opaque strings passed through to the service
/// verbatim; no format or checksum validation happens on this side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    pub issuer_rfc: String,
    pub addressee_rfc: String,
    pub total_amount: String,
    pub uuid: String,
}

impl InvoiceHeader {
    pub fn new(
        issuer_rfc: impl Into<String>,
        addressee_rfc: impl Into<String>,
        total_amount: impl Into<String>,
        uuid: impl Into<String>,
    ) -> Self {
        Self {
            issuer_rfc: issuer_rfc.into(),
            addressee_rfc: addressee_rfc.into(),
            total_amount: total_amount.into(),
            uuid: uuid.into(),
        }
    }

    /// Query expression the service expects, fields in fixed order.
    pub fn query_expression(&self) -> String {
        format!(
            "re={}&rr={}&tt={}&id={}",
            self.issuer_rfc, self.addressee_rfc, self.total_amount, self.uuid
        )
    }
}

/// Status codes the service returns in `CodigoEstatus`.
///
/// The documented set is closed; anything else is preserved under
/// [`ResponseStatus::Unrecognized`] and treated as a negative outcome, not
/// an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Document located.
    Found,
    /// The query expression was rejected by the service.
    InvalidExpression,
    /// No document matches the given fields.
    NotFound,
    /// Code outside the documented set.
    Unrecognized(String),
}

impl ResponseStatus {
    pub const FOUND: &'static str = "S - Comprobante obtenido satisfactoriamente.";
    pub const INVALID_EXPRESSION: &'static str =
        "N - 601: La expresión impresa proporcionada no es válida.";
    pub const NOT_FOUND: &'static str = "N - 602: Comprobante no encontrado";

    pub fn from_code(code: &str) -> Self {
        match code {
            Self::FOUND => ResponseStatus::Found,
            Self::INVALID_EXPRESSION => ResponseStatus::InvalidExpression,
            Self::NOT_FOUND => ResponseStatus::NotFound,
            _ => ResponseStatus::Unrecognized(code.to_string()),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, ResponseStatus::Found)
    }
}

/// Errors raised while decoding a lookup response body.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("response is not well-formed XML: {reason}")]
    Malformed { reason: String },
    #[error("response is missing expected element {element}")]
    MissingElement { element: &'static str },
}

/// Raw fields decoded from a `ConsultaResponse` body. Owned by the
/// orchestration while mapping and discarded afterwards.
#[derive(Debug, Default, PartialEq, Eq)]
struct ServiceResponse {
    response_status: String,
    cfdi_status: String,
    #[allow(dead_code)]
    cancellation_status: String,
    cancellable: String,
}

/// Outcome of a successful lookup.
///
/// A value is only constructed after a syntactically valid response has
/// been received and decoded; negative service outcomes surface as `false`
/// flags here rather than as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    raw_response: String,
    is_document_found: bool,
    is_valid: bool,
    is_cancellable: bool,
    timestamp: i64,
}

impl ValidationResult {
    /// Verbatim body of the decoded response, kept for auditing.
    pub fn raw_response(&self) -> &str {
        &self.raw_response
    }

    pub fn is_document_found(&self) -> bool {
        self.is_document_found
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn is_cancellable(&self) -> bool {
        self.is_cancellable
    }

    /// Unix seconds at the moment the response was mapped, not the
    /// document's own timestamp.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Orchestrates lookups against the service.
///
/// # Examples
/// ```rust,no_run
/// use cfdi_core::config::Config;
/// use cfdi_core::validation::CfdiValidator;
///
/// let validator = CfdiValidator::new(Config::default())?;
/// # let _ = validator;
/// use cfdi_core::soap::ClientError;
/// # Ok::<(), ClientError>(())
/// ```
#[derive(Debug)]
pub struct CfdiValidator {
    config: Config,
    http: reqwest::Client,
}

impl CfdiValidator {
    /// Create a new validator using the provided configuration.
    ///
    /// # Errors
    /// Returns [`ClientError`] if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().build().map_err(ClientError::Http)?;
        Ok(Self { config, http })
    }

    /// Acquire a fresh service client from the configured descriptor.
    ///
    /// The returned handle may be cached by the caller and fed back through
    /// [`validate_with_client`][Self::validate_with_client] for sequential
    /// lookups; no caching happens here.
    ///
    /// # Errors
    /// Returns [`ClientError`] if the descriptor cannot be fetched or
    /// parsed.
    pub async fn connect(&self) -> Result<SoapClient, ClientError> {
        SoapClient::connect(self.http.clone(), self.config.wsdl_url()).await
    }

    /// Check whether the document with the given fields exists in SAT's
    /// system and is valid, acquiring a fresh client for the call.
    ///
    /// # Errors
    /// Returns [`Error`] when the endpoint is unreachable, a call fails at
    /// the transport level, or the response cannot be decoded. A reachable
    /// service reporting the document as unknown or invalid is not an
    /// error; it yields a [`ValidationResult`] with negative flags.
    pub async fn validate(&self, header: &InvoiceHeader) -> Result<ValidationResult, crate::Error> {
        debug!("preparing validation service call");
        let mut client = self.connect().await?;
        self.validate_with_client(&mut client, header).await
    }

    /// Same as [`validate`][Self::validate], over a caller-supplied handle.
    pub async fn validate_with_client(
        &self,
        client: &mut SoapClient,
        header: &InvoiceHeader,
    ) -> Result<ValidationResult, crate::Error> {
        let expression = header.query_expression();
        let params = [(EXPRESION_IMPRESA_PARAM, expression.as_str())];

        ensure_consulta_namespace(client, &params).await;

        debug!("running query with fixed target namespace");
        let body = client.call(CONSULTA_OPERATION, &params).await?;

        debug!("parsing values from service response");
        let response = parse_consulta_response(&body)?;
        Ok(map_response(body, &response))
    }
}

/// Pin the channel to the namespace the endpoint answers with.
///
/// The service's descriptor embeds a schema whose `targetNamespace` is not
/// the one the endpoint uses, and a handle fresh from
/// [`SoapClient::connect`] inherits that wrong value. One discarded call
/// primes the channel, then the namespace is pinned so the next response
/// decodes correctly. A handle already pinned skips the extra call.
async fn ensure_consulta_namespace(client: &mut SoapClient, params: &[(&str, &str)]) {
    if client.target_namespace() == CONSULTA_NAMESPACE {
        return;
    }
    debug!("fetching results from first query");
    if let Err(err) = client.call(CONSULTA_OPERATION, params).await {
        // The first response is discarded either way; the correction below
        // is what the real call depends on.
        debug!(error = %err, "discarding failed first query");
    }
    debug!("fixing target namespace");
    client.set_target_namespace(CONSULTA_NAMESPACE);
}

fn parse_consulta_response(xml: &str) -> Result<ServiceResponse, ParseError> {
    #[derive(Clone, Copy)]
    enum Field {
        ResponseStatus,
        CfdiStatus,
        CancellationStatus,
        Cancellable,
    }

    let mut reader = Reader::from_str(xml);
    let mut response = ServiceResponse::default();
    let mut in_response = false;
    let mut in_result = false;
    let mut seen_response = false;
    let mut seen_result = false;
    let mut current = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = None;
                match e.local_name().as_ref() {
                    b"ConsultaResponse" => {
                        in_response = true;
                        seen_response = true;
                    }
                    b"ConsultaResult" if in_response => {
                        in_result = true;
                        seen_result = true;
                    }
                    b"CodigoEstatus" if in_result => current = Some(Field::ResponseStatus),
                    b"Estado" if in_result => current = Some(Field::CfdiStatus),
                    b"EstatusCancelacion" if in_result => {
                        current = Some(Field::CancellationStatus);
                    }
                    b"EsCancelable" if in_result => current = Some(Field::Cancellable),
                    _ => {}
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(field) = current {
                    let value = text.unescape().map_err(|e| ParseError::Malformed {
                        reason: e.to_string(),
                    })?;
                    let slot = match field {
                        Field::ResponseStatus => &mut response.response_status,
                        Field::CfdiStatus => &mut response.cfdi_status,
                        Field::CancellationStatus => &mut response.cancellation_status,
                        Field::Cancellable => &mut response.cancellable,
                    };
                    slot.push_str(&value);
                }
            }
            Ok(Event::End(e)) => {
                current = None;
                match e.local_name().as_ref() {
                    b"ConsultaResponse" => in_response = false,
                    b"ConsultaResult" => in_result = false,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ParseError::Malformed {
                    reason: e.to_string(),
                });
            }
        }
    }
    if !seen_response {
        return Err(ParseError::MissingElement {
            element: "ConsultaResponse",
        });
    }
    if !seen_result {
        return Err(ParseError::MissingElement {
            element: "ConsultaResult",
        });
    }
    Ok(response)
}

fn map_response(raw_response: String, response: &ServiceResponse) -> ValidationResult {
    let status = ResponseStatus::from_code(&response.response_status);
    match &status {
        ResponseStatus::Found => debug!("document located"),
        ResponseStatus::InvalidExpression => {
            debug!(code = %response.response_status, "service rejected the query expression");
        }
        ResponseStatus::NotFound => debug!("no document matches the given fields"),
        ResponseStatus::Unrecognized(code) => error!(code = %code, "unrecognized response status"),
    }
    ValidationResult {
        raw_response,
        is_document_found: status.is_found(),
        is_valid: response.cfdi_status == CFDI_STATUS_VALID,
        is_cancellable: response.cancellable != NOT_CANCELLABLE,
        timestamp: Utc::now().timestamp(),
    }
}
