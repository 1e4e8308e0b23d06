//! Rust client for validating CFDI documents against SAT's ConsultaCFDI service.
//!
//! # Examples
//! ```rust,no_run
//! use cfdi_core::config::Config;
//! use cfdi_core::validation::{CfdiValidator, InvoiceHeader};
//!
//! # async fn run() -> Result<(), cfdi_core::Error> {
//! let validator = CfdiValidator::new(Config::default())?;
//! let header = InvoiceHeader::new(
//!     "LSO1306189R5",
//!     "GACJ940911ASA",
//!     "4999.99",
//!     "e7df3047-f8de-425d-b469-37abe5b4dabb",
//! );
//! let result = validator.validate(&header).await?;
//! println!("found: {}", result.is_document_found());
//! # Ok(())
//! # }
//! ```
pub mod config;
pub mod soap;
pub mod validation;

use thiserror::Error;

/// Top-level error wrapper for core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] soap::ClientError),
    #[error(transparent)]
    Call(#[from] soap::CallError),
    #[error(transparent)]
    Parse(#[from] validation::ParseError),
}

#[cfg(test)]
mod tests {
    use super::Error;
    use crate::soap::{CallError, ClientError};
    use crate::validation::ParseError;

    #[test]
    fn error_conversions_cover_variants() {
        let client_err = ClientError::Descriptor {
            url: "http://example.invalid/service?wsdl".into(),
            reason: "descriptor has no soap:address location".into(),
        };
        let err: Error = client_err.into();
        assert!(matches!(err, Error::Client(_)));

        let call_err = CallError::Status {
            operation: "Consulta".into(),
            endpoint: "http://example.invalid/service".into(),
            status: reqwest::StatusCode::BAD_GATEWAY,
            body: "gateway error".into(),
        };
        let err: Error = call_err.into();
        assert!(matches!(err, Error::Call(_)));

        let err: Error = ParseError::MissingElement {
            element: "ConsultaResponse",
        }
        .into();
        assert!(matches!(err, Error::Parse(_)));
    }
}
