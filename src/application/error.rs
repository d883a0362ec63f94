use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{
        license::LicenseError,
        options::{ImportError, OptionsError},
    },
    cache::StoreError,
    domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<LicenseError> for HttpError {
    fn from(error: LicenseError) -> Self {
        const SOURCE: &str = "infra::http::license_error_to_http_error";
        match &error {
            LicenseError::Forbidden { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::FORBIDDEN,
                "Insufficient permissions",
                &error,
            ),
            LicenseError::Rejected => HttpError::from_error(
                SOURCE,
                StatusCode::UNPROCESSABLE_ENTITY,
                "License key was rejected",
                &error,
            ),
            LicenseError::Authority(_) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_GATEWAY,
                "License server unavailable",
                &error,
            ),
            LicenseError::Options(_) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Options storage failed",
                &error,
            ),
        }
    }
}

impl From<ImportError> for HttpError {
    fn from(error: ImportError) -> Self {
        const SOURCE: &str = "infra::http::import_error_to_http_error";
        match &error {
            ImportError::Document(_) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid settings document",
                &error,
            ),
            ImportError::Options(_) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Options storage failed",
                &error,
            ),
        }
    }
}

impl From<OptionsError> for HttpError {
    fn from(error: OptionsError) -> Self {
        HttpError::from_error(
            "infra::http::options_error_to_http_error",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Options storage failed",
            &error,
        )
    }
}

impl From<StoreError> for HttpError {
    fn from(error: StoreError) -> Self {
        HttpError::from_error(
            "infra::http::store_error_to_http_error",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Cache storage failed",
            &error,
        )
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error(transparent)]
    License(#[from] LicenseError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Cache(#[from] StoreError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Domain(_) | AppError::Import(ImportError::Document(_)) => {
                StatusCode::BAD_REQUEST
            }
            AppError::License(LicenseError::Forbidden { .. }) => StatusCode::FORBIDDEN,
            AppError::License(LicenseError::Rejected) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::License(LicenseError::Authority(_)) => StatusCode::BAD_GATEWAY,
            AppError::License(LicenseError::Options(_))
            | AppError::Import(ImportError::Options(_))
            | AppError::Options(_)
            | AppError::Cache(_)
            | AppError::Infra(_)
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Domain(_) | AppError::Import(ImportError::Document(_)) => {
                "Request could not be processed"
            }
            AppError::License(LicenseError::Forbidden { .. }) => "Insufficient permissions",
            AppError::License(LicenseError::Rejected) => "License key was rejected",
            AppError::License(LicenseError::Authority(_)) => "License server unavailable",
            AppError::License(LicenseError::Options(_))
            | AppError::Import(ImportError::Options(_))
            | AppError::Options(_) => "Options storage failed",
            AppError::Cache(_) => "Cache storage failed",
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Io(_)) => "I/O failure during request",
            AppError::Infra(InfraError::Origin { .. }) => "Origin unavailable",
            AppError::Unexpected(_) => "Unexpected error occurred",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}
