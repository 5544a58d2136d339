use axum::{http::StatusCode, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiError {
    MissingFile,
    MissingFileOrHash,

    InvalidFile,
    InvalidHash,
    InvalidImage,
    InvalidQuery {
        message: String,
    },

    Sqlite {
        code: Option<isize>,
        message: Option<String>,
    },
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Sqlite { .. } | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<haarsig::Error> for ApiError {
    fn from(error: haarsig::Error) -> Self {
        use haarsig::Error::*;
        match error {
            UnsupportedInput(_) => Self::InvalidImage,
            CorruptSignature(_) | SignatureVersionMismatch { .. } => Self::InvalidHash,
            InvalidConfig(message) => Self::InvalidQuery { message },
            Sqlite(error) => Self::Sqlite {
                code: error.code,
                message: error.message,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum ApiResponse<T, E = ApiError> {
    Ok(T),
    Err { error: E },
}

impl<T> ApiResponse<T> {
    pub fn ok(value: T) -> (StatusCode, Json<Self>) {
        (StatusCode::OK, Json(Self::Ok(value)))
    }

    pub fn err(error: ApiError) -> (StatusCode, Json<Self>) {
        (error.status(), Json(Self::Err { error }))
    }
}

#[derive(Serialize)]
pub struct SignatureResponse {
    pub avglf: (f64, f64, f64),
    pub sig: Vec<i16>,
}

impl From<&haarsig::Signature> for SignatureResponse {
    fn from(signature: &haarsig::Signature) -> Self {
        Self {
            avglf: signature.avgl,
            sig: signature.sig.clone(),
        }
    }
}
