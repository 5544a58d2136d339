use axum::extract::Multipart;
use haarsig::{compute_signature, Signature};

use crate::response::ApiError;

/// Runs CPU bound or blocking work (transforms, scoring, sqlite) off the
/// async workers.
pub async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|_| ApiError::Internal)
}

/// Bytes of the first `file` field. Other fields are skipped.
async fn upload(form: &mut Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = form.next_field().await.map_err(|_| ApiError::InvalidFile)? {
        if field.name() != Some("file") {
            continue;
        }
        let bytes = field.bytes().await.map_err(|_| ApiError::InvalidFile)?;
        if bytes.is_empty() {
            return Err(ApiError::InvalidFile);
        }
        return Ok(bytes.to_vec());
    }
    Err(ApiError::MissingFileOrHash)
}

/// Query signature from a `hsig_` hash, else from an uploaded image.
pub async fn get_signature(
    hash: Option<String>,
    form: Option<Multipart>,
) -> Result<Signature, ApiError> {
    match (hash, form) {
        (Some(hash), _) => hash.parse().map_err(|_| ApiError::InvalidHash),
        (None, Some(mut form)) => {
            let bytes = upload(&mut form).await?;
            blocking(move || -> Result<Signature, ApiError> {
                let img = image::load_from_memory(&bytes).map_err(|_| ApiError::InvalidImage)?;
                Ok(compute_signature(&img)?)
            })
            .await?
        }
        (None, None) => Err(ApiError::MissingFileOrHash),
    }
}
