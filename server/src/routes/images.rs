use std::sync::Arc;

use axum::{
    extract::{Multipart, Path},
    http::StatusCode,
    Extension, Json,
};
use haarsig::{ImageId, Signature, SqlDB, DB};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    response::{ApiError, ApiResponse},
    utils::{blocking, get_signature},
};

#[derive(Serialize)]
pub struct PostImageResponse {
    pub id: ImageId,
    pub hash: String,
}

#[derive(Serialize)]
pub struct DeleteImageResponse {
    pub id: ImageId,
    pub removed: bool,
}

pub async fn post(
    Extension(sql_db): Extension<Arc<Mutex<SqlDB>>>,
    Extension(db): Extension<Arc<DB>>,
    Path(id): Path<ImageId>,
    form: Multipart,
) -> (StatusCode, Json<ApiResponse<PostImageResponse>>) {
    let sig = match get_signature(None, Some(form)).await {
        Ok(sig) => sig,
        Err(mut error) => {
            if matches!(error, ApiError::MissingFileOrHash) {
                error = ApiError::MissingFile;
            }
            return ApiResponse::err(error);
        }
    };
    let hash = sig.to_string();

    // The store lock also orders the in-memory update for this id.
    let stored = blocking(move || store(&sql_db.blocking_lock(), &db, id, sig)).await;
    match stored {
        Ok(Ok(())) => info!(id, "image added"),
        Ok(Err(error)) => return ApiResponse::err(error.into()),
        Err(error) => return ApiResponse::err(error),
    }

    ApiResponse::ok(PostImageResponse { id, hash })
}

fn store(sql_db: &SqlDB, db: &DB, id: ImageId, sig: Signature) -> haarsig::Result<()> {
    sql_db.insert(id, &sig)?;
    db.insert(id, sig)
}

pub async fn delete(
    Extension(sql_db): Extension<Arc<Mutex<SqlDB>>>,
    Extension(db): Extension<Arc<DB>>,
    Path(id): Path<ImageId>,
) -> (StatusCode, Json<ApiResponse<DeleteImageResponse>>) {
    let removed = blocking(move || -> haarsig::Result<bool> {
        let sql_db = sql_db.blocking_lock();
        let stored = sql_db.delete(id)?;
        let indexed = db.remove(id).is_some();
        Ok(stored || indexed)
    })
    .await;
    let removed = match removed {
        Ok(Ok(removed)) => removed,
        Ok(Err(error)) => return ApiResponse::err(error.into()),
        Err(error) => return ApiResponse::err(error),
    };
    if removed {
        info!(id, "image removed");
    }
    ApiResponse::ok(DeleteImageResponse { id, removed })
}
