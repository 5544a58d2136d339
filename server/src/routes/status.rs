use std::sync::Arc;

use axum::{http::StatusCode, Extension, Json};
use haarsig::DB;
use serde::Serialize;

use crate::response::ApiResponse;

#[derive(Serialize)]
pub struct GetStatusResponse {
    pub images: usize,
}

pub async fn get(
    Extension(db): Extension<Arc<DB>>,
) -> (StatusCode, Json<ApiResponse<GetStatusResponse>>) {
    ApiResponse::ok(GetStatusResponse { images: db.len() })
}
