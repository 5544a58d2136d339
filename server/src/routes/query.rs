use std::sync::Arc;

use axum::{
    extract::{Multipart, Query},
    http::StatusCode,
    Extension, Json,
};
use haarsig::{ImageId, Mode, QueryConfig, DB};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    response::{ApiResponse, SignatureResponse},
    utils::{blocking, get_signature},
};

#[derive(Deserialize)]
pub struct GetQuery {
    #[serde(alias = "l")]
    pub limit: Option<usize>,
    #[serde(alias = "h")]
    pub hash: Option<String>,
    pub sketch: Option<bool>,
    pub min_shared: Option<usize>,
}

impl GetQuery {
    /// Request overrides on top of the server defaults.
    fn config(&self, defaults: &QueryConfig) -> QueryConfig {
        let mut config = defaults.clone();
        if let Some(limit) = self.limit {
            config = config.with_limit(limit);
        }
        if let Some(sketch) = self.sketch {
            let mode = if sketch {
                Mode::Sketch
            } else {
                Mode::Photographic
            };
            config = config.with_mode(mode);
        }
        if let Some(min_shared) = self.min_shared {
            config = config.with_min_shared(min_shared);
        }
        config
    }
}

pub type GetQueryResponse = Vec<GetQueryResponseImage>;

#[derive(Serialize)]
pub struct GetQueryResponseImage {
    pub id: ImageId,
    pub distance: f64,
    pub score: f32,
    pub hash: String,
    pub signature: SignatureResponse,
}

pub async fn get(
    Extension(db): Extension<Arc<DB>>,
    Query(params): Query<GetQuery>,
    form: Option<Multipart>,
) -> (StatusCode, Json<ApiResponse<GetQueryResponse>>) {
    let config = params.config(db.config());
    let looking_for = match get_signature(params.hash, form).await {
        Ok(s) => s,
        Err(error) => return ApiResponse::err(error),
    };

    let matches = {
        let db = Arc::clone(&db);
        let config = config.clone();
        match blocking(move || db.query(&looking_for, &config)).await {
            Ok(Ok(matches)) => matches,
            Ok(Err(error)) => return ApiResponse::err(error.into()),
            Err(error) => return ApiResponse::err(error),
        }
    };
    debug!(results = matches.len(), mode = ?config.mode, "query answered");

    // Images removed since scoring are left out.
    let images: GetQueryResponse = matches
        .into_iter()
        .filter_map(|m| {
            let signature = db.signature(m.id)?;
            Some(GetQueryResponseImage {
                id: m.id,
                distance: m.distance,
                score: m.similarity,
                hash: signature.to_string(),
                signature: SignatureResponse::from(signature.as_ref()),
            })
        })
        .collect();
    ApiResponse::ok(images)
}
