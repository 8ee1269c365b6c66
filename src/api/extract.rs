//! ApiError で拒否する抽出器
//!
//! axum 標準の Json / Path / Multipart は拒否時にプレーンテキストを返す。
//! ここで包んで本文を `{"success": false, "error": "..."}` にそろえる。

use super::{ApiError, ApiResult};
use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Multipart, Path, Request};
use axum::http::request::Parts;
use axum::Json;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// JSON 本文
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// パスパラメーター
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// multipart の中身（ファイル1つとテキスト項目）
#[derive(Default)]
pub struct UploadForm {
    pub file: Option<(String, Bytes)>,
    pub fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                let file_name = field.file_name().unwrap_or("upload.xlsx").to_string();
                let data = field.bytes().await?;
                form.file = Some((file_name, data));
            } else {
                let value = field.text().await?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    pub fn require_file(self) -> ApiResult<(String, Bytes)> {
        match self.file {
            Some((name, data)) if !data.is_empty() => Ok((name, data)),
            Some(_) => Err(ApiError::BadRequest("uploaded file is empty".into())),
            None => Err(ApiError::BadRequest("no file uploaded".into())),
        }
    }
}

#[async_trait]
impl<S> FromRequest<S> for UploadForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let multipart = Multipart::from_request(req, state).await?;
        Self::read(multipart).await
    }
}
