use axum::async_trait;
use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequest, Multipart, Request};
use tracing::debug;

use crate::error::{HttpErrorResponse, ServiceError};

const UPLOAD_FIELD: &str = "file";

pub(crate) struct UploadedFile {
    pub(crate) file_name: String,
    pub(crate) bytes: Bytes,
}

/// The first multipart part named `file` that carries a filename. Requests without a
/// multipart body extract as `None` instead of being rejected.
pub(crate) struct ImageUpload(pub(crate) Option<UploadedFile>);

#[async_trait]
impl<S> FromRequest<S> for ImageUpload
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut multipart = match Multipart::from_request(req, state).await {
            Ok(multipart) => multipart,
            Err(rejection) => {
                debug!("No multipart form in request: {}", rejection);
                return Ok(ImageUpload(None));
            }
        };

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() != Some(UPLOAD_FIELD) {
                continue;
            }
            // Parts without a filename are plain form values, not uploads
            let Some(file_name) = field.file_name().map(str::to_string) else {
                continue;
            };
            let bytes = field.bytes().await.map_err(multipart_error)?;
            debug!("Received upload {:?} with {} bytes", file_name, bytes.len());
            return Ok(ImageUpload(Some(UploadedFile { file_name, bytes })));
        }

        Ok(ImageUpload(None))
    }
}

fn multipart_error(err: MultipartError) -> ServiceError {
    ServiceError {
        status: err.status(),
        message: HttpErrorResponse::from(err.body_text()),
    }
}
