use actix_files::NamedFile;
use actix_multipart::Multipart;
use actix_web::{Error, HttpRequest, HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use log::{error, info};
use shared::{ErrorResponse, FileListResponse, StatusResponse, TaskVariant, UploadResponse};

use crate::dispatch::{DispatchError, JobDispatcher};
use crate::storage::content_store::MAX_FILE_SIZE;
use crate::storage::{ContentStore, StoreError};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(health)))
        .service(web::resource("/api/upload").route(web::post().to(upload_file)))
        .service(web::resource("/api/files").route(web::get().to(list_files)))
        .service(web::resource("/api/detected").route(web::get().to(list_detected)))
        .service(web::resource("/api/detected/{filename}").route(web::get().to(get_detected)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(StatusResponse {
        message: "Image Upload & Detection API".to_string(),
        status: "running".to_string(),
    })
}

fn store_error_response(e: StoreError) -> HttpResponse {
    let body = ErrorResponse {
        error: e.to_string(),
    };
    if e.is_client_error() {
        HttpResponse::BadRequest().json(body)
    } else {
        error!("storage failure: {}", body.error);
        HttpResponse::InternalServerError().json(body)
    }
}

async fn upload_file(
    mut payload: Multipart,
    store: web::Data<ContentStore>,
    dispatcher: web::Data<JobDispatcher>,
) -> Result<HttpResponse, Error> {
    let mut file_data: Vec<u8> = Vec::new();
    let mut file_len: usize = 0;
    let mut file_name: Option<String> = None;
    let mut mime_type: Option<String> = None;
    let mut process_type = TaskVariant::default();

    while let Ok(Some(mut field)) = payload.try_next().await {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" => {
                file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .map(String::from);
                mime_type = field.content_type().map(|m| m.to_string());
                while let Some(chunk) = field.next().await {
                    let data = chunk?;
                    // Buffering stops at the ceiling, but the true
                    // size keeps counting for the rejection message.
                    file_len += data.len();
                    if file_data.len() <= MAX_FILE_SIZE {
                        file_data.extend_from_slice(&data);
                    }
                }
            }
            "process_type" => {
                let mut raw = Vec::new();
                while let Some(chunk) = field.next().await {
                    raw.extend_from_slice(&chunk?);
                }
                process_type = TaskVariant::parse_or_default(&String::from_utf8_lossy(&raw));
            }
            _ => {
                // Drain unknown fields.
                while field.next().await.is_some() {}
            }
        }
    }

    let Some(original_file_name) = file_name else {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "missing file field".to_string(),
        }));
    };

    if file_len > MAX_FILE_SIZE {
        return Ok(store_error_response(StoreError::FileTooLarge {
            size: file_len,
            limit: MAX_FILE_SIZE,
        }));
    }

    let outcome = match store.put(&original_file_name, &file_data) {
        Ok(outcome) => outcome,
        Err(e) => return Ok(store_error_response(e)),
    };

    let submit = match dispatcher.submit(&outcome.image, process_type) {
        Ok(submit) => submit,
        Err(DispatchError::QueueFull) => {
            return Ok(HttpResponse::ServiceUnavailable().json(ErrorResponse {
                error: "job queue is full, retry later".to_string(),
            }));
        }
        Err(e) => {
            error!("dispatch failure: {}", e);
            return Ok(HttpResponse::InternalServerError().json(ErrorResponse {
                error: e.to_string(),
            }));
        }
    };

    let message = if submit.already_processed {
        "File already processed; the result artifact exists."
    } else if submit.already_running {
        "Processing already in progress for this file."
    } else if outcome.deduplicated {
        "Reusing existing file."
    } else {
        "File saved successfully."
    };

    info!(
        "upload {} as {} ({} bytes, variant {}): {}",
        original_file_name, outcome.image.file_name, outcome.image.size, process_type, message
    );

    let relative_path = outcome
        .image
        .path
        .strip_prefix(store.data_dir().parent().unwrap_or(store.data_dir()))
        .unwrap_or(&outcome.image.path)
        .to_string_lossy()
        .into_owned();

    Ok(HttpResponse::Ok().json(UploadResponse {
        success: true,
        message: message.to_string(),
        file_name: outcome.image.file_name.clone(),
        original_file_name,
        path: relative_path,
        size: outcome.image.size,
        mime_type,
        process_type,
        already_processed: submit.already_processed,
        already_running: submit.already_running,
        launched: submit.launched,
    }))
}

async fn list_files(store: web::Data<ContentStore>) -> HttpResponse {
    match store.list_uploads() {
        Ok(files) => HttpResponse::Ok().json(FileListResponse {
            success: true,
            count: files.len(),
            files,
        }),
        Err(e) => store_error_response(e),
    }
}

async fn list_detected(store: web::Data<ContentStore>) -> HttpResponse {
    match store.list_results() {
        Ok(files) => HttpResponse::Ok().json(FileListResponse {
            success: true,
            count: files.len(),
            files,
        }),
        Err(e) => store_error_response(e),
    }
}

async fn get_detected(
    req: HttpRequest,
    store: web::Data<ContentStore>,
    path: web::Path<String>,
) -> Result<HttpResponse, Error> {
    let file_name = path.into_inner();
    match store.result_file(&file_name) {
        Ok(Some(path)) => Ok(NamedFile::open_async(path).await?.into_response(&req)),
        Ok(None) => Ok(HttpResponse::NotFound().json(ErrorResponse {
            error: format!("result not found: {}", file_name),
        })),
        Err(e) => Ok(store_error_response(e)),
    }
}
