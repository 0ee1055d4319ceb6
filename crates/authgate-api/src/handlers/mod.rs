//! API handlers

pub mod auth;
pub mod health;

use crate::error::AppError;
use axum::extract::{FromRequest, FromRequestParts};

/// JSON body whose rejection renders through the common error envelope
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

/// Query string whose rejection renders through the common error envelope
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct QueryParams<T>(pub T);
