//! Cache validators and conditional request evaluation.

use std::convert::Infallible;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use axum::response::{IntoResponseParts, ResponseParts};
use axum_extra::headers::{ETag, HeaderMapExt, IfModifiedSince, IfNoneMatch, IfRange, LastModified};
use tracing::debug;

use crate::RangeBody;

/// `Last-Modified` and `ETag` of a resource. Implements [`IntoResponseParts`].
///
/// Bodies without a modification time have no validators.
#[derive(Debug, Clone, Default)]
pub struct Validators {
    modified: Option<SystemTime>,
    etag: Option<ETag>,
}

impl Validators {
    /// Derives validators from the body's modification time and size.
    pub fn of<B: RangeBody + ?Sized>(body: &B) -> Self {
        let Some(modified) = body.last_modified() else {
            return Validators::default();
        };
        let secs = modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let etag = format!("\"{:x}-{:x}\"", secs, body.byte_size()).parse().ok();
        Validators { modified: Some(modified), etag }
    }

    pub fn etag(&self) -> Option<&ETag> {
        self.etag.as_ref()
    }

    pub fn last_modified(&self) -> Option<LastModified> {
        self.modified.map(LastModified::from)
    }
}

impl IntoResponseParts for Validators {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        if let Some(last_modified) = self.last_modified() {
            res.headers_mut().typed_insert(last_modified);
        }
        if let Some(etag) = self.etag {
            res.headers_mut().typed_insert(etag);
        }
        Ok(res)
    }
}

/// Conditional headers of a request.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    if_none_match: Option<IfNoneMatch>,
    if_modified_since: Option<IfModifiedSince>,
    if_range: Option<IfRange>,
}

impl Conditions {
    /// Reads `If-None-Match`, `If-Modified-Since` and `If-Range`. Values that
    /// do not parse are ignored.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Conditions {
            if_none_match: headers.typed_get(),
            if_modified_since: headers.typed_get(),
            if_range: headers.typed_get(),
        }
    }

    /// Whether the client's copy is current and `304 Not Modified` applies.
    ///
    /// `If-None-Match` takes precedence over `If-Modified-Since`.
    pub fn not_modified(&self, validators: &Validators) -> bool {
        if let Some(if_none_match) = &self.if_none_match {
            return match validators.etag() {
                Some(etag) => !if_none_match.precondition_passes(etag),
                None => false,
            };
        }

        match (&self.if_modified_since, validators.modified) {
            (Some(since), Some(modified)) => !since.is_modified(modified),
            _ => false,
        }
    }

    /// Whether an `If-Range` validator no longer matches, in which case the
    /// `Range` header is ignored and the whole resource is sent.
    pub fn range_is_stale(&self, validators: &Validators) -> bool {
        let Some(if_range) = &self.if_range else {
            return false;
        };
        let stale = if_range.is_modified(validators.etag(), validators.last_modified().as_ref());
        if stale {
            debug!("If-Range does not match, ignoring Range");
        }
        stale
    }
}
