//! # axum-media-range
//!
//! Upload media files into a directory and play them back in a browser with
//! seeking, using HTTP range responses served by [`axum`][1].
//!
//! The range machinery is generic over any body implementing the
//! [`RangeBody`] trait. Any type implementing both [`AsyncRead`] and
//! [`AsyncSeekStart`] can be used through the [`KnownSize`] adapter struct,
//! with special cased support for [`tokio::fs::File`], see
//! [`KnownSize::file`].
//!
//! ```
//! use axum::Router;
//! use axum::http::HeaderMap;
//! use axum::http::header::RANGE;
//! use axum::routing::get;
//!
//! use axum_media_range::{KnownSize, Ranged};
//!
//! async fn file(headers: HeaderMap) -> axum::response::Response {
//!     use axum::response::IntoResponse;
//!
//!     let file = match tokio::fs::File::open("movie.mp4").await {
//!         Ok(file) => file,
//!         Err(_) => return axum::http::StatusCode::NOT_FOUND.into_response(),
//!     };
//!     match KnownSize::file(file).await {
//!         Ok(body) => Ranged::from_header(headers.get(RANGE), body, Some("video/mp4".into()))
//!             .into_response(),
//!         Err(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response(),
//!     }
//! }
//!
//! let _app = Router::<()>::new().route("/", get(file));
//! ```
//!
//! The full application (upload, listing, deletion and playback) is
//! assembled by [`server::router`] over a [`FileStore`].
//!
//! [1]: https://docs.rs/axum

pub mod cli;
mod conditional;
pub mod config;
pub mod error;
mod file;
pub mod logging;
pub mod name;
mod parse;
pub mod server;
pub mod store;
mod stream;

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::SystemTime;

use axum::http::header::{CONTENT_TYPE, RANGE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::TypedHeader;
use axum_extra::headers::{AcceptRanges, ContentLength, ContentRange};
use tokio::io::{AsyncRead, AsyncSeek};
use tracing::debug;

pub use conditional::{Conditions, Validators};
pub use file::KnownSize;
pub use parse::{parse_range, ByteRange, InvalidRange, RangeOutcome};
pub use store::{DiskStore, FileStore};
pub use stream::{RangedStream, DEFAULT_CHUNK_SIZE};

const OCTET_STREAM: &str = "application/octet-stream";

/// [`AsyncSeek`] narrowed to only allow seeking from start.
pub trait AsyncSeekStart {
    /// Same semantics as [`AsyncSeek::start_seek`], always passing position as the `SeekFrom::Start` variant.
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()>;

    /// Same semantics as [`AsyncSeek::poll_complete`], returning `()` instead of the new stream position.
    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

impl<T: AsyncSeek> AsyncSeekStart for T {
    fn start_seek(self: Pin<&mut Self>, position: u64) -> io::Result<()> {
        AsyncSeek::start_seek(self, io::SeekFrom::Start(position))
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncSeek::poll_complete(self, cx).map_ok(|_| ())
    }
}

/// An [`AsyncRead`] and [`AsyncSeekStart`] with a fixed known byte size.
pub trait RangeBody: AsyncRead + AsyncSeekStart {
    /// The total size of the underlying file.
    ///
    /// This should not change for the lifetime of the object once queried.
    /// Behaviour is not guaranteed if it does change.
    fn byte_size(&self) -> u64;

    /// When the underlying file was last modified, if known. Used for the
    /// `Last-Modified` and `ETag` validators.
    fn last_modified(&self) -> Option<SystemTime> {
        None
    }
}

/// The main responder type. Implements [`IntoResponse`].
#[derive(Debug)]
pub struct Ranged<B: RangeBody + Send + 'static> {
    outcome: RangeOutcome,
    body: B,
    content_type: Option<String>,
    chunk_size: usize,
    conditions: Conditions,
}

impl<B: RangeBody + Send + 'static> Ranged<B> {
    /// Construct a ranged response from an already evaluated `Range` header.
    pub fn new(outcome: RangeOutcome, body: B, content_type: Option<String>) -> Self {
        Ranged {
            outcome,
            body,
            content_type,
            chunk_size: DEFAULT_CHUNK_SIZE,
            conditions: Conditions::default(),
        }
    }

    /// Construct a ranged response from the request headers, honouring
    /// `Range` along with the conditional headers (see [`Conditions`]).
    pub fn from_headers(headers: &HeaderMap, body: B, content_type: Option<String>) -> Self {
        Ranged::from_header(headers.get(RANGE), body, content_type)
            .conditions(Conditions::from_headers(headers))
    }

    /// Construct a ranged response from the raw `Range` header, if any,
    /// evaluated against [`RangeBody::byte_size`].
    ///
    /// A header value that is not valid text is treated as a malformed unit.
    pub fn from_header(header: Option<&HeaderValue>, body: B, content_type: Option<String>) -> Self {
        let outcome = match header.map(HeaderValue::to_str) {
            None => RangeOutcome::Full,
            Some(Ok(value)) => parse_range(Some(value), body.byte_size()),
            Some(Err(_)) => RangeOutcome::Invalid(InvalidRange::MalformedUnit),
        };
        Ranged::new(outcome, body, content_type)
    }

    /// Sets the conditional headers evaluated before the range.
    pub fn conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = conditions;
        self
    }

    /// Sets the maximum number of bytes read from the body per chunk.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Responds to the request, returning headers and body as
    /// [`RangedResponse`]. Returns a [`RangeRejection`] if the header was
    /// malformed or the requested range was not satisfiable.
    ///
    /// A request whose validators match gets [`RangedResponse::NotModified`]
    /// whatever its range. A stale `If-Range` turns the request into a full
    /// one.
    pub fn try_respond(self) -> Result<RangedResponse<B>, RangeRejection> {
        let total_bytes = self.body.byte_size();
        let content_type = self.content_type;
        let validators = Validators::of(&self.body);

        if self.conditions.not_modified(&validators) {
            debug!("validators match, not modified");
            return Ok(RangedResponse::NotModified { validators });
        }

        let outcome = match self.outcome {
            RangeOutcome::Full => RangeOutcome::Full,
            _ if self.conditions.range_is_stale(&validators) => RangeOutcome::Full,
            outcome => outcome,
        };

        match outcome {
            RangeOutcome::Full => {
                debug!("no range requested, returning full body of {} bytes", total_bytes);
                let stream = RangedStream::new(self.body, 0, total_bytes, self.chunk_size);
                Ok(RangedResponse::Full {
                    content_length: ContentLength(total_bytes),
                    stream,
                    content_type,
                    validators,
                })
            }
            RangeOutcome::Partial(range) if range.start <= range.end && range.end < total_bytes => {
                debug!("serving bytes {}-{}/{}", range.start, range.end, total_bytes);
                let content_range = ContentRange::bytes(range.start..=range.end, total_bytes)
                    .expect("ContentRange::bytes cannot panic in this usage");
                let stream = RangedStream::new(self.body, range.start, range.len(), self.chunk_size);
                Ok(RangedResponse::Partial {
                    content_range,
                    content_length: ContentLength(range.len()),
                    stream,
                    content_type,
                    validators,
                })
            }
            // inverted, or evaluated against a larger size than the body reports
            RangeOutcome::Partial(_) | RangeOutcome::Invalid(InvalidRange::NotSatisfiable) => {
                Err(RangeRejection::NotSatisfiable(RangeNotSatisfiable(
                    ContentRange::unsatisfied_bytes(total_bytes),
                )))
            }
            RangeOutcome::Invalid(InvalidRange::MalformedUnit) => Err(RangeRejection::Malformed),
        }
    }
}

impl<B: RangeBody + Send + 'static> IntoResponse for Ranged<B> {
    fn into_response(self) -> Response {
        self.try_respond().into_response()
    }
}

/// Error type indicating that the requested range was not satisfiable. Implements [`IntoResponse`].
#[derive(Debug, Clone)]
pub struct RangeNotSatisfiable(pub ContentRange);

impl IntoResponse for RangeNotSatisfiable {
    fn into_response(self) -> Response {
        let status = StatusCode::RANGE_NOT_SATISFIABLE;
        let header = TypedHeader(self.0);
        (status, header, ()).into_response()
    }
}

/// Why a `Range` header could not be honoured. Implements [`IntoResponse`].
#[derive(Debug, Clone)]
pub enum RangeRejection {
    /// `400 Bad Request`, the header did not use the `bytes` unit.
    Malformed,
    /// `416 Range Not Satisfiable` with `Content-Range: bytes */<size>`.
    NotSatisfiable(RangeNotSatisfiable),
}

impl IntoResponse for RangeRejection {
    fn into_response(self) -> Response {
        match self {
            RangeRejection::Malformed => (StatusCode::BAD_REQUEST, ()).into_response(),
            RangeRejection::NotSatisfiable(e) => e.into_response(),
        }
    }
}

/// Data type containing computed headers and body for a range response. Implements [`IntoResponse`].
#[derive(Debug)]
pub enum RangedResponse<B> {
    /// `200 OK` with the whole body, no range requested.
    Full {
        content_length: ContentLength,
        stream: RangedStream<B>,
        content_type: Option<String>,
        validators: Validators,
    },
    /// `206 Partial Content` with a single byte range.
    Partial {
        content_range: ContentRange,
        content_length: ContentLength,
        stream: RangedStream<B>,
        content_type: Option<String>,
        validators: Validators,
    },
    /// `304 Not Modified`, the client's copy is current.
    NotModified {
        validators: Validators,
    },
}

impl<B: RangeBody + Send + 'static> IntoResponse for RangedResponse<B> {
    fn into_response(self) -> Response {
        let accept_ranges = TypedHeader(AcceptRanges::bytes());

        match self {
            RangedResponse::Full { content_length, stream, content_type, validators } => {
                let content_type = content_type_header(content_type);
                (StatusCode::OK, accept_ranges, TypedHeader(content_length), content_type, validators, stream)
                    .into_response()
            }
            RangedResponse::Partial { content_range, content_length, stream, content_type, validators } => {
                let content_type = content_type_header(content_type);
                (
                    StatusCode::PARTIAL_CONTENT,
                    accept_ranges,
                    TypedHeader(content_range),
                    TypedHeader(content_length),
                    content_type,
                    validators,
                    stream,
                )
                    .into_response()
            }
            RangedResponse::NotModified { validators } => {
                (StatusCode::NOT_MODIFIED, accept_ranges, validators, ()).into_response()
            }
        }
    }
}

fn content_type_header(content_type: Option<String>) -> [(axum::http::HeaderName, HeaderValue); 1] {
    let value = content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static(OCTET_STREAM));
    [(CONTENT_TYPE, value)]
}
