use std::{cmp, io, mem};
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::response::{Response, IntoResponse};
use bytes::{Bytes, BytesMut};
use http_body::{Body, SizeHint, Frame};
use futures::Stream;
use pin_project::pin_project;
use tokio::io::ReadBuf;
use tracing::{debug, warn};

use crate::RangeBody;

/// Default upper bound on the size of each yielded chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Response body stream. Implements [`Stream`], [`Body`], and [`IntoResponse`].
///
/// Reads `length` bytes starting at `start`, at most `chunk_size` bytes per
/// chunk. The stream is single pass: once it has ended it keeps returning
/// `None`.
#[pin_project]
pub struct RangedStream<B> {
    state: StreamState,
    length: u64,
    remaining: u64,
    chunk_size: usize,
    #[pin]
    body: B,
}

impl<B: RangeBody + Send + 'static> RangedStream<B> {
    pub(crate) fn new(body: B, start: u64, length: u64, chunk_size: usize) -> Self {
        RangedStream {
            state: StreamState::Seek { start },
            length,
            remaining: length,
            chunk_size: cmp::max(chunk_size, 1),
            body,
        }
    }
}

impl<B> std::fmt::Debug for RangedStream<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangedStream")
            .field("state", &self.state)
            .field("length", &self.length)
            .field("remaining", &self.remaining)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

#[derive(Debug)]
enum StreamState {
    Seek { start: u64 },
    Seeking,
    Reading { buffer: BytesMut },
    Done,
}

impl<B: RangeBody + Send + 'static> IntoResponse for RangedStream<B> {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl<B: RangeBody> Body for RangedStream<B> {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.state, StreamState::Done)
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl<B: RangeBody> Stream for RangedStream<B> {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let mut this = self.project();

        if *this.remaining == 0 {
            *this.state = StreamState::Done;
        }

        if let StreamState::Seek { start } = *this.state {
            match this.body.as_mut().start_seek(start) {
                Err(e) => { return abort(this.state, e); }
                Ok(()) => { *this.state = StreamState::Seeking; }
            }
        }

        if let StreamState::Seeking = *this.state {
            match this.body.as_mut().poll_complete(cx) {
                Poll::Pending => { return Poll::Pending; }
                Poll::Ready(Err(e)) => { return abort(this.state, e); }
                Poll::Ready(Ok(())) => {
                    let buffer = allocate_buffer(*this.chunk_size);
                    *this.state = StreamState::Reading { buffer };
                }
            }
        }

        if let StreamState::Reading { buffer } = this.state {
            let uninit = buffer.spare_capacity_mut();

            // read no more than one chunk, and never past the requested range
            let nbytes = cmp::min(
                cmp::min(uninit.len(), *this.chunk_size),
                usize::try_from(*this.remaining).unwrap_or(usize::MAX),
            );

            let mut read_buf = ReadBuf::uninit(&mut uninit[0..nbytes]);

            match this.body.as_mut().poll_read(cx, &mut read_buf) {
                Poll::Pending => { return Poll::Pending; }
                Poll::Ready(Err(e)) => { return abort(this.state, e); }
                Poll::Ready(Ok(())) => {
                    match read_buf.filled().len() {
                        0 => {
                            debug!("body ended with {} of {} bytes unread", this.remaining, this.length);
                            *this.state = StreamState::Done;
                            return Poll::Ready(None);
                        }
                        n => {
                            // SAFETY: poll_read has filled the buffer with `n`
                            // additional bytes. `buffer.len` should always be
                            // 0 here, but include it for rigorous correctness
                            unsafe { buffer.set_len(buffer.len() + n); }

                            let chunk = mem::replace(buffer, allocate_buffer(*this.chunk_size));

                            // n <= remaining because of the cmp::min above
                            *this.remaining -= n as u64;

                            return Poll::Ready(Some(Ok(chunk.freeze())));
                        }
                    }
                }
            }
        }

        Poll::Ready(None)
    }
}

/// Reports an I/O failure once and fuses the stream. Hyper drops the
/// connection when a body errors, the headers having already been sent.
fn abort(state: &mut StreamState, error: io::Error) -> Poll<Option<io::Result<Bytes>>> {
    warn!("aborting ranged stream: {}", error);
    *state = StreamState::Done;
    Poll::Ready(Some(Err(error)))
}

fn allocate_buffer(chunk_size: usize) -> BytesMut {
    BytesMut::with_capacity(chunk_size)
}
