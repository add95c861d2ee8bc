use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Byte count and limit state shared between a [`MeteredReader`] and the pipeline.
#[derive(Debug, Default)]
pub(crate) struct UploadMeter {
    bytes: AtomicU64,
    exceeded: AtomicBool,
}

impl UploadMeter {
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn exceeded(&self) -> bool {
        self.exceeded.load(Ordering::Acquire)
    }
}

/// Counts bytes read through it and fails the read once `limit` is passed.
pub(crate) struct MeteredReader<R> {
    inner: R,
    limit: u64,
    meter: Arc<UploadMeter>,
}

impl<R> MeteredReader<R> {
    pub fn new(inner: R, limit: u64, meter: Arc<UploadMeter>) -> Self {
        Self {
            inner,
            limit,
            meter,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for MeteredReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = (buf.filled().len() - before) as u64;
                let total = this.meter.bytes.fetch_add(read, Ordering::AcqRel) + read;
                if total > this.limit {
                    this.meter.exceeded.store(true, Ordering::Release);
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "upload exceeds the size limit",
                    )));
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
