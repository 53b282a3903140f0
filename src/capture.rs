use encoding_rs::{CoderResult, Decoder, Encoding};
use std::{
    fmt, io, mem,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{ready, Context, Poll},
};
use tokio::io::{AsyncRead, ReadBuf};

/// one of the two captured output streams of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// standard output
    Out,
    /// standard error output
    Err,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Channel::Out => f.write_str("stdout"),
            Channel::Err => f.write_str("stderr"),
        }
    }
}

struct Buffers {
    /// bytes produced since the last live read
    live: Vec<u8>,
    /// every byte ever produced
    complete: Vec<u8>,
    /// keeps the incomplete trailing character of a live read
    decoder: Decoder,
    /// set once, on close
    finalized: Option<String>,
}

impl Buffers {
    fn new(encoding: &'static Encoding) -> Self {
        Buffers {
            live: Vec::new(),
            complete: Vec::new(),
            decoder: encoding.new_decoder_without_bom_handling(),
            finalized: None,
        }
    }
}

/// captured output of a process call and its closed flag.
///
/// There is exactly one `Capture` per [`ProcessCall`], behind one lock:
/// the [`StreamTee`]s append to it, the live reads take from it and the
/// close marks it. Once closed nothing is appended anymore and the
/// finalized text never changes.
///
/// [`ProcessCall`]: ./struct.ProcessCall.html
pub(crate) struct Capture {
    encoding: &'static Encoding,
    out: Buffers,
    err: Buffers,
    closed: bool,
}

pub(crate) type SharedCapture = Arc<Mutex<Capture>>;

/// a panic while holding one of the crate locks cannot leave the state
/// half written (each mutation is a single append or swap), the poison is
/// ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Capture {
    pub(crate) fn new(encoding: &'static Encoding) -> Self {
        Capture {
            encoding,
            out: Buffers::new(encoding),
            err: Buffers::new(encoding),
            closed: false,
        }
    }

    pub(crate) fn shared(encoding: &'static Encoding) -> SharedCapture {
        Arc::new(Mutex::new(Capture::new(encoding)))
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    fn buffers(&self, channel: Channel) -> &Buffers {
        match channel {
            Channel::Out => &self.out,
            Channel::Err => &self.err,
        }
    }

    fn buffers_mut(&mut self, channel: Channel) -> &mut Buffers {
        match channel {
            Channel::Out => &mut self.out,
            Channel::Err => &mut self.err,
        }
    }

    /// append to both the live and the complete buffer of the channel.
    ///
    /// returns `false` and drops the bytes if the capture is closed.
    pub(crate) fn tee(&mut self, channel: Channel, bytes: &[u8]) -> bool {
        if self.closed {
            return false;
        }
        let buffers = self.buffers_mut(channel);
        buffers.live.extend_from_slice(bytes);
        buffers.complete.extend_from_slice(bytes);
        true
    }

    /// decode and clear the live buffer of the channel
    pub(crate) fn take_live(&mut self, channel: Channel) -> String {
        let buffers = self.buffers_mut(channel);
        let bytes = mem::take(&mut buffers.live);

        let capacity = buffers
            .decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len() * 3 + 4);
        let mut text = String::with_capacity(capacity);
        let (result, _read, _had_errors) =
            buffers.decoder.decode_to_string(&bytes, &mut text, false);
        debug_assert_eq!(result, CoderResult::InputEmpty);
        text
    }

    /// decoded text of everything captured so far on the channel
    pub(crate) fn complete_text(&self, channel: Channel) -> String {
        let buffers = self.buffers(channel);
        match &buffers.finalized {
            Some(text) => text.clone(),
            None => self.decode(&buffers.complete),
        }
    }

    #[inline]
    pub(crate) fn finalized(&self, channel: Channel) -> Option<&str> {
        self.buffers(channel).finalized.as_deref()
    }

    /// mark the capture closed and freeze the final text of both
    /// channels. Returns `false` if it was already closed.
    pub(crate) fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        for channel in [Channel::Out, Channel::Err] {
            let text = self.decode(&self.buffers(channel).complete);
            self.buffers_mut(channel).finalized = Some(text);
        }
        true
    }

    fn decode(&self, bytes: &[u8]) -> String {
        let (text, _had_errors) = self.encoding.decode_without_bom_handling(bytes);
        text.into_owned()
    }
}

/// duplicate everything read from `source` into the live and complete
/// buffers of one channel of a [`Capture`].
///
/// Reading from the tee is only done to trigger the copy, the bytes
/// handed to the reader are meant to be discarded (see [`drain`]).
/// The tee reports the end of the stream as soon as the capture is
/// closed.
///
/// [`drain`]: #method.drain
pub(crate) struct StreamTee<R> {
    source: R,
    channel: Channel,
    capture: SharedCapture,
}

impl<R> StreamTee<R>
where
    R: AsyncRead + Unpin,
{
    pub(crate) fn new(source: R, channel: Channel, capture: SharedCapture) -> Self {
        StreamTee {
            source,
            channel,
            capture,
        }
    }

    /// pull from the source until it is exhausted or the capture closed,
    /// returns the number of bytes pulled.
    ///
    /// Each read only takes what the source has available at that time,
    /// the pulled bytes are visible in the capture as soon as each read
    /// returns.
    pub(crate) async fn drain(mut self) -> io::Result<u64> {
        tokio::io::copy(&mut self, &mut tokio::io::sink()).await
    }
}

impl<R> AsyncRead for StreamTee<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if lock(&this.capture).is_closed() {
            return Poll::Ready(Ok(()));
        }

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.source).poll_read(cx, buf))?;

        let fresh = &buf.filled()[before..];
        if !fresh.is_empty() {
            lock(&this.capture).tee(this.channel, fresh);
        }
        Poll::Ready(Ok(()))
    }
}
