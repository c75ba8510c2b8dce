//! Byte stream → push frame stream.
//!
//! Response bodies arrive in arbitrary chunks; [`frame_stream`] buffers them
//! through [`SseFrameBuffer`] and yields one raw frame per event-stream
//! record. Envelope decoding happens later so a bad frame can be skipped
//! without ending the stream.

use std::fmt;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tether_core::codec::SseFrameBuffer;
use tether_core::errors::ChannelError;

use crate::transport::FrameStream;

/// Adapt a chunked body into a stream of frames.
///
/// A read error is yielded once as [`ChannelError::Transport`] and ends the
/// stream. A final record missing its blank-line terminator is still yielded.
pub fn frame_stream<S, E>(byte_stream: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: fmt::Display + Send + 'static,
{
    let frames = futures::stream::unfold(
        (byte_stream, SseFrameBuffer::new(), false),
        |(mut stream, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(frame) = buffer.next_frame() {
                    return Some((Ok(frame), (stream, buffer, false)));
                }
                match stream.next().await {
                    Some(Ok(chunk)) => buffer.push(&chunk),
                    Some(Err(e)) => {
                        let err = ChannelError::transport(format!("push stream read failed: {e}"));
                        return Some((Err(err), (stream, buffer, true)));
                    }
                    None => return buffer.finish().map(|frame| (Ok(frame), (stream, buffer, true))),
                }
            }
        },
    );
    Box::pin(frames)
}
