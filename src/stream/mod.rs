pub mod blocks;
pub mod sse;
pub mod transcoder;

pub use sse::DataLineParser;
pub use transcoder::{ChunkOutcome, StreamTranscoder};

use std::fmt::Display;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::protocol::anthropic::stream::encode_anthropic_event_frame;
use crate::protocol::anthropic::AnthropicStreamEvent;

/// Encode `events` as SSE frames and clear the buffer.
///
/// Returns `None` when nothing was encoded.
pub fn encode_events(events: &mut Vec<AnthropicStreamEvent>) -> Option<Bytes> {
    if events.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(events.len() * 128);
    for event in events.drain(..) {
        encode_anthropic_event_frame(&event, &mut out);
    }
    if out.is_empty() {
        None
    } else {
        Some(Bytes::from(out))
    }
}

/// Feed payloads to the transcoder until it finishes or the batch runs out.
fn drain_payloads(
    transcoder: &mut StreamTranscoder,
    payloads: &mut Vec<String>,
    events: &mut Vec<AnthropicStreamEvent>,
) {
    for payload in payloads.drain(..) {
        if transcoder.process_data(&payload, events) == ChunkOutcome::Finished {
            break;
        }
    }
}

/// Drive a backend byte stream through `transcoder`.
///
/// The first item carries `message_start`. Every backend read yields at most
/// one item holding all frames produced by that read. A read error or an
/// early end of stream still produces a well-formed terminal sequence. The
/// backend stream is dropped as soon as the transcoder finishes.
pub fn transcode_stream<S, B, E>(
    byte_stream: S,
    transcoder: StreamTranscoder,
) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    futures_util::stream::unfold(
        (
            Some(Box::pin(byte_stream)),
            transcoder,
            DataLineParser::new(),
            Vec::<String>::with_capacity(8),
            Vec::<AnthropicStreamEvent>::with_capacity(16),
            false,
        ),
        |(mut upstream, mut transcoder, mut parser, mut payloads, mut events, mut started)| async move {
            if !started {
                started = true;
                transcoder.start(&mut events);
                let frame = encode_events(&mut events).unwrap_or_default();
                return Some((frame, (upstream, transcoder, parser, payloads, events, started)));
            }

            loop {
                let Some(stream) = upstream.as_mut() else {
                    return None;
                };
                match stream.next().await {
                    Some(Ok(chunk)) => {
                        parser.feed_into(chunk.as_ref(), &mut payloads);
                        drain_payloads(&mut transcoder, &mut payloads, &mut events);
                    }
                    Some(Err(err)) => {
                        tracing::warn!(
                            message_id = %transcoder.message_id(),
                            error = %err,
                            "backend stream read failed"
                        );
                        transcoder.finish(None, &mut events);
                    }
                    None => {
                        parser.finish_into(&mut payloads);
                        drain_payloads(&mut transcoder, &mut payloads, &mut events);
                        transcoder.finish(None, &mut events);
                    }
                }

                if transcoder.is_finished() {
                    upstream = None;
                    payloads.clear();
                }
                if let Some(frame) = encode_events(&mut events) {
                    return Some((frame, (upstream, transcoder, parser, payloads, events, started)));
                }
            }
        },
    )
}
