//! Normalizes backend output into a stream of [`GenerationEvent`]s.
//!
//! A batch backend's single answer becomes one non-terminal event and the
//! stream ends there; there is no trailing `"stop"` event on success.  An
//! incremental backend's events are forwarded until the first terminal event.
//! A backend failure is yielded once as an `Err` and ends the stream.
//! Nothing runs until the stream is first polled.

use std::future::Future;

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;
use crate::llm::message::GenerationEvent;

/// Lazy, finite, non-restartable sequence of generation events.
pub type EventStream = BoxStream<'static, Result<GenerationEvent>>;

/// Sampling parameters passed to every backend invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    pub max_new_tokens: usize,
    pub do_sample: bool,
    pub temperature: f32,
    pub top_p: f32,
    /// End-of-sequence markers declared by the backend.
    pub stop_sequences: Vec<String>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            do_sample: true,
            temperature: 0.6,
            top_p: 0.9,
            stop_sequences: Vec::new(),
        }
    }
}

/// What a backend hands back once invoked.
pub enum BackendReply {
    /// One complete answer.
    Complete(String),
    /// Events produced token by token, already tagged with finish reasons.
    Incremental(EventStream),
}

impl std::fmt::Debug for BackendReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendReply::Complete(text) => f.debug_tuple("Complete").field(text).finish(),
            BackendReply::Incremental(_) => f.write_str("Incremental(..)"),
        }
    }
}

/// A stream holding exactly one terminal event.
pub fn terminal(message: impl Into<String>) -> EventStream {
    stream::once(future::ready(Ok(GenerationEvent::stop(message)))).boxed()
}

/// Drive a backend invocation and expose its reply as events.
pub fn drive<F>(invoke: F) -> EventStream
where
    F: Future<Output = Result<BackendReply>> + Send + 'static,
{
    stream::once(invoke)
        .map(|reply| match reply {
            Ok(BackendReply::Complete(answer)) => {
                stream::iter([Ok(GenerationEvent::chunk(answer))]).boxed()
            }
            Ok(BackendReply::Incremental(events)) => until_terminal(events),
            Err(e) => stream::iter([Err(e)]).boxed(),
        })
        .flatten()
        .boxed()
}

/// Forward events up to and including the first terminal event or error.
fn until_terminal(events: EventStream) -> EventStream {
    events
        .scan(false, |finished, item| {
            if *finished {
                return future::ready(None);
            }
            *finished = match &item {
                Ok(event) => event.is_terminal(),
                Err(_) => true,
            };
            future::ready(Some(item))
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::error::GeneratorError;

    #[tokio::test]
    async fn batch_answer_is_one_non_terminal_event() {
        let events: Vec<_> = drive(async { Ok(BackendReply::Complete("Paris".into())) })
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap(), &GenerationEvent::chunk("Paris"));
    }

    #[tokio::test]
    async fn backend_error_is_yielded_once() {
        let mut events =
            drive(async { Err(GeneratorError::Llm("model exploded".into())) });
        let first = events.next().await.unwrap();
        assert!(matches!(first, Err(GeneratorError::Llm(ref m)) if m == "model exploded"));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn incremental_events_end_at_first_stop() {
        let upstream: EventStream = stream::iter(vec![
            Ok(GenerationEvent::chunk("Par")),
            Ok(GenerationEvent::chunk("is")),
            Ok(GenerationEvent::stop("")),
            Ok(GenerationEvent::chunk("ignored")),
        ])
        .boxed();
        let events: Vec<_> = drive(async move { Ok(BackendReply::Incremental(upstream)) })
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                GenerationEvent::chunk("Par"),
                GenerationEvent::chunk("is"),
                GenerationEvent::stop(""),
            ]
        );
    }

    #[tokio::test]
    async fn incremental_error_ends_stream() {
        let upstream: EventStream = stream::iter(vec![
            Ok(GenerationEvent::chunk("a")),
            Err(GeneratorError::Llm("connection reset".into())),
            Ok(GenerationEvent::chunk("b")),
        ])
        .boxed();
        let events: Vec<_> = drive(async move { Ok(BackendReply::Incremental(upstream)) })
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_err());
    }

    #[tokio::test]
    async fn nothing_runs_until_polled() {
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        let mut events = drive(async move {
            flag.store(true, Ordering::SeqCst);
            Ok(BackendReply::Complete("x".into()))
        });
        assert!(!invoked.load(Ordering::SeqCst));
        events.next().await;
        assert!(invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn terminal_stream_has_one_stop_event() {
        let events: Vec<_> = terminal("Missing Ollama URL").collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &GenerationEvent::stop("Missing Ollama URL")
        );
    }

    #[test]
    fn default_sampling_params() {
        let p = SamplingParams::default();
        assert_eq!(p.max_new_tokens, 256);
        assert!(p.do_sample);
        assert!((p.temperature - 0.6).abs() < 0.001);
        assert!((p.top_p - 0.9).abs() < 0.001);
        assert!(p.stop_sequences.is_empty());
    }
}
