//! Streaming adapter: incremental SSE decode into model-visible text chunks.
//!
//! The produced sequence is lazy, finite and non-restartable. Every `Text`
//! item is a non-empty run of post-filter text; completion is signalled by a
//! terminal `Done`, a mid-stream failure by a terminal `Error`. Dropping the
//! stream drops the underlying response, closing the transport.

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use tracing::warn;

use castor_schema::CloudCodeResponseBody;

/// One adapter event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Non-empty run of model-visible text.
    Text(String),
    /// The upstream stream completed normally.
    Done,
    /// The stream failed mid-flight.
    Error {
        status: Option<u16>,
        retry_after_ms: Option<u64>,
        message: String,
    },
}

/// Decode an upstream SSE response into [`StreamEvent`]s.
pub fn text_chunks(resp: reqwest::Response) -> impl Stream<Item = StreamEvent> + Send {
    let events = resp.bytes_stream().eventsource();

    events
        .filter_map(|event| async move {
            match event {
                Ok(event) => {
                    let data = event.data.trim();
                    if data.is_empty() || data == "[DONE]" {
                        return None;
                    }
                    let Ok(body) = serde_json::from_str::<CloudCodeResponseBody>(data) else {
                        warn!("skipping invalid SSE JSON data: {:.50}...", data);
                        return None;
                    };
                    let text = body.visible_text();
                    if text.is_empty() {
                        None
                    } else {
                        Some(StreamEvent::Text(text))
                    }
                }
                Err(err) => Some(StreamEvent::Error {
                    status: None,
                    retry_after_ms: None,
                    message: err.to_string(),
                }),
            }
        })
        .chain(futures::stream::once(async { StreamEvent::Done }))
        // An Error event terminates the sequence; the trailing Done sentinel
        // only survives a clean pass.
        .scan(false, |terminated, event| {
            let emit = if *terminated {
                None
            } else {
                if matches!(event, StreamEvent::Error { .. }) {
                    *terminated = true;
                }
                Some(event)
            };
            async move { emit }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::sse::{Event, Sse};
    use axum::{Router, routing::get};
    use futures::stream;
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    async fn serve_sse(payloads: Vec<&'static str>) -> String {
        let app = Router::new().route(
            "/stream",
            get(move || {
                let payloads = payloads.clone();
                async move {
                    Sse::new(stream::iter(payloads.into_iter().map(|data| {
                        Ok::<_, Infallible>(Event::default().data(data))
                    })))
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/stream")
    }

    #[tokio::test]
    async fn yields_filtered_chunks_then_done() {
        let url = serve_sse(vec![
            r#"{"candidates":[{"content":{"parts":[{"text":"Hello "}]}}]}"#,
            r#"{"response":{"candidates":[{"content":{"parts":[{"thought":true,"text":"x"}]}}]}}"#,
            r#"{"candidates":[{"content":{"parts":[{"text":"world"}]}}]}"#,
            "[DONE]",
        ])
        .await;

        let resp = reqwest::get(url).await.unwrap();
        let events: Vec<StreamEvent> = text_chunks(resp).collect().await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Text("Hello ".to_string()),
                StreamEvent::Text("world".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn invalid_json_lines_are_skipped() {
        let url = serve_sse(vec![
            "not json",
            r#"{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}"#,
        ])
        .await;

        let resp = reqwest::get(url).await.unwrap();
        let events: Vec<StreamEvent> = text_chunks(resp).collect().await;
        assert_eq!(
            events,
            vec![StreamEvent::Text("ok".to_string()), StreamEvent::Done]
        );
    }
}
