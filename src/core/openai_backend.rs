//! Streaming backend for OpenAI-compatible `/chat/completions` endpoints.

use async_trait::async_trait;
use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::openai::{
    ChatContent, ChatContentPart, ChatMessage, ChatRequest, ChatResponse, ChatToolCall,
    ChatToolCallFunction, ImageUrl,
};
use crate::api::{ChatEntry, ChatRole, GenerateRequest, Part};
use crate::core::backend::{
    BackendError, DeltaStream, GenerationBackend, GenerationCall, StreamDelta,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatibleBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl GenerationBackend for OpenAiCompatibleBackend {
    async fn open_stream(
        &self,
        call: GenerationCall,
        cancel_token: CancellationToken,
    ) -> Result<DeltaStream, BackendError> {
        let GenerationCall {
            model_id,
            request,
            context,
        } = call;
        debug!(
            model = %model_id,
            context = context.label,
            reference = %context.reference,
            entries = request.chat.len(),
            "Opening chat completion stream"
        );

        let body = ChatRequest {
            model: model_id,
            messages: build_chat_messages(&request),
            stream: true,
        };

        let response = self
            .client
            .post(self.chat_url())
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(BackendError::Api(format_api_error(&error_text)));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_sse(response, tx, cancel_token));
        Ok(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }
}

type DeltaSender = mpsc::UnboundedSender<Result<StreamDelta, BackendError>>;

async fn pump_sse(
    response: reqwest::Response,
    tx: DeltaSender,
    cancel_token: CancellationToken,
) {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut accumulator = SseAccumulator::default();

    loop {
        // Returning drops the body, which closes the connection.
        let chunk = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                debug!("SSE stream cancelled");
                return;
            }
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else {
            return;
        };

        // Receiver dropped: the consumer aborted or finished.
        if tx.is_closed() {
            return;
        }

        let chunk_bytes = match chunk {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = tx.send(Err(BackendError::Transport(err)));
                return;
            }
        };
        buffer.extend_from_slice(&chunk_bytes);

        while let Some(newline_pos) = memchr(b'\n', &buffer) {
            let outcome = match std::str::from_utf8(&buffer[..newline_pos]) {
                Ok(line) => accumulator.process_line(line.trim()),
                Err(err) => {
                    debug!(error = %err, "Invalid UTF-8 in stream");
                    LineOutcome::Skip
                }
            };
            buffer.drain(..=newline_pos);

            match outcome {
                LineOutcome::Skip => {}
                LineOutcome::Delta(delta) => {
                    if tx.send(Ok(delta)).is_err() {
                        return;
                    }
                }
                LineOutcome::Done => return,
                LineOutcome::Error(message) => {
                    let _ = tx.send(Err(BackendError::Api(message)));
                    return;
                }
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum LineOutcome {
    Skip,
    Delta(StreamDelta),
    Done,
    Error(String),
}

/// Folds incremental SSE content chunks into cumulative snapshots.
#[derive(Default)]
struct SseAccumulator {
    text: String,
    model: Option<String>,
}

impl SseAccumulator {
    fn process_line(&mut self, line: &str) -> LineOutcome {
        let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
            return LineOutcome::Skip;
        };
        if payload == "[DONE]" {
            return LineOutcome::Done;
        }

        match serde_json::from_str::<ChatResponse>(payload) {
            Ok(response) => {
                let mut delta = StreamDelta::default();
                if let Some(model) = response.model {
                    if self.model.as_deref() != Some(model.as_str()) {
                        self.model = Some(model.clone());
                        delta.origin_model = Some(model);
                    }
                }
                if let Some(content) = response
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.as_deref())
                {
                    self.text.push_str(content);
                    delta.text_so_far = Some(self.text.clone());
                }
                if delta == StreamDelta::default() {
                    LineOutcome::Skip
                } else {
                    LineOutcome::Delta(delta)
                }
            }
            Err(_) if payload.trim().is_empty() => LineOutcome::Skip,
            Err(_) => LineOutcome::Error(format_api_error(payload)),
        }
    }
}

fn build_chat_messages(request: &GenerateRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.chat.len() + 1);
    if let Some(system) = request.system_text().filter(|text| !text.trim().is_empty()) {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: Some(ChatContent::Text(system)),
            tool_calls: None,
        });
    }
    messages.extend(request.chat.iter().map(entry_to_message));
    messages
}

fn entry_to_message(entry: &ChatEntry) -> ChatMessage {
    match entry.role {
        ChatRole::Model => {
            let text = join_text_parts(&entry.parts);
            let tool_calls: Vec<ChatToolCall> = entry
                .parts
                .iter()
                .filter_map(|part| match part {
                    Part::ToolCall(call) => Some(ChatToolCall {
                        id: call.id.clone(),
                        kind: "function".to_string(),
                        function: ChatToolCallFunction {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                        },
                    }),
                    _ => None,
                })
                .collect();
            ChatMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(ChatContent::Text(text))
                },
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            }
        }
        ChatRole::User => {
            let has_images = entry
                .parts
                .iter()
                .any(|part| matches!(part, Part::InlineImage { .. }));
            let content = if has_images {
                ChatContent::Parts(entry.parts.iter().filter_map(user_content_part).collect())
            } else {
                ChatContent::Text(join_text_parts(&entry.parts))
            };
            ChatMessage {
                role: "user".to_string(),
                content: Some(content),
                tool_calls: None,
            }
        }
    }
}

fn part_as_text(part: &Part) -> Option<String> {
    match part {
        Part::Text { text } => Some(text.clone()),
        Part::Doc { title, text, .. } => Some(format!("{title}:\n```\n{text}\n```")),
        _ => None,
    }
}

fn join_text_parts(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(part_as_text)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn user_content_part(part: &Part) -> Option<ChatContentPart> {
    match part {
        Part::InlineImage { mime_type, base64 } => Some(ChatContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{mime_type};base64,{base64}"),
            },
        }),
        other => part_as_text(other).map(|text| ChatContentPart::Text { text }),
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str().map(str::to_owned))
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Renders a provider error body as a short, single-line message, since it
/// ends up inline in the assistant's text.
fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();
    if trimmed.is_empty() {
        return "API Error: <empty>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return match extract_error_summary(&json_value) {
            Some(summary) if !summary.is_empty() => format!("API Error: {summary}"),
            _ => format!("API Error: {json_value}"),
        };
    }

    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("API Error: {collapsed}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SystemInstruction;
    use crate::core::backend::StreamContext;
    use crate::core::chat_stream::{run_stream, StreamOutcome};
    use crate::core::message::ToolCall;
    use std::io::{ErrorKind, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    /// Serves one SSE chunk, then stalls. Reports whether the client hung up
    /// ("closed") or kept the connection open ("open").
    fn spawn_stalling_sse_server() -> (String, std_mpsc::Receiver<&'static str>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (report_tx, report_rx) = std_mpsc::channel();

        std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().expect("accept");
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                match socket.read(&mut buf) {
                    Ok(0) | Err(_) => return,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }

            let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{body}\r\n",
                body.len()
            );
            socket.write_all(response.as_bytes()).expect("write");
            socket.flush().expect("flush");

            socket
                .set_read_timeout(Some(Duration::from_secs(3)))
                .expect("timeout");
            let verdict = loop {
                match socket.read(&mut buf) {
                    Ok(0) => break "closed",
                    Ok(_) => continue,
                    Err(err) if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut => {
                        break "open"
                    }
                    Err(_) => break "closed",
                }
            };
            let _ = report_tx.send(verdict);
        });

        (format!("http://{addr}/v1"), report_rx)
    }

    #[tokio::test]
    async fn abort_closes_stalled_connection() {
        let (base_url, report) = spawn_stalling_sse_server();
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .expect("client");
        let backend = OpenAiCompatibleBackend::with_client(client, base_url, "key");
        let token = CancellationToken::new();
        let call = GenerationCall {
            model_id: "m".into(),
            request: GenerateRequest {
                system_message: None,
                chat: vec![ChatEntry::user(vec![Part::text("hi")])],
            },
            context: StreamContext::conversation("conv-1"),
        };

        let abort = token.clone();
        let mut first_text = None;
        let status = run_stream(&backend, call, 0, &token, |state, complete| {
            if !complete {
                first_text = state.first_text().map(str::to_owned);
                abort.cancel();
            }
        })
        .await;

        assert_eq!(status.outcome, StreamOutcome::Aborted);
        assert_eq!(first_text.as_deref(), Some("Hel"));
        let verdict = tokio::task::spawn_blocking(move || {
            report.recv_timeout(Duration::from_secs(10))
        })
        .await
        .expect("join")
        .expect("server report");
        assert_eq!(verdict, "closed");
    }

    #[test]
    fn process_line_handles_spacing_variants() {
        let mut accumulator = SseAccumulator::default();

        let first = accumulator.process_line(r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#);
        let second = accumulator.process_line(r#"data:{"choices":[{"delta":{"content":" World"}}]}"#);

        assert_eq!(first, LineOutcome::Delta(StreamDelta::text("Hello")));
        assert_eq!(second, LineOutcome::Delta(StreamDelta::text("Hello World")));
        assert_eq!(accumulator.process_line("data: [DONE]"), LineOutcome::Done);
        assert_eq!(accumulator.process_line("data:[DONE]"), LineOutcome::Done);
    }

    #[test]
    fn process_line_reports_model_once() {
        let mut accumulator = SseAccumulator::default();
        let line = r#"data: {"model":"gpt-x","choices":[{"delta":{"content":"a"}}]}"#;

        let LineOutcome::Delta(first) = accumulator.process_line(line) else {
            panic!("expected delta");
        };
        let LineOutcome::Delta(second) = accumulator.process_line(line) else {
            panic!("expected delta");
        };

        assert_eq!(first.origin_model.as_deref(), Some("gpt-x"));
        assert_eq!(second.origin_model, None);
        assert_eq!(second.text_so_far.as_deref(), Some("aa"));
    }

    #[test]
    fn process_line_skips_comments_and_empty_deltas() {
        let mut accumulator = SseAccumulator::default();
        assert_eq!(accumulator.process_line(": keep-alive"), LineOutcome::Skip);
        assert_eq!(accumulator.process_line(""), LineOutcome::Skip);
        assert_eq!(
            accumulator.process_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#),
            LineOutcome::Skip
        );
    }

    #[test]
    fn process_line_routes_stream_errors() {
        let mut accumulator = SseAccumulator::default();
        let outcome =
            accumulator.process_line(r#"data: {"error":{"message":"internal   server error"}}"#);
        assert_eq!(
            outcome,
            LineOutcome::Error("API Error: internal server error".to_string())
        );
    }

    #[test]
    fn format_api_error_handles_json_without_summary() {
        assert_eq!(
            format_api_error(r#"{"status":"failed"}"#),
            r#"API Error: {"status":"failed"}"#
        );
    }

    #[test]
    fn format_api_error_handles_plaintext_and_empty() {
        assert_eq!(format_api_error("  bad\n gateway "), "API Error: bad gateway");
        assert_eq!(format_api_error("   "), "API Error: <empty>");
    }

    #[test]
    fn chat_messages_map_roles_images_and_tool_calls() {
        let request = GenerateRequest {
            system_message: Some(SystemInstruction {
                parts: vec![Part::text("Be brief.")],
            }),
            chat: vec![
                ChatEntry::user(vec![
                    Part::text("what is this?"),
                    Part::InlineImage {
                        mime_type: "image/png".into(),
                        base64: "AAAA".into(),
                    },
                ]),
                ChatEntry::model(vec![Part::ToolCall(ToolCall {
                    id: "call-1".into(),
                    name: "describe".into(),
                    arguments: "{}".into(),
                })]),
            ],
        };

        let messages = build_chat_messages(&request);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(
            messages[1].content,
            Some(ChatContent::Parts(vec![
                ChatContentPart::Text {
                    text: "what is this?".into()
                },
                ChatContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,AAAA".into()
                    }
                },
            ]))
        );
        assert_eq!(messages[2].role, "assistant");
        assert!(messages[2].content.is_none());
        assert_eq!(messages[2].tool_calls.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn chat_url_tolerates_trailing_slash() {
        let backend = OpenAiCompatibleBackend::new("https://api.example.com/v1/", "key");
        assert_eq!(
            backend.chat_url(),
            "https://api.example.com/v1/chat/completions"
        );
    }
}
