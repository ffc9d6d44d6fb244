//! Server-sent events decoding shared by the streaming endpoints

use agent_core::error::{AgentError, Result};
use agent_core::provider::{CompletionStream, ProviderKind, StreamChunk};
use futures::StreamExt;

/// Turn an SSE response into text deltas.
///
/// `extract` maps one `data:` payload to an optional delta. The stream ends
/// with the body or at a `[DONE]` payload; a broken body or an `extract`
/// error ends it with `ProviderRequest`.
pub(crate) fn deltas<F>(kind: ProviderKind, response: reqwest::Response, extract: F) -> CompletionStream
where
    F: Fn(&str) -> Result<Option<String>> + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| {
                AgentError::ProviderRequest(format!("{kind} stream interrupted: {e}"))
            })?;
            buffer.extend_from_slice(&chunk);

            // split on raw bytes so multi-byte characters never straddle chunks
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match data_payload(&line) {
                    Some("[DONE]") => return,
                    Some(data) => {
                        if let Some(delta) = extract(data)? {
                            yield StreamChunk::new(delta);
                        }
                    }
                    None => {}
                }
            }
        }

        let rest = String::from_utf8_lossy(&buffer);
        if let Some(data) = data_payload(&rest) {
            if data != "[DONE]" {
                if let Some(delta) = extract(data)? {
                    yield StreamChunk::new(delta);
                }
            }
        }
    })
}

fn data_payload(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\r', '\n']);
    line.strip_prefix("data:").map(str::trim_start).filter(|d| !d.is_empty())
}

/// Parse a payload as JSON or fail the stream
pub(crate) fn parse_payload(kind: ProviderKind, data: &str) -> Result<serde_json::Value> {
    serde_json::from_str(data)
        .map_err(|e| AgentError::ProviderRequest(format!("undecodable {kind} stream event: {e}")))
}
