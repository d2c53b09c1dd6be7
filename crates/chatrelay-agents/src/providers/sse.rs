use bytes::Bytes;
use chatrelay_common::{Error, Result};
use futures::stream::{self, BoxStream, StreamExt};

type ByteStream = BoxStream<'static, reqwest::Result<Bytes>>;

/// Split an SSE byte stream into the payloads of its `data:` lines.
///
/// Other fields (`event:`, `id:`, comments) and empty payloads are skipped.
/// A final line without a trailing newline is still delivered.
pub(crate) fn data_payloads(bytes: ByteStream) -> BoxStream<'static, Result<String>> {
    stream::try_unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, mut eof): (ByteStream, Vec<u8>, bool)| async move {
            loop {
                if let Some(i) = buffer.iter().position(|&b| b == b'\n') {
                    let line_bytes: Vec<u8> = buffer.drain(..=i).collect();
                    let line = String::from_utf8_lossy(&line_bytes).trim().to_string();
                    if let Some(data) = line.strip_prefix("data:") {
                        let data = data.trim_start();
                        if !data.is_empty() {
                            return Ok(Some((data.to_string(), (bytes, buffer, eof))));
                        }
                    }
                    continue;
                }

                if eof {
                    if buffer.is_empty() {
                        return Ok(None);
                    }
                    buffer.push(b'\n');
                    continue;
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        return Err(Error::ProviderStream(format!("network error: {e}")));
                    }
                    None => eof = true,
                }
            }
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static str]) -> ByteStream {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok::<_, reqwest::Error>(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
        .boxed()
    }

    async fn collect(parts: &[&'static str]) -> Vec<String> {
        data_payloads(chunks(parts))
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn reassembles_lines_split_across_chunks() {
        let payloads = collect(&["data: {\"a\"", ":1}\n\nda", "ta: [DONE]\n\n"]).await;
        assert_eq!(payloads, vec!["{\"a\":1}", "[DONE]"]);
    }

    #[tokio::test]
    async fn skips_event_and_comment_lines() {
        let payloads = collect(&[
            "event: ping\ndata: {}\n\n",
            ": keep-alive\r\n\r\n",
            "event: message_stop\r\ndata: {\"type\":\"message_stop\"}\r\n\r\n",
        ])
        .await;
        assert_eq!(payloads, vec!["{}", "{\"type\":\"message_stop\"}"]);
    }

    #[tokio::test]
    async fn delivers_unterminated_final_line() {
        let payloads = collect(&["data: tail"]).await;
        assert_eq!(payloads, vec!["tail"]);
    }
}
