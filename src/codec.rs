use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    schema::JSONRPCMessage,
};

/// Newline-delimited JSON-RPC framing for the stdio transport.
///
/// A line that is not a JSON-RPC message is logged and dropped. Returning an
/// error would end the `Framed` stream and with it the whole session.
#[derive(Debug, Default)]
pub(crate) struct JsonRpcCodec;

impl JsonRpcCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for JsonRpcCodec {
    type Error = Error;
    type Item = JSONRPCMessage;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let Some(n) = src.iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };
            let line = src.split_to(n + 1);
            let json_bytes = trim_line(&line[..n]);
            if json_bytes.is_empty() {
                continue;
            }

            match serde_json::from_slice::<JSONRPCMessage>(json_bytes) {
                Ok(message) => {
                    debug!("Decoded message: {:?}", std::str::from_utf8(json_bytes));
                    return Ok(Some(message));
                }
                Err(e) => {
                    let content = String::from_utf8_lossy(json_bytes);
                    warn!("Dropping invalid JSON-RPC line: {} (content: {})", e, content);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(message) = self.decode(buf)? {
            return Ok(Some(message));
        }
        // A final line without a trailing newline still counts.
        if trim_line(buf).is_empty() {
            buf.clear();
            return Ok(None);
        }
        buf.put_u8(b'\n');
        self.decode(buf)
    }
}

fn trim_line(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

impl Encoder<JSONRPCMessage> for JsonRpcCodec {
    type Error = Error;

    fn encode(&mut self, item: JSONRPCMessage, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(&item)?;
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        debug!("Encoded message: {:?}", std::str::from_utf8(&json));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{jsonrpc::create_jsonrpc_notification, schema::ServerNotification};

    #[test]
    fn test_decode_skips_blank_and_invalid_lines() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::from(
            "\n  \r\nnot json\n{}\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\r\n".as_bytes(),
        );

        match codec.decode(&mut buf).unwrap() {
            Some(JSONRPCMessage::Request(req)) => assert_eq!(req.request.method, "ping"),
            other => panic!("expected ping request, got {other:?}"),
        }
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_waits_for_full_line() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::from(&b"{\"jsonrpc\":\"2.0\",\"id\":1,"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\"method\":\"ping\"}\n");
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_eof_without_newline() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::from(&b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}"[..]);
        assert!(matches!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(JSONRPCMessage::Notification(_))
        ));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_encode_notification_is_one_line() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                JSONRPCMessage::Notification(create_jsonrpc_notification(
                    &ServerNotification::ToolListChanged,
                )),
                &mut buf,
            )
            .unwrap();
        assert_eq!(
            &buf[..],
            b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/tools/list_changed\"}\n"
        );
    }
}
