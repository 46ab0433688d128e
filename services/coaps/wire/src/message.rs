//! Message model shared by requests and responses.

use crate::header::{Code, ContentFormat, MessageType, Method, MAX_TOKEN_LEN};
use bytes::Bytes;
use smallvec::SmallVec;

/// Uri-Path option number
pub const OPTION_URI_PATH: u16 = 11;

/// Content-Format option number
pub const OPTION_CONTENT_FORMAT: u16 = 12;

/// Request/response correlation token (0..8 bytes)
pub type Token = SmallVec<[u8; MAX_TOKEN_LEN]>;

/// An option the model does not interpret, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOption {
    /// Option number
    pub number: u16,
    /// Opaque option value
    pub value: Bytes,
}

/// A request or response message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type
    pub mtype: MessageType,
    /// Method (requests) or status (responses)
    pub code: Code,
    /// Message ID for deduplication and ACK matching
    pub message_id: u16,
    /// Correlation token
    pub token: Token,
    /// Uri-Path segments in order
    pub uri_path: Vec<String>,
    /// Content-Format of the payload, if declared
    pub content_format: Option<ContentFormat>,
    /// Remaining options in wire order
    pub options: Vec<RawOption>,
    /// Payload bytes (may be empty)
    pub payload: Bytes,
}

impl Message {
    /// Create a bare message with no token, options or payload
    pub fn new(mtype: MessageType, code: Code, message_id: u16) -> Self {
        Self {
            mtype,
            code,
            message_id,
            token: Token::new(),
            uri_path: Vec::new(),
            content_format: None,
            options: Vec::new(),
            payload: Bytes::new(),
        }
    }

    /// Create a request message
    pub fn request(mtype: MessageType, code: Code, message_id: u16) -> Self {
        Self::new(mtype, code, message_id)
    }

    /// Build the response envelope for `request`.
    ///
    /// Confirmable requests get a piggybacked ACK carrying the same message ID;
    /// everything else gets a non-confirmable reply. The token is always echoed.
    pub fn response_to(request: &Message, code: Code) -> Self {
        let mtype = match request.mtype {
            MessageType::Confirmable => MessageType::Acknowledgement,
            _ => MessageType::NonConfirmable,
        };
        let mut response = Self::new(mtype, code, request.message_id);
        response.token = request.token.clone();
        response
    }

    /// Build the reset answering an empty confirmable message (ping)
    pub fn reset_for(message: &Message) -> Self {
        Self::new(MessageType::Reset, Code::EMPTY, message.message_id)
    }

    /// Set the Uri-Path from a slash separated path, ignoring empty segments
    pub fn with_path(mut self, path: &str) -> Self {
        self.uri_path = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    /// Set the token
    pub fn with_token(mut self, token: &[u8]) -> Self {
        self.token = Token::from_slice(token);
        self
    }

    /// Set the Content-Format
    pub fn with_content_format(mut self, format: ContentFormat) -> Self {
        self.content_format = Some(format);
        self
    }

    /// Append an uninterpreted option
    pub fn with_option(mut self, number: u16, value: Bytes) -> Self {
        self.options.push(RawOption { number, value });
        self
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    /// Request method, if the code names one
    pub fn method(&self) -> Option<Method> {
        Method::from_code(self.code)
    }

    /// Uri-Path joined with `/`
    pub fn path(&self) -> String {
        self.uri_path.join("/")
    }

    /// Whether this is an empty confirmable message (ping)
    pub fn is_ping(&self) -> bool {
        self.mtype == MessageType::Confirmable && self.code.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_building() {
        let msg = Message::request(MessageType::Confirmable, Code::GET, 1).with_path("/sensors//temp/");
        assert_eq!(msg.uri_path, vec!["sensors".to_string(), "temp".to_string()]);
        assert_eq!(msg.path(), "sensors/temp");
        assert_eq!(msg.method(), Some(Method::Get));
    }

    #[test]
    fn test_response_envelope() {
        let con = Message::request(MessageType::Confirmable, Code::GET, 0x2222).with_token(&[1, 2]);
        let resp = Message::response_to(&con, Code::CONTENT);
        assert_eq!(resp.mtype, MessageType::Acknowledgement);
        assert_eq!(resp.message_id, 0x2222);
        assert_eq!(resp.token.as_slice(), &[1, 2]);

        let non = Message::request(MessageType::NonConfirmable, Code::GET, 7);
        let resp = Message::response_to(&non, Code::NOT_FOUND);
        assert_eq!(resp.mtype, MessageType::NonConfirmable);
        assert_eq!(resp.code, Code::NOT_FOUND);
    }

    #[test]
    fn test_ping_detection() {
        let ping = Message::new(MessageType::Confirmable, Code::EMPTY, 9);
        assert!(ping.is_ping());
        let rst = Message::reset_for(&ping);
        assert_eq!(rst.mtype, MessageType::Reset);
        assert_eq!(rst.message_id, 9);
        assert!(!Message::new(MessageType::NonConfirmable, Code::EMPTY, 9).is_ping());
    }
}
