//! Request dispatch against a static resource table.

use crate::resource::{HandlerResponse, ResourceTable};
use coaps_wire::{encode, Code, EncodeError, Message};
use tracing::{debug, trace, warn};

/// Maps one decoded request to one response
#[derive(Debug)]
pub struct Dispatcher {
    table: ResourceTable,
}

impl Dispatcher {
    /// Create a dispatcher over a finished resource table
    pub fn new(table: ResourceTable) -> Self {
        Self { table }
    }

    /// The resource table
    pub fn table(&self) -> &ResourceTable {
        &self.table
    }

    /// Produce the response for `request`.
    ///
    /// Unknown paths yield 4.04 and methods outside the resource's allowed set
    /// (including request codes that name no known method) yield 4.05, both with
    /// an empty payload.
    pub fn dispatch(&self, request: &Message) -> Message {
        let result = match self.table.lookup(&request.uri_path) {
            None => {
                debug!("No resource for /{}", request.path());
                HandlerResponse::status(Code::NOT_FOUND)
            }
            Some(resource) => match request.method() {
                Some(method) if resource.methods().allows(method) => {
                    trace!("Dispatching {} /{}", method, request.path());
                    resource.handle(method, &request.payload)
                }
                _ => {
                    debug!("Method {} not allowed on /{}", request.code, request.path());
                    HandlerResponse::status(Code::METHOD_NOT_ALLOWED)
                }
            },
        };

        let mut response = Message::response_to(request, result.code);
        response.content_format = result.content_format;
        response.payload = result.payload;
        response
    }

    /// Dispatch and encode the response into `out`.
    ///
    /// Returns the encoded length, or `None` when the response does not fit:
    /// an oversized response is dropped, never sent truncated.
    pub fn dispatch_encoded(&self, request: &Message, out: &mut [u8]) -> Option<usize> {
        let response = self.dispatch(request);
        match encode(&response, out) {
            Ok(len) => Some(len),
            Err(EncodeError::Overflow { needed, capacity }) => {
                warn!(
                    "Dropping {} response for /{}: needs {} bytes, buffer holds {}",
                    response.code,
                    request.path(),
                    needed,
                    capacity
                );
                None
            }
            Err(e) => {
                warn!("Dropping response for /{}: {}", request.path(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Methods, Resource};
    use bytes::Bytes;
    use coaps_wire::{decode, ContentFormat, MessageType, Method};

    fn time_table() -> ResourceTable {
        let mut table = ResourceTable::new();
        table
            .register(Resource::new("time", Methods::GET, |_method: Method, _payload: &[u8]| {
                HandlerResponse::content(ContentFormat::TEXT_PLAIN, Bytes::from_static(b"12:00"))
            }))
            .unwrap();
        table
            .register(Resource::new("echo", Methods::POST, |_method: Method, payload: &[u8]| {
                HandlerResponse::content(ContentFormat::OCTET_STREAM, Bytes::copy_from_slice(payload))
            }))
            .unwrap();
        table
    }

    fn get(path: &str) -> Message {
        Message::request(MessageType::Confirmable, Code::GET, 0x4242)
            .with_token(&[7, 7])
            .with_path(path)
    }

    #[test]
    fn test_get_time_end_to_end() {
        let dispatcher = Dispatcher::new(time_table());
        let mut buf = [0u8; 64];

        let len = dispatcher.dispatch_encoded(&get("time"), &mut buf).unwrap();
        let response = decode(&buf[..len]).unwrap();

        assert_eq!(response.code, Code::CONTENT);
        assert_eq!(response.code.to_string(), "2.05");
        assert_eq!(&response.payload[..], b"12:00");
        assert_eq!(response.content_format, Some(ContentFormat::TEXT_PLAIN));
        assert_eq!(response.mtype, MessageType::Acknowledgement);
        assert_eq!(response.message_id, 0x4242);
        assert_eq!(response.token.as_slice(), &[7, 7]);
    }

    #[test]
    fn test_missing_resource() {
        let dispatcher = Dispatcher::new(time_table());
        let mut buf = [0u8; 64];

        let len = dispatcher.dispatch_encoded(&get("missing"), &mut buf).unwrap();
        let response = decode(&buf[..len]).unwrap();

        assert_eq!(response.code, Code::NOT_FOUND);
        assert!(response.payload.is_empty());
    }

    #[test]
    fn test_method_not_allowed() {
        let dispatcher = Dispatcher::new(time_table());
        let delete = Message::request(MessageType::NonConfirmable, Code::DELETE, 1).with_path("time");
        let response = dispatcher.dispatch(&delete);
        assert_eq!(response.code, Code::METHOD_NOT_ALLOWED);
        assert!(response.payload.is_empty());
        assert_eq!(response.mtype, MessageType::NonConfirmable);

        // Unknown method code on an existing resource
        let odd = Message::request(MessageType::Confirmable, Code::new(0, 9), 2).with_path("time");
        assert_eq!(dispatcher.dispatch(&odd).code, Code::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_payload_reaches_handler() {
        let dispatcher = Dispatcher::new(time_table());
        let post = Message::request(MessageType::Confirmable, Code::POST, 3)
            .with_path("echo")
            .with_payload(Bytes::from_static(b"ping"));
        let response = dispatcher.dispatch(&post);
        assert_eq!(&response.payload[..], b"ping");
    }

    #[test]
    fn test_repeated_get_is_byte_identical() {
        let dispatcher = Dispatcher::new(time_table());
        let request = get("time");
        let mut first = [0u8; 64];
        let mut second = [0u8; 64];

        let a = dispatcher.dispatch_encoded(&request, &mut first).unwrap();
        let b = dispatcher.dispatch_encoded(&request, &mut second).unwrap();
        assert_eq!(&first[..a], &second[..b]);
    }

    #[test]
    fn test_oversized_response_dropped() {
        let mut table = ResourceTable::new();
        table
            .register(Resource::new("big", Methods::GET, |_method: Method, _payload: &[u8]| {
                HandlerResponse::content(ContentFormat::OCTET_STREAM, Bytes::from(vec![0xAB; 200]))
            }))
            .unwrap();
        let dispatcher = Dispatcher::new(table);

        let mut buf = [0u8; 64];
        assert_eq!(dispatcher.dispatch_encoded(&get("big"), &mut buf), None);
        assert!(buf.iter().all(|b| *b == 0));
    }
}
