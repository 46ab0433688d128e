//! Resources every gateway node exposes.

use crate::error::DispatchError;
use crate::resource::{HandlerResponse, Methods, Resource, ResourceTable};
use bytes::Bytes;
use coaps_wire::{ContentFormat, Method};

/// Path of the resource discovery listing
pub const WELL_KNOWN_CORE: &str = ".well-known/core";

const HELLO_PAYLOAD: &[u8] = b"Hello World!";

/// `time`: GET returns the clock reading as text
pub fn time_resource<F>(clock: F) -> Resource
where
    F: Fn() -> String + 'static,
{
    Resource::new("time", Methods::GET, move |_method: Method, _payload: &[u8]| {
        HandlerResponse::content(ContentFormat::TEXT_PLAIN, Bytes::from(clock()))
    })
    .content_format(ContentFormat::TEXT_PLAIN)
    .resource_type("clock")
}

/// `hello`: GET returns a fixed greeting
pub fn hello_resource() -> Resource {
    Resource::new("hello", Methods::GET, |_method: Method, _payload: &[u8]| {
        HandlerResponse::content(ContentFormat::TEXT_PLAIN, Bytes::from_static(HELLO_PAYLOAD))
    })
    .content_format(ContentFormat::TEXT_PLAIN)
    .title("Hello")
}

/// `.well-known/core`: link-format listing of `table` as it stands now
pub fn well_known_core(table: &ResourceTable) -> Resource {
    let listing = Bytes::from(table.link_format());
    Resource::new(WELL_KNOWN_CORE, Methods::GET, move |_method: Method, _payload: &[u8]| {
        HandlerResponse::content(ContentFormat::LINK_FORMAT, listing.clone())
    })
}

/// Wall clock in `HH:MM:SS`
pub fn local_clock() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// Add `time`, `hello` and the discovery listing to `table`.
///
/// Application resources should be registered first so the listing covers
/// them.
pub fn register_defaults<F>(table: &mut ResourceTable, clock: F) -> Result<(), DispatchError>
where
    F: Fn() -> String + 'static,
{
    table.register(time_resource(clock))?;
    table.register(hello_resource())?;
    let listing = well_known_core(table);
    table.register(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Dispatcher;
    use coaps_wire::{Code, Message, MessageType};

    fn get(path: &str) -> Message {
        Message::request(MessageType::Confirmable, Code::GET, 10).with_path(path)
    }

    #[test]
    fn test_defaults() {
        let mut table = ResourceTable::new();
        register_defaults(&mut table, || "12:00".to_string()).unwrap();
        let dispatcher = Dispatcher::new(table);

        let time = dispatcher.dispatch(&get("time"));
        assert_eq!(time.code, Code::CONTENT);
        assert_eq!(&time.payload[..], b"12:00");

        let hello = dispatcher.dispatch(&get("hello"));
        assert_eq!(&hello.payload[..], HELLO_PAYLOAD);

        let core = dispatcher.dispatch(&get(WELL_KNOWN_CORE));
        assert_eq!(core.content_format, Some(ContentFormat::LINK_FORMAT));
        assert_eq!(
            std::str::from_utf8(&core.payload).unwrap(),
            "</time>;ct=0;rt=\"clock\",</hello>;ct=0;title=\"Hello\""
        );
    }

    #[test]
    fn test_defaults_twice_conflict() {
        let mut table = ResourceTable::new();
        register_defaults(&mut table, local_clock).unwrap();
        assert!(matches!(
            register_defaults(&mut table, local_clock),
            Err(DispatchError::DuplicateResource(_))
        ));
    }

    #[test]
    fn test_local_clock_format() {
        let reading = local_clock();
        assert_eq!(reading.len(), 8);
        assert_eq!(reading.as_bytes()[2], b':');
        assert_eq!(reading.as_bytes()[5], b':');
    }
}
