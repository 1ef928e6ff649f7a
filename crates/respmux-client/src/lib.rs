// Pub/sub multiplexing over a single RESP2 connection.
//
// CLIENT-SIDE DESIGN INTENT
// -------------------------
// A subscribed connection carries two kinds of traffic on one ordered stream:
// unsolicited pushes (`message`/`pmessage`) and replies to the commands we
// issue (SUBSCRIBE, UNSUBSCRIBE, PING, ...). Exactly one task reads the
// stream. It routes pushes to local sinks and hands every other frame to the
// single command in flight.
//
// - Commands are serialized. With one command in flight, "the next non-push
//   frame" is always an ack for it, so no request ids are needed.
// - Delivery to sinks is synchronous in the reader. A full sink stalls the
//   reader and therefore every pending ack. This is the back-pressure model;
//   callers size their sinks accordingly.
// - Teardown happens once, from whichever side notices first (explicit close,
//   read failure, failed write). Every await in the background tasks races a
//   shared cancellation token, so teardown never waits on a stalled sink.
#[macro_use]
mod macros;

pub mod config;
pub mod error;
mod pubsub;

pub use config::PubSubConfig;
pub use error::PubSubError;
pub use pubsub::{CloseObserver, MessageSink, PubSubConn, SubscriptionSet};
pub use respmux_wire::{MessageKind, PubSubMessage};

#[cfg(test)]
mod test_support;
