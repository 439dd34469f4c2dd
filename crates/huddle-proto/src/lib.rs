//! # huddle-proto
//!
//! Wire events and payload types for the Huddle real-time chat protocol.
//!
//! Every frame on the persistent connection is a JSON text frame carrying an
//! adjacently tagged event:
//!
//! ```json
//! {"event": "send_message", "data": {"chatId": "c1", "content": "hi"}}
//! ```
//!
//! Client frames decode into [`ClientEvent`], server frames are built from
//! [`ServerEvent`]. Payload field names are camelCase on the wire.
//!
//! ## Quick Start
//!
//! ```rust
//! use huddle_proto::{ClientEvent, ServerEvent};
//!
//! let event = ClientEvent::from_json(r#"{"event":"join_chat","data":{"chatId":"c1"}}"#).unwrap();
//! assert_eq!(event.name(), "join_chat");
//!
//! let reply = ServerEvent::error("Not a participant");
//! assert!(reply.to_json().unwrap().contains("\"event\":\"error\""));
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod event;
pub mod model;

pub use self::error::{ProtoError, Result};
pub use self::event::{ClientEvent, ServerEvent};
pub use self::model::{
    ChatSummary, ChatType, ChatView, MessageType, MessageView, PublicProfile, Reaction,
    ReactionAction, ReadReceipt, UserRef,
};
