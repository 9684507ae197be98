//! Client side of the agency bet-submission protocol.
//!
//! An agency reports its bets to a central aggregator in acknowledged
//! batches, announces completion with `DONE` and then polls until the
//! aggregator publishes the agency's winners. The wire codec and framer are
//! usable on their own; [`client::AgencyClient`] drives the full exchange.

pub mod app;
pub mod client;
pub mod codec;
pub mod config;
pub mod connector;
pub mod error;
pub mod frame;
pub mod message_type;
pub mod records;
pub mod shutdown;
pub mod submitter;
pub mod winners;

#[cfg(test)]
mod test_helpers;

pub use client::{AgencyClient, ClientSettings, RunReport};
pub use codec::{BetRecord, CodecError, Message};
pub use error::ClientError;
pub use frame::{FrameError, FramedChannel};
pub use message_type::MessageType;
