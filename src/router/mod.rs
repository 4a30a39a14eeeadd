//! Correlation router.
//!
//! Every envelope names the durable instance it belongs to. The router
//! delivers it to that instance with load-decide-save-act:
//!
//! 1. load the instance and its version from the store
//! 2. feed the envelope to the state machine
//! 3. save the new state against the loaded version
//! 4. run the effects (tracking, timers, sends, routed commands)
//!
//! Envelopes for the same correlation id are handled one at a time on a
//! fixed shard; different ids proceed concurrently. A version conflict
//! re-runs the cycle in place. Transient failures are redelivered with
//! exponential backoff.

mod error;
mod inbox;
mod router;

pub use error::RouterError;
pub use inbox::{channel, Delivery, Inbox};
pub use router::{Router, RouterStats, RouterStatsSnapshot};
