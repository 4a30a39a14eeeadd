//! trickled - durable trickle scheduling for SMS batches.
//!
//! A batch request ("send these messages spread over the next hour") is turned
//! into one durable [`coordinator::Batch`] and one durable
//! [`schedule::ScheduledMessage`] per message. Each scheduled message waits on
//! a [`timer::DurableTimer`] registration, triggers the [`transport::Transport`]
//! when it fires, and reports the transport's confirmation back to its batch,
//! which completes once every message is resolved.
//!
//! ```text
//!   CreateBatch ──► Router ──► Batch (coordinator) ──fan-out──► ScheduledMessage × N
//!                     ▲                 ▲                            │
//!                     │                 └──── ScheduledMessageSent ──┤
//!                     │                                              │ timer fires
//!                     └──── SendConfirmed ◄──── Transport ◄── SendNow┘
//! ```
//!
//! All traffic for one instance is serialised by the [`router`], every state
//! change is persisted through [`store::Storage`] with an optimistic version
//! check before its effects run, and every outbound tracking event goes out on
//! the [`tracking::EventBus`].

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod machine;
pub mod messages;
pub mod router;
pub mod schedule;
pub mod store;
pub mod telemetry;
pub mod timer;
pub mod timing;
pub mod tracking;
pub mod transport;
