mod server;
mod shutdown;

pub use server::{Server, Services};
pub use shutdown::{ShutdownManager, ShutdownState};
