pub mod auth;
pub mod sse;
pub mod wally;

pub use auth::AuthClient;
pub use wally::{ChatStream, WallyClient};
