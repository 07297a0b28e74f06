pub mod client;
pub mod login;
pub mod timing;

pub use client::Client;
pub use login::{Credentials, LoginSummary};
pub use timing::{RequestTimer, RequestTimings};
