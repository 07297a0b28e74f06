pub mod config;
pub mod errors;
pub mod session;

pub use config::ClientConfig;
pub use errors::{result_code, ClientError};
pub use session::{CompanyInfo, LoginInfo, SessionState, SessionStore};
