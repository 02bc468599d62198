pub mod auth;
pub mod compactor;
pub mod engine;
pub mod http;
pub mod limits;
pub mod mailer;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod wal;
