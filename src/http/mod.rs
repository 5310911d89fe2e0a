pub mod client;
pub mod request;
pub mod response;
pub mod types;

pub use client::{HttpClient, ReqwestClient};
pub use request::{BodyPayload, InterpolatedRequest};
pub use response::Response;
pub use types::{Method, Status, Url};
