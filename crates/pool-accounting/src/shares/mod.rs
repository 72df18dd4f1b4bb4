pub mod types;
pub mod validator;

pub use types::ShareSubmission;
pub use validator::{normalize_address, ShareValidator};
