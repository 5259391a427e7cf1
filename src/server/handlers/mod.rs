//! 请求处理器

pub mod messages;
pub mod status;

pub use messages::messages;
pub use status::{health, models, root, status};
