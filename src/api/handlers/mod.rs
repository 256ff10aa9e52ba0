mod admin;
mod presence;
mod tokens;

pub use admin::{admin_purge, health};
pub use presence::report_presence;
pub use tokens::{
    call_next, cancel_token, complete_token, get_position, get_token, issue_token, list_tokens,
    serve_token,
};
