pub mod args;
pub mod auth;
pub mod meeting;

pub use args::{Cli, CliCommand, MeetingCliArgs, MeetingCommand};
pub use auth::{handle_login_command, handle_logout_command};
pub use meeting::{handle_meeting_command, handle_status_command};
