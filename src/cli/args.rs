use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "notetaker")]
#[command(about = "Records your meetings, with your consent", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Sign in through the browser
    Login,
    /// Forget the stored sign-in
    Logout,
    /// Show what the running service is doing
    Status,
    /// Print version information
    Version,
    /// Control the current meeting (same as the consent popup and tray)
    Meeting(MeetingCliArgs),
}

#[derive(ClapArgs, Debug)]
pub struct MeetingCliArgs {
    #[command(subcommand)]
    pub command: MeetingCommand,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum MeetingCommand {
    /// Record the detected meeting
    Confirm,
    /// Don't record the detected meeting
    Decline,
    /// End the current recording
    End,
    /// Pause or resume the current recording
    TogglePause,
}

impl MeetingCommand {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Confirm => "/confirm",
            Self::Decline => "/decline",
            Self::End => "/end",
            Self::TogglePause => "/toggle-pause",
        }
    }
}
