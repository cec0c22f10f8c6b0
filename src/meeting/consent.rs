//! The user's answer to "record this meeting?".

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentState {
    #[default]
    Undecided,
    Accepted,
    Declined,
}

impl ConsentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undecided => "undecided",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }

    pub fn is_accepted(&self) -> bool {
        *self == Self::Accepted
    }

    pub fn accept(&mut self) {
        *self = Self::Accepted;
    }

    pub fn decline(&mut self) {
        *self = Self::Declined;
    }

    /// Back to undecided after a failed start so the user can try again.
    /// A decline is final and is left alone.
    pub fn reopen(&mut self) {
        if *self == Self::Accepted {
            *self = Self::Undecided;
        }
    }
}
