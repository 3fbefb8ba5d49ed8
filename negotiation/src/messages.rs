//! Message texts sent to participants.
//!
//! Templates use `{name}`, `{date}`, `{time}` and `{place}` placeholders.
//! Replies are expected as JSON records; the bodies say so explicitly.

use crate::types::{Participant, ProposedSlot};

pub const INVITATION_SUBJECT: &str = "Meeting Invitation";
pub const CONFIRMATION_SUBJECT: &str = "Meeting Confirmation";
pub const RENEGOTIATION_SUBJECT: &str = "Meeting Renegotiation";

pub const DEFAULT_INVITATION: &str = "\
Hi {name},

I'm organizing a get-together! Could you let me know your availability?
Please reply with your preferred times, dates and places, for example:

{\"times\": [\"6pm\"], \"dates\": [\"2024-06-01\"], \"places\": [\"Central Park\"]}

Thanks!";

pub const DEFAULT_CONFIRMATION: &str = "\
Hi {name},

We propose the following schedule:
Date: {date}
Time: {time}
Place: {place}

Please confirm by replying with {\"agree\": true} or {\"agree\": false}.";

pub const DEFAULT_RENEGOTIATION: &str = "\
Hi {name},

It seems the proposed schedule ({date}, {time}, {place}) doesn't work for you.
Could you suggest alternatives? Reply in the same format as before:

{\"times\": [...], \"dates\": [...], \"places\": [...]}";

/// One subject/body pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

/// Subjects and bodies for each message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplates {
    pub invitation: String,
    pub confirmation: String,
    pub renegotiation: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            invitation: DEFAULT_INVITATION.to_string(),
            confirmation: DEFAULT_CONFIRMATION.to_string(),
            renegotiation: DEFAULT_RENEGOTIATION.to_string(),
        }
    }
}

impl MessageTemplates {
    pub fn with_invitation(mut self, template: impl Into<String>) -> Self {
        self.invitation = template.into();
        self
    }

    pub fn invitation(&self, participant: &Participant) -> Message {
        Message {
            subject: INVITATION_SUBJECT.to_string(),
            body: render(&self.invitation, participant, None),
        }
    }

    pub fn confirmation(&self, participant: &Participant, slot: &ProposedSlot) -> Message {
        Message {
            subject: CONFIRMATION_SUBJECT.to_string(),
            body: render(&self.confirmation, participant, Some(slot)),
        }
    }

    /// Follow-up asking a dissenter for fresh availability after `rejected`.
    pub fn renegotiation(&self, participant: &Participant, rejected: &ProposedSlot) -> Message {
        Message {
            subject: RENEGOTIATION_SUBJECT.to_string(),
            body: render(&self.renegotiation, participant, Some(rejected)),
        }
    }
}

fn render(template: &str, participant: &Participant, slot: Option<&ProposedSlot>) -> String {
    let mut out = template.replace("{name}", &participant.name);
    if let Some(slot) = slot {
        let or_tbd = |v: &str| if v.is_empty() { "TBD".to_string() } else { v.to_string() };
        out = out
            .replace("{date}", &or_tbd(&slot.date))
            .replace("{time}", &or_tbd(&slot.time))
            .replace("{place}", &or_tbd(&slot.place));
    }
    out
}
