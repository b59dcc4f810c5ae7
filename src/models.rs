use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::BookingStatus;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Event {
    pub guid: Uuid,
    pub name: String,
    pub text: String,
    pub max_seats: i64,
    pub price: i64,
}

/// Body of the event create and edit forms, sent to the backend as JSON.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct EventForm {
    pub name: String,
    #[serde(default)]
    pub text: String,
    pub max_seats: i64,
    pub price: i64,
}

impl EventForm {
    pub fn missing_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("name".to_owned());
        }
        missing
    }
}

impl From<Event> for EventForm {
    fn from(event: Event) -> Self {
        EventForm {
            name: event.name,
            text: event.text,
            max_seats: event.max_seats,
            price: event.price,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Booking {
    pub guid: Uuid,
    pub event_guid: Uuid,
    pub user_phone: String,
    pub user_nickname: Option<String>,
    pub count_seats: i64,
    pub total_cash: i64,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub expired: bool,
}

impl Booking {
    pub fn status(&self) -> BookingStatus {
        BookingStatus::of(self.verified, self.expired)
    }

    pub fn nickname(&self) -> &str {
        display_nickname(self.user_nickname.as_deref())
    }

    pub fn needs_verification(&self) -> bool {
        !self.verified
    }

    pub fn verified_label(&self) -> &'static str {
        yes_no(self.verified)
    }

    pub fn expired_label(&self) -> &'static str {
        yes_no(self.expired)
    }
}

fn display_nickname(nickname: Option<&str>) -> &str {
    nickname.filter(|nickname| !nickname.is_empty()).unwrap_or("—")
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

/// Partial update for a booking. Unset fields are left out of the request body.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BookingChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<bool>,
}

impl BookingChanges {
    pub fn verified() -> Self {
        BookingChanges {
            verified: Some(true),
            ..Default::default()
        }
    }

    pub fn expired() -> Self {
        BookingChanges {
            expired: Some(true),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Absentee {
    pub guid: Uuid,
    pub user_nickname: Option<String>,
    pub user_phone: String,
    pub count_seats: i64,
    pub total_cash: i64,
}

impl Absentee {
    pub fn nickname(&self) -> &str {
        display_nickname(self.user_nickname.as_deref())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SeatSummary {
    pub total: i64,
    pub booked: i64,
    /// Negative when the event is overbooked.
    pub remaining: i64,
}

impl SeatSummary {
    pub fn for_event(event: &Event, bookings: &[Booking]) -> Self {
        let booked = bookings.iter().map(|booking| booking.count_seats).sum();
        SeatSummary {
            total: event.max_seats,
            booked,
            remaining: event.max_seats - booked,
        }
    }
}
