use crate::models::BookingChanges;

/// Lifecycle of a booking as seen by the confirmation page.
///
/// The backend stores two independent flags; `expired` only carries meaning
/// once a booking is verified, so an unverified booking is never treated as
/// expired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookingStatus {
    /// Payment has not been confirmed by an operator.
    Unverified,
    /// Payment confirmed, QR code not scanned yet.
    VerifiedPending,
    /// Payment confirmed and the QR code has been consumed.
    VerifiedExpired,
}

impl BookingStatus {
    pub fn of(verified: bool, expired: bool) -> Self {
        match (verified, expired) {
            (false, _) => BookingStatus::Unverified,
            (true, false) => BookingStatus::VerifiedPending,
            (true, true) => BookingStatus::VerifiedExpired,
        }
    }

    /// Transition taken when the confirmation page is opened: the next status
    /// and the update that moves the backend there, if any.
    pub fn on_view(self) -> (BookingStatus, Option<BookingChanges>) {
        match self {
            BookingStatus::VerifiedPending => {
                (BookingStatus::VerifiedExpired, Some(BookingChanges::expired()))
            }
            status => (status, None),
        }
    }
}
