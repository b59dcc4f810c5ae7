use crate::models::Booking;

const HEADER: [&str; 6] = ["GUID", "Phone", "Nickname", "Seats", "Verified", "Expired"];

/// Renders bookings as CSV in list order.
///
/// Fields are joined with bare commas; values containing commas or quotes are
/// written as-is.
pub fn bookings_csv(bookings: &[Booking]) -> String {
    let mut rows = vec![HEADER.join(",")];
    rows.extend(bookings.iter().map(|booking| {
        [
            booking.guid.to_string(),
            booking.user_phone.clone(),
            booking.nickname().to_owned(),
            booking.count_seats.to_string(),
            booking.verified_label().to_owned(),
            booking.expired_label().to_owned(),
        ]
        .join(",")
    }));
    rows.join("\n")
}
