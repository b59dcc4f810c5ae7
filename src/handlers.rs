use std::io;
use std::sync::Arc;

use bytes::Bytes;
use gotham::handler::HandlerResult;
use gotham::helpers::http::response::{create_empty_response, create_response};
use gotham::state::{FromState, State};
use gotham_derive::{StateData, StaticResponseExtender};
use http::header::{HeaderValue, CONTENT_DISPOSITION, LOCATION, SET_COOKIE};
use hyper::{body, Body, Response, StatusCode};
use mime::Mime;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_derive::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{ApiError, Backend, Download};
use crate::error::Error;
use crate::export::bookings_csv;
use crate::models::{BookingChanges, EventForm, SeatSummary};
use crate::session::{cleared_token_cookie, token_cookie, Session};
use crate::status::BookingStatus;
use crate::templates;

#[derive(Clone, StateData)]
pub struct Console {
    backend: Arc<dyn Backend>,
    secure_cookies: bool,
}

impl Console {
    pub fn new(backend: Arc<dyn Backend>, secure_cookies: bool) -> Self {
        Console {
            backend,
            secure_cookies,
        }
    }
}

#[derive(Deserialize, StateData, StaticResponseExtender)]
pub struct GuidPath {
    guid: Uuid,
}

#[derive(Deserialize, StateData, StaticResponseExtender)]
pub struct EventBookingPath {
    guid: Uuid,
    booking: Uuid,
}

#[derive(Deserialize, StateData, StaticResponseExtender)]
pub struct BookingFilter {
    event_guid: Option<String>,
}

impl BookingFilter {
    fn event_guid(&self) -> Result<Option<Uuid>, uuid::Error> {
        self.event_guid
            .as_deref()
            .map(str::trim)
            .filter(|guid| !guid.is_empty())
            .map(str::parse::<Uuid>)
            .transpose()
    }
}

#[derive(Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

pub enum Reply {
    Html { status: StatusCode, body: Vec<u8> },
    Redirect { to: String, cookie: Option<HeaderValue> },
    Attachment(Download),
}

impl Reply {
    fn html<F>(render: F) -> Result<Reply, Error>
    where
        F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
    {
        Reply::html_with_status(StatusCode::OK, render)
    }

    fn html_with_status<F>(status: StatusCode, render: F) -> Result<Reply, Error>
    where
        F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
    {
        let mut body = Vec::new();
        render(&mut body)?;
        Ok(Reply::Html { status, body })
    }

    fn redirect(to: impl Into<String>) -> Reply {
        Reply::Redirect {
            to: to.into(),
            cookie: None,
        }
    }

    fn into_response(self, state: &State) -> Response<Body> {
        match self {
            Reply::Html { status, body } => {
                create_response(state, status, mime::TEXT_HTML_UTF_8, body)
            }
            Reply::Redirect { to, cookie } => {
                let mut response = redirect(state, &to);
                if let Some(cookie) = cookie {
                    response.headers_mut().append(SET_COOKIE, cookie);
                }
                response
            }
            Reply::Attachment(download) => {
                let mime = download
                    .content_type
                    .as_deref()
                    .and_then(|value| value.parse::<Mime>().ok())
                    .unwrap_or(mime::APPLICATION_OCTET_STREAM);
                let mut response = create_response(state, StatusCode::OK, mime, download.body);
                response
                    .headers_mut()
                    .insert(CONTENT_DISPOSITION, attachment(&download.file_name));
                response
            }
        }
    }
}

fn attachment(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();
    let encoded = utf8_percent_encode(file_name, NON_ALPHANUMERIC);
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

pub fn redirect(state: &State, to: &str) -> Response<Body> {
    let mut response = create_empty_response(state, StatusCode::SEE_OTHER);
    let location = HeaderValue::from_str(to).unwrap_or_else(|_| HeaderValue::from_static("/"));
    response.headers_mut().insert(LOCATION, location);
    response
}

pub fn sign_out(state: &State) -> Response<Body> {
    let mut response = redirect(state, "/login");
    response
        .headers_mut()
        .append(SET_COOKIE, cleared_token_cookie());
    response
}

fn finish(state: State, reply: Result<Reply, Error>) -> HandlerResult {
    let response = match reply {
        Ok(reply) => reply.into_response(&state),
        Err(err) => err.into_response(&state),
    };
    Ok((state, response))
}

fn context(state: &State) -> (Console, Session) {
    (Console::borrow_from(state).clone(), Session::from_state(state))
}

async fn read_body(state: &mut State) -> Result<Bytes, hyper::Error> {
    body::to_bytes(Body::take_from(state)).await
}

pub async fn index(state: State) -> HandlerResult {
    let response = redirect(&state, "/events");
    Ok((state, response))
}

pub async fn login_page(state: State) -> HandlerResult {
    let reply = Reply::html(|out| templates::login_html(out, None));
    finish(state, reply)
}

pub async fn login(mut state: State) -> HandlerResult {
    let (console, _) = context(&state);
    let body = read_body(&mut state).await;
    let reply = login_inner(console, body).await;
    finish(state, reply)
}

async fn login_inner(console: Console, body: Result<Bytes, hyper::Error>) -> Result<Reply, Error> {
    let credentials: Credentials = serde_urlencoded::from_bytes(&body?)?;
    match console
        .backend
        .login(&credentials.username, &credentials.password)
        .await
    {
        Ok(token) => {
            info!(username = %credentials.username, "operator signed in");
            Ok(Reply::Redirect {
                to: "/events".to_owned(),
                cookie: Some(token_cookie(&token, console.secure_cookies)?),
            })
        }
        Err(ApiError::Unauthorized) => {
            warn!(username = %credentials.username, "sign in rejected");
            Reply::html_with_status(StatusCode::UNAUTHORIZED, |out| {
                templates::login_html(out, Some("Invalid username or password."))
            })
        }
        Err(_) => Reply::html_with_status(StatusCode::BAD_GATEWAY, |out| {
            templates::login_html(out, Some("Could not sign in. Try again later."))
        }),
    }
}

pub async fn logout(state: State) -> HandlerResult {
    let response = sign_out(&state);
    Ok((state, response))
}

pub async fn events(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let reply = events_inner(console, session).await;
    finish(state, reply)
}

async fn events_inner(console: Console, session: Session) -> Result<Reply, Error> {
    let events = console
        .backend
        .list_events(&session)
        .await
        .map_err(Error::backend("Could not load events."))?;
    Reply::html(|out| templates::events_html(out, &events))
}

pub async fn new_event(state: State) -> HandlerResult {
    let reply = event_form(None, &EventForm::default(), None, StatusCode::OK);
    finish(state, reply)
}

pub async fn create_event(mut state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let body = read_body(&mut state).await;
    let reply = save_event(console, session, None, body).await;
    finish(state, reply)
}

pub async fn edit_event(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let guid = GuidPath::borrow_from(&state).guid;
    let reply = edit_event_inner(console, session, guid).await;
    finish(state, reply)
}

async fn edit_event_inner(console: Console, session: Session, guid: Uuid) -> Result<Reply, Error> {
    let event = console
        .backend
        .get_event(&session, guid)
        .await
        .map_err(Error::backend("Could not load the event."))?;
    event_form(Some(guid), &EventForm::from(event), None, StatusCode::OK)
}

pub async fn update_event(mut state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let guid = GuidPath::borrow_from(&state).guid;
    let body = read_body(&mut state).await;
    let reply = save_event(console, session, Some(guid), body).await;
    finish(state, reply)
}

async fn save_event(
    console: Console,
    session: Session,
    guid: Option<Uuid>,
    body: Result<Bytes, hyper::Error>,
) -> Result<Reply, Error> {
    let form: EventForm = serde_urlencoded::from_bytes(&body?)?;
    let missing = form.missing_fields();
    if !missing.is_empty() {
        let message = Error::MissingFields(missing).to_string();
        return event_form(guid, &form, Some(&message), StatusCode::BAD_REQUEST);
    }

    let saved = match guid {
        Some(guid) => console.backend.update_event(&session, guid, &form).await,
        None => console
            .backend
            .create_event(&session, &form)
            .await
            .map(|event| info!(guid = %event.guid, "event created")),
    };
    match saved {
        Ok(()) => Ok(Reply::redirect("/events")),
        Err(ApiError::Unauthorized) => Err(Error::backend("Could not save the event.")(
            ApiError::Unauthorized,
        )),
        Err(_) => event_form(
            guid,
            &form,
            Some("Could not save the event."),
            StatusCode::BAD_GATEWAY,
        ),
    }
}

fn event_form(
    guid: Option<Uuid>,
    form: &EventForm,
    error: Option<&str>,
    status: StatusCode,
) -> Result<Reply, Error> {
    let (title, action) = match guid {
        Some(guid) => ("Edit event", format!("/events/{}/edit", guid)),
        None => ("New event", "/events/new".to_owned()),
    };
    Reply::html_with_status(status, |out| {
        templates::event_form_html(out, title, &action, form, error)
    })
}

pub async fn delete_event(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let guid = GuidPath::borrow_from(&state).guid;
    let reply = delete_event_inner(console, session, guid).await;
    finish(state, reply)
}

async fn delete_event_inner(
    console: Console,
    session: Session,
    guid: Uuid,
) -> Result<Reply, Error> {
    console
        .backend
        .delete_event(&session, guid)
        .await
        .map_err(Error::backend("Could not delete the event."))?;
    info!(%guid, "event deleted");
    Ok(Reply::redirect("/events"))
}

pub async fn event_bookings(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let guid = GuidPath::borrow_from(&state).guid;
    let reply = event_bookings_inner(console, session, guid).await;
    finish(state, reply)
}

async fn event_bookings_inner(
    console: Console,
    session: Session,
    guid: Uuid,
) -> Result<Reply, Error> {
    let bookings = console
        .backend
        .list_bookings(&session, Some(guid))
        .await
        .map_err(Error::backend("Could not load bookings."))?;
    let event = console
        .backend
        .get_event(&session, guid)
        .await
        .map_err(Error::backend("Could not load bookings."))?;
    let summary = SeatSummary::for_event(&event, &bookings);
    Reply::html(|out| templates::event_bookings_html(out, &event, &summary, &bookings))
}

pub async fn confirm_payment(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let path = EventBookingPath::borrow_from(&state);
    let (guid, booking) = (path.guid, path.booking);
    let reply = confirm_payment_inner(console, session, guid, booking).await;
    finish(state, reply)
}

async fn confirm_payment_inner(
    console: Console,
    session: Session,
    event_guid: Uuid,
    booking_guid: Uuid,
) -> Result<Reply, Error> {
    console
        .backend
        .update_booking(&session, booking_guid, &BookingChanges::verified())
        .await
        .map_err(Error::backend("Could not confirm the payment."))?;
    info!(booking = %booking_guid, "payment confirmed");
    Ok(Reply::redirect(format!("/events/{}/bookings", event_guid)))
}

pub async fn bookings_csv_export(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let guid = GuidPath::borrow_from(&state).guid;
    let reply = bookings_csv_inner(console, session, guid).await;
    finish(state, reply)
}

async fn bookings_csv_inner(
    console: Console,
    session: Session,
    guid: Uuid,
) -> Result<Reply, Error> {
    let bookings = console
        .backend
        .list_bookings(&session, Some(guid))
        .await
        .map_err(Error::backend("Could not export bookings."))?;
    Ok(Reply::Attachment(Download {
        file_name: "bookings.csv".to_owned(),
        content_type: Some("text/csv; charset=utf-8".to_owned()),
        body: Bytes::from(bookings_csv(&bookings)),
    }))
}

pub async fn export_bookings(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let guid = GuidPath::borrow_from(&state).guid;
    let reply = console
        .backend
        .export_bookings(&session, guid)
        .await
        .map(Reply::Attachment)
        .map_err(Error::backend("Could not export bookings."));
    finish(state, reply)
}

pub async fn absentees(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let guid = GuidPath::borrow_from(&state).guid;
    let reply = absentees_inner(console, session, guid).await;
    finish(state, reply)
}

async fn absentees_inner(console: Console, session: Session, guid: Uuid) -> Result<Reply, Error> {
    let absentees = console
        .backend
        .list_absentees(&session, guid)
        .await
        .map_err(Error::backend("Could not load absentees."))?;
    Reply::html(|out| templates::absentees_html(out, &absentees))
}

pub async fn bookings(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let event_guid = BookingFilter::borrow_from(&state).event_guid();
    let reply = bookings_inner(console, session, event_guid).await;
    finish(state, reply)
}

async fn bookings_inner(
    console: Console,
    session: Session,
    event_guid: Result<Option<Uuid>, uuid::Error>,
) -> Result<Reply, Error> {
    let bookings = console
        .backend
        .list_bookings(&session, event_guid?)
        .await
        .map_err(Error::backend("Could not load bookings."))?;
    Reply::html(|out| templates::bookings_html(out, &bookings))
}

pub async fn verify_booking(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let guid = GuidPath::borrow_from(&state).guid;
    let reply = console
        .backend
        .verify_booking(&session, guid)
        .await
        .map(|()| {
            info!(booking = %guid, "booking verified");
            Reply::redirect("/bookings")
        })
        .map_err(Error::backend("Could not verify the booking."));
    finish(state, reply)
}

pub async fn booking(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let guid = GuidPath::borrow_from(&state).guid;
    let reply = booking_inner(console, session, guid).await;
    finish(state, reply)
}

// Opening a paid, unscanned booking consumes its QR code.
async fn booking_inner(console: Console, session: Session, guid: Uuid) -> Result<Reply, Error> {
    let booking = console
        .backend
        .get_booking(&session, guid)
        .await
        .map_err(Error::backend("Could not load the booking."))?;

    let status = booking.status();
    let page = match status {
        BookingStatus::Unverified => {
            Reply::html(|out| templates::booking_unverified_html(out, &booking))
        }
        BookingStatus::VerifiedPending => {
            Reply::html(|out| templates::booking_pending_html(out, &booking))
        }
        BookingStatus::VerifiedExpired => {
            Reply::html(|out| templates::booking_scanned_html(out, &booking))
        }
    }?;

    let (next, update) = status.on_view();
    if let Some(changes) = update {
        match console.backend.update_booking(&session, guid, &changes).await {
            Ok(()) => debug!(booking = %guid, status = ?next, "booking status advanced"),
            Err(ApiError::Unauthorized) => {
                return Err(Error::backend("Could not load the booking.")(
                    ApiError::Unauthorized,
                ))
            }
            // Not shown to the operator; the page already reflects the booking.
            Err(err) => warn!(booking = %guid, error = %err, "could not mark booking as scanned"),
        }
    }
    Ok(page)
}

pub async fn payment_file(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let guid = GuidPath::borrow_from(&state).guid;
    let reply = console
        .backend
        .payment_file(&session, guid)
        .await
        .map(Reply::Attachment)
        .map_err(Error::backend("Could not download the file."));
    finish(state, reply)
}

pub async fn download_payment(state: State) -> HandlerResult {
    let (console, session) = context(&state);
    let guid = GuidPath::borrow_from(&state).guid;
    let reply = console
        .backend
        .download_payment(&session, guid)
        .await
        .map(Reply::Attachment)
        .map_err(Error::backend("Could not download the file."));
    finish(state, reply)
}
