//! SMTP stub protocol implementation.
//!
//! Accepts just enough SMTP for a mail client to hand over a message, and
//! reports everything it receives to the observation sink:
//! - Greets every connection with `220 Awesome SMTP server`
//! - Acknowledges every command line with `250 OK`
//! - `DATA` enters body capture (`354 Intermediate`); body lines get no
//!   reply until a lone `.` (`250 OK`)
//! - `QUIT` closes the connection without a reply
//!
//! ## Protocol Format
//!
//! ```text
//! S: 220 Awesome SMTP server
//! C: HELO test
//! S: 250 OK
//! C: DATA
//! S: 354 Intermediate
//! C: Subject: hi
//! C:
//! C: body text
//! C: .
//! S: 250 OK
//! C: QUIT
//! ```
//!
//! Nothing is validated. Commands are matched exactly and case-sensitively;
//! `DATA`, `.` and `QUIT` keep their meaning inside a message body.

pub mod handler;
pub mod machine;

pub use handler::handle_connection;
