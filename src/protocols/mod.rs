//! Protocol implementations.
//!
//! - `smtp`: SMTP stub that greets, acknowledges and echoes client lines

pub mod smtp;
