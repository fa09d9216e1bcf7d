//! SMTP client side of mxmail.
//!
//! Only what a single direct delivery needs: a client that speaks to a
//! remote mail exchanger (with optional STARTTLS) and a renderer for the
//! HTML report message it carries.

pub mod client;
