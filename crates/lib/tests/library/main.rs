//! Library tests that drive a full update session over HTTP.

mod common;

mod session_tests;
