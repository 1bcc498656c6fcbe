//! Integration tests for saved sessions and configuration files

mod session_tests;
