//! Scripted collaborators and run-level property tests.
