//! TermCore - a terminal emulation engine.
//!
//! Hosts a child shell over a pseudo-terminal, interprets its byte stream as
//! VT100/xterm escape sequences, and maintains a grid of formatted cells that
//! a renderer can pull from. Rendering, window chrome, and input mapping are
//! the host's business; this crate owns the parser, the screen model, and the
//! PTY session lifecycle.

pub mod config;
pub mod parser;
pub mod pty;
pub mod screen;
pub mod session;
