//! Dev harness: run a command in a session and dump the resulting grid.
//!
//! Usage: termprobe [command]

use std::time::Duration;
use termcore::config::Config;
use termcore::screen::Event;
use termcore::session::Session;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let command = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "printf 'termcore alive\\n'; ls".to_string());

    let mut session = Session::new(Config {
        shell_path: Some("/bin/sh".to_string()),
        shell_args: vec!["-c".to_string(), command],
        ..Config::default()
    });

    if let Err(e) = session.start() {
        log::error!("failed to start session: {}", e);
        std::process::exit(1);
    }

    while session.is_running() {
        if let Err(e) = session.pump(Some(Duration::from_millis(100))) {
            log::error!("pump failed: {}", e);
            break;
        }
    }

    let (rows, cols) = session.screen().size();
    println!("grid ({}x{}):", rows, cols);
    for row in 0..rows {
        println!("|{}|", session.screen().row_text(row));
    }
    for event in session.take_events() {
        match event {
            Event::Bell => println!("event: bell"),
            Event::TitleChanged(title) => println!("event: title = {:?}", title),
            Event::SessionExited(code) => println!("event: exited with {}", code),
        }
    }
}
