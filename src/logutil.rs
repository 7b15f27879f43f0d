//! Logging setup and helpers for keeping player-supplied strings on one line.

use std::io::Write;

/// Escape a player-supplied string (username, room code, board id) for
/// single-line logging. Control characters become `\n`, `\t`, `\xNN`, and
/// anything past 64 characters is cut with an ellipsis.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 64;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

fn level_from_str(level: &str) -> log::LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "off" => log::LevelFilter::Off,
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}

/// Installs the global `env_logger`. `-v` flags win over the configured
/// level. With a log file configured every line is appended there and only
/// echoed to the console when stdout is a terminal.
pub fn init_logging(level: &str, file: Option<&str>, verbosity: u8) {
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => level_from_str(level),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = file.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });
    match log_file {
        Some(f) => {
            let file = std::sync::Mutex::new(f);
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}: {}", ts, record.level(), record.target(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}: {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    record.level(),
                    record.target(),
                    record.args()
                )
            });
        }
    }
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_control_characters() {
        assert_eq!(escape_log("ali\nce\t"), "ali\\nce\\t");
        assert_eq!(escape_log("bell\u{7}"), "bell\\x07");
    }

    #[test]
    fn truncates_long_names() {
        let long = "x".repeat(100);
        let esc = escape_log(&long);
        assert_eq!(esc.chars().count(), 65);
        assert!(esc.ends_with('…'));
    }

    #[test]
    fn parses_levels() {
        assert_eq!(level_from_str("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(level_from_str("nonsense"), log::LevelFilter::Info);
    }
}
