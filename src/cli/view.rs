use std::fmt::Write;

use crate::{
    daemon::{processing::notify::RecorderEvent, service::{RecorderStatus, SessionsView}},
    utils::time::{format_duration, format_local_start_time},
};

/// Renders stored sessions as a table followed by the total duration.
pub fn render_sessions(view: &SessionsView) -> String {
    let mut out = String::new();
    if view.sessions.is_empty() {
        out.push_str("No sessions recorded yet\n");
    }
    for session in &view.sessions {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}",
            session.start_time, session.duration, session.app, session.task
        );
    }
    let _ = writeln!(out, "Total\t{}", view.total);
    out
}

pub fn render_status(status: &RecorderStatus) -> String {
    match (&status.open_session, status.tracking) {
        (Some(open), _) => format!(
            "Tracking {} / {} since {} ({})",
            open.app,
            open.task,
            format_local_start_time(open.start_time),
            format_duration(open.duration)
        ),
        (None, true) => "Tracking, waiting for the first sample".into(),
        (None, false) => "Not tracking".into(),
    }
}

pub fn render_event(event: &RecorderEvent) -> String {
    match event {
        RecorderEvent::TrackingStarted => "Tracking started".into(),
        RecorderEvent::TrackingStopped => "Tracking stopped".into(),
        RecorderEvent::SessionRecorded { session } => format!(
            "Recorded {}\t{}\t{}\t{}",
            format_local_start_time(session.start_time),
            format_duration(session.duration),
            session.app,
            session.task
        ),
    }
}
