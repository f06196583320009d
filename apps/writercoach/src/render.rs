//! Plain-text rendering of the dashboard view.

use client_core::{
    view::{CollectionView, StatusMessage, Tone},
    Collection, DashboardView,
};
use shared::protocol::{Assignment, Feedback, Submission};

pub fn auth_line(view: &DashboardView) -> String {
    match &view.email {
        Some(email) => format!("[{}] {email}", view.auth_state.as_str()),
        None => format!("[{}]", view.auth_state.as_str()),
    }
}

pub fn status_message(message: &StatusMessage) -> String {
    let tag = match message.tone {
        Tone::Info => "info",
        Tone::Success => "ok",
        Tone::Error => "error",
    };
    format!("{tag}: {}", message.text)
}

pub fn dashboard(view: &DashboardView) -> String {
    let mut out = auth_line(view);
    out.push('\n');
    section(&mut out, Collection::Assignments, &view.assignments, assignment);
    section(&mut out, Collection::Submissions, &view.submissions, submission);
    section(&mut out, Collection::Feedback, &view.feedback, feedback);
    out
}

fn section<T>(
    out: &mut String,
    collection: Collection,
    items: &CollectionView<T>,
    line: fn(&T) -> String,
) {
    out.push_str(&format!("\n{} ({})\n", collection.name(), items.status));
    for item in &items.items {
        out.push_str("  ");
        out.push_str(&line(item));
        out.push('\n');
    }
    if let Some(empty) = &items.empty_state {
        out.push_str(&format!("  {empty}\n"));
    }
}

fn assignment(assignment: &Assignment) -> String {
    let due = assignment
        .due_date
        .map(|due| format!(" (due {})", due.format("%Y-%m-%d")))
        .unwrap_or_default();
    format!("{}  {}{due}", assignment.id, assignment.title)
}

fn submission(submission: &Submission) -> String {
    let mut line = format!(
        "{}  {}  {}",
        submission.submitted_at.format("%Y-%m-%d %H:%M"),
        submission.status,
        submission.draft_url
    );
    if let Some(minutes) = submission.time_spent_minutes {
        line.push_str(&format!("  {minutes} min"));
    }
    if let Some(transcript) = &submission.transcript_url {
        line.push_str(&format!("\n    transcript: {transcript}"));
    }
    line
}

fn feedback(feedback: &Feedback) -> String {
    let mut line = format!(
        "{}  {}: {}",
        feedback.created_at.format("%Y-%m-%d %H:%M"),
        feedback.author_role,
        feedback.comment.as_deref().unwrap_or("(no comment)")
    );
    if let Some(scores) = &feedback.rubric_scores {
        let scores = serde_json::to_string(scores).unwrap_or_default();
        line.push_str(&format!("  rubric {scores}"));
    }
    line
}
