// End-of-session practice report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    Hit,
    Missed,
    /// Session stopped before the note got a verdict
    Pending,
}

/// Outcome for one expected note
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteResult {
    pub index: usize,
    pub pitch: u8,
    pub expected_time_ms: f64,
    pub status: NoteStatus,
    pub timing_delta_ms: Option<f64>,
}

/// Summary emitted when a session finishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    /// Unique session ID
    pub id: String,

    /// When the session was started
    pub started_at: DateTime<Utc>,

    /// Practice time in seconds (paused spans excluded)
    pub duration_secs: f64,

    /// Score title, if known
    pub title: Option<String>,

    pub total_notes: u32,
    pub hits: u32,
    pub misses: u32,
    pub extras: u32,

    /// hits / (hits + misses + extras)
    pub accuracy: f64,

    pub mean_timing_delta_ms: f64,
    pub mean_abs_timing_delta_ms: f64,
    pub early_hits: u32,
    pub on_time_hits: u32,
    pub late_hits: u32,
    pub best_streak: u32,

    /// "early", "late" or "on_time"
    pub timing_tendency: String,

    pub feedback: Vec<String>,

    pub note_results: Vec<NoteResult>,
}

impl SessionReport {
    /// Write the report as pretty JSON into `dir`, returning the file path
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let short_id: String = self.id.chars().take(8).collect();
        let filename = format!(
            "practice_{}_{}.json",
            self.started_at.format("%Y-%m-%d_%H-%M-%S"),
            short_id
        );
        let path = dir.join(filename);

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)?;

        log::info!("Saved practice report to {}", path.display());
        Ok(path)
    }

    /// Read a previously saved report
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let report = serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(report)
    }
}

/// Classify the average signed timing offset
pub fn timing_tendency(mean_delta_ms: f64, on_time_ms: f64) -> &'static str {
    if mean_delta_ms > on_time_ms {
        "late"
    } else if mean_delta_ms < -on_time_ms {
        "early"
    } else {
        "on_time"
    }
}

/// Human-readable coaching lines for the end-of-session summary
pub fn feedback_messages(report: &SessionReport) -> Vec<String> {
    let mut feedback: Vec<String> = Vec::new();

    if report.total_notes > 0 {
        let pct = report.hits as f64 / report.total_notes as f64 * 100.0;
        if pct >= 90.0 {
            feedback.push(format!("Excellent! You played {:.0}% of the notes.", pct));
        } else if pct >= 70.0 {
            feedback.push(format!("Good job! You played {:.0}% of the notes.", pct));
        } else if pct >= 50.0 {
            feedback.push(format!("Keep practicing! You played {:.0}% of the notes.", pct));
        } else {
            feedback.push(format!(
                "This one's tough! You played {:.0}% of the notes. Try a slower tempo.",
                pct
            ));
        }
    }

    if report.misses > 0 {
        feedback.push(format!(
            "You missed {} note{}.",
            report.misses,
            if report.misses == 1 { "" } else { "s" }
        ));
    }

    if report.extras > 0 {
        feedback.push(format!(
            "{} key press{} didn't match the score.",
            report.extras,
            if report.extras == 1 { "" } else { "es" }
        ));
    }

    match report.timing_tendency.as_str() {
        "early" => feedback.push(format!(
            "You tend to rush: on average {:.0} ms ahead of the beat.",
            -report.mean_timing_delta_ms
        )),
        "late" => feedback.push(format!(
            "You tend to drag: on average {:.0} ms behind the beat.",
            report.mean_timing_delta_ms
        )),
        _ => {
            if report.hits > 0 {
                feedback.push("Your timing is steady.".to_string());
            }
        }
    }

    if report.best_streak >= 10 {
        feedback.push(format!("Best streak: {} notes in a row.", report.best_streak));
    }

    feedback
}
