use std::time::Duration;

use crate::{
    inference::{AnalysisResult, AnalysisStatus},
    models::ModelTier,
};

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

/// Format an analysis result as human-readable markdown
pub fn format_analysis_readable(video: &str, tier: ModelTier, result: &AnalysisResult) -> String {
    let mut output = String::new();
    output.push_str(&format!("# {}\n\n", video));
    output.push_str(&format!("**Model tier:** {}", tier.name()));
    if result.truncated {
        output.push_str(" | **Output truncated**");
    }
    output.push_str("\n\n");

    output.push_str("## Analysis Output\n\n");
    match &result.status {
        AnalysisStatus::Complete => {
            output.push_str(result.text.trim_end());
            output.push('\n');
        }
        AnalysisStatus::Empty => output.push_str("_The model returned no text for this video._\n"),
        AnalysisStatus::Failed { cause } => {
            output.push_str(&format!("_Analysis failed: {}_\n", cause));
        }
    }

    output
}
