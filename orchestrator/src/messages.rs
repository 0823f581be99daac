//! Plain-text notification templates.

use std::collections::BTreeMap;

use crate::types::SubmissionOutcome;

const SIGNATURE: &str = "Best regards,\nFrom PureChain Team";

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

fn render(subject: String, greeting_name: &str, paragraphs: &[String]) -> Message {
    let greeting = if greeting_name.trim().is_empty() {
        "Hello,".to_string()
    } else {
        format!("Hello {},", greeting_name.trim())
    };

    let mut body = greeting;
    for paragraph in paragraphs {
        body.push_str("\n\n");
        body.push_str(paragraph);
    }
    body.push_str("\n\n");
    body.push_str(SIGNATURE);

    Message { subject, body }
}

/// Receipt sent to a contributor after their submission was handled.
pub fn submission_notice(name: &str, dataset: &str, outcome: &SubmissionOutcome) -> Message {
    let mut paragraphs = vec![format!("{} ({})", outcome.message, dataset)];

    if let Some(address) = &outcome.content_address {
        paragraphs.push(format!("Content address: {}", address));
    }
    if !outcome.issues.is_empty() {
        paragraphs.push(format!("Issues found:\n- {}", outcome.issues.join("\n- ")));
    }
    paragraphs.push(format!("Your reputation is now {}.", outcome.reputation));

    render(
        format!("PureChain submission {}", status_word(outcome)),
        name,
        &paragraphs,
    )
}

fn status_word(outcome: &SubmissionOutcome) -> &'static str {
    use crate::types::SubmissionStatus::*;
    match outcome.status {
        Accepted => "accepted",
        Lenient => "needs attention",
        Penalized => "rejected",
        Blocked => "blocked",
    }
}

/// Sent to contributors whose data went into a completed run.
pub fn training_success(name: &str, model_id: &str, metrics: &BTreeMap<String, f64>) -> Message {
    let mut paragraphs = vec![format!(
        "Model {} was trained with your contributed data.",
        model_id
    )];
    if !metrics.is_empty() {
        let lines: Vec<String> = metrics
            .iter()
            .map(|(name, value)| format!("- {}: {:.4}", name, value))
            .collect();
        paragraphs.push(format!("Results:\n{}", lines.join("\n")));
    }
    paragraphs.push("Thank you for contributing quality data.".to_string());

    render(format!("Model {} trained", model_id), name, &paragraphs)
}

/// Sent to contributors whose submissions were rejected for this model.
pub fn training_rejection(name: &str, model_id: &str, issues: &[String]) -> Message {
    let mut paragraphs = vec![format!(
        "Model {} was trained, but your submitted data was not used because it failed validation.",
        model_id
    )];
    if !issues.is_empty() {
        paragraphs.push(format!("Issues found:\n- {}", issues.join("\n- ")));
    }
    paragraphs.push("Please review the issues and submit corrected data.".to_string());

    render(format!("Data not used for model {}", model_id), name, &paragraphs)
}

/// Operator alert for a run below the performance floor.
pub fn low_performance_alert(
    model_id: &str,
    version: &str,
    metric: &str,
    value: Option<f64>,
    floor: f64,
) -> Message {
    let observed = match value {
        Some(v) => format!("{} = {:.4}", metric, v),
        None => format!("{} was not reported", metric),
    };

    render(
        format!("Low performance: model {}", model_id),
        "",
        &[
            format!(
                "Training run {} for model {} finished below the performance floor of {:.2}: {}.",
                version, model_id, floor, observed
            ),
            "The artifacts were published but should be reviewed before use.".to_string(),
        ],
    )
}
