use crate::outcome::{AbortReason, ActionResult, CommandOutcome, OutcomeStatus, ResultStatus};

pub fn format_result(result: &ActionResult) -> String {
    match result.status() {
        ResultStatus::Succeeded => match result.output() {
            Some(serde_json::Value::String(s)) => format!("ok: {}", s),
            Some(v) => format!("ok: {}", v),
            None => "ok".to_string(),
        },
        status => {
            let label = match status {
                ResultStatus::Failed => "failed",
                ResultStatus::Skipped => "skipped",
                _ => "timed out",
            };
            match result.error() {
                Some(e) => format!("{} ({:?}): {}", label, e.kind, e.detail),
                None => label.to_string(),
            }
        }
    }
}

pub fn format_outcome(outcome: &CommandOutcome) -> String {
    let mut output = String::new();

    for (i, record) in outcome.results.iter().enumerate() {
        output.push_str(&format!(
            "{}. {} -> {}\n",
            i + 1,
            record.action,
            format_result(&record.result)
        ));
    }

    let summary = match (&outcome.status, &outcome.abort_reason) {
        (OutcomeStatus::Succeeded, _) => "Done.".to_string(),
        (OutcomeStatus::Failed, _) => format!(
            "Finished with {} unsuccessful action(s).",
            outcome.results.len() - outcome.count(ResultStatus::Succeeded)
        ),
        (OutcomeStatus::Aborted, Some(AbortReason::Interpretation { error })) => {
            format!("Could not interpret command: {}", error)
        }
        (OutcomeStatus::Aborted, Some(AbortReason::ActionFailed { step })) => {
            format!("Aborted: step {} failed.", step + 1)
        }
        (OutcomeStatus::Aborted, Some(AbortReason::VerificationDeclined { step })) => {
            format!("Aborted: step {} was not approved.", step + 1)
        }
        (OutcomeStatus::Aborted, Some(AbortReason::Cancelled { step })) => {
            format!("Cancelled before step {}.", step + 1)
        }
        (OutcomeStatus::Aborted, None) => "Aborted.".to_string(),
    };
    output.push_str(&summary);
    output
}
