//! Queue retention policy.
//!
//! Spooled jobs would be purged from the queue as soon as they complete,
//! taking their output with them. The policy keeps a completed record around
//! until its output is retrieved, bounded by a grace period.

use classad_lite::Expr;

use crate::job::JobDescription;

/// Three days
pub const DEFAULT_GRACE_PERIOD_SECONDS: i64 = 3 * 24 * 60 * 60;

pub const DEFAULT_COMPLETION_STATUS: i64 = 4;
pub const DEFAULT_COMPLETION_DATE_ATTR: &str = "CompletionDate";
pub const DEFAULT_RETRIEVED_MARKER: &str = "RETRIEVED";

/// Parameters of the retention expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub completion_status_code: i64,
    pub completion_date_attr: String,
    pub grace_period_seconds: i64,
    pub retrieved_marker: String,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completion_status_code: DEFAULT_COMPLETION_STATUS,
            completion_date_attr: DEFAULT_COMPLETION_DATE_ATTR.to_string(),
            grace_period_seconds: DEFAULT_GRACE_PERIOD_SECONDS,
            retrieved_marker: DEFAULT_RETRIEVED_MARKER.to_string(),
        }
    }
}

impl RetentionPolicy {
    pub fn new(grace_period_seconds: i64, retrieved_marker: impl Into<String>) -> Self {
        Self {
            grace_period_seconds,
            retrieved_marker: retrieved_marker.into(),
            ..Self::default()
        }
    }

    pub fn expression(&self) -> Expr {
        build_retention_expression(
            self.completion_status_code,
            &self.completion_date_attr,
            self.grace_period_seconds,
            &self.retrieved_marker,
        )
    }

    /// Install the policy on a submit description.
    ///
    /// Sets `leave_in_queue` and starts every instance with the marker unset.
    pub fn apply(&self, description: &mut JobDescription) {
        description.set("leave_in_queue", self.expression().to_string());
        description.set(&format!("My.{}", self.retrieved_marker), "false");
    }
}

/// Build the retention expression:
///
/// ```text
/// JobStatus == C && (D =?= UNDEFINED || D == 0 || time() - D < G) || R
/// ```
///
/// A record stays queued while it is completed and inside the grace window.
/// The marker term sits at the top level, so once it is true the record is
/// retained regardless of status until something removes it explicitly.
pub fn build_retention_expression(
    completion_status_code: i64,
    completion_date_attr: &str,
    grace_period_seconds: i64,
    retrieved_marker: &str,
) -> Expr {
    let date = || Expr::attr(completion_date_attr);
    let completed = Expr::attr("JobStatus").equals(Expr::int(completion_status_code));
    let within_grace = Expr::any([
        date().is_undefined(),
        date().equals(Expr::int(0)),
        Expr::time()
            .minus(date())
            .less_than(Expr::int(grace_period_seconds)),
    ]);

    completed
        .and(within_grace)
        .or(Expr::attr(retrieved_marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use classad_lite::{parse, MapEnv, Value};

    const NOW: i64 = 1_700_000_000;

    fn retained(status: i64, completion: Option<i64>, retrieved: Option<bool>) -> bool {
        let rendered = RetentionPolicy::default().expression().to_string();
        let expr = parse(&rendered).unwrap();

        let mut env = MapEnv::new(NOW).with("JobStatus", status);
        if let Some(date) = completion {
            env.set("CompletionDate", date);
        }
        if let Some(flag) = retrieved {
            env.set("RETRIEVED", flag);
        }
        expr.matches(&env)
    }

    #[test]
    fn test_retention_truth_table() {
        let g = DEFAULT_GRACE_PERIOD_SECONDS;

        // completed, inside grace
        assert!(retained(4, Some(NOW - 10), Some(false)));
        // completed, date not set yet
        assert!(retained(4, None, Some(false)));
        assert!(retained(4, Some(0), Some(false)));
        // completed, grace expired
        assert!(!retained(4, Some(NOW - g), Some(false)));
        assert!(!retained(4, Some(NOW - g - 1), None));
        // marker wins at the top level
        assert!(retained(4, Some(NOW - g - 1), Some(true)));
        assert!(retained(2, None, Some(true)));
        // running jobs are not held back by the policy
        assert!(!retained(2, None, Some(false)));
    }

    #[test]
    fn test_retention_rendering_reparses() {
        let expr = build_retention_expression(4, "CompletionDate", 100, "RETRIEVED");
        let rendered = expr.to_string();
        assert!(rendered.contains("JobStatus == 4"));
        assert!(rendered.contains("CompletionDate =?= UNDEFINED"));
        assert!(rendered.contains("100"));
        assert_eq!(parse(&rendered).unwrap(), expr);
    }

    #[test]
    fn test_custom_marker_and_attribute() {
        let policy = RetentionPolicy {
            completion_date_attr: "FinishedAt".to_string(),
            retrieved_marker: "Fetched".to_string(),
            ..RetentionPolicy::default()
        };
        let expr = policy.expression();
        assert_eq!(expr.attributes(), vec!["JobStatus", "FinishedAt", "Fetched"]);

        let env = MapEnv::new(NOW)
            .with("JobStatus", 4i64)
            .with("FinishedAt", NOW - 5)
            .with("Fetched", false);
        assert!(expr.matches(&env));
    }

    #[test]
    fn test_apply_sets_policy_and_marker() {
        let mut description = JobDescription::new();
        RetentionPolicy::default().apply(&mut description);

        let leave = description.get("leave_in_queue").unwrap();
        assert!(parse(leave).is_ok());
        assert_eq!(description.get("My.RETRIEVED"), Some("false"));
        assert_eq!(
            Value::from_submit_text(description.get("My.RETRIEVED").unwrap()),
            Value::Bool(false)
        );
    }
}
