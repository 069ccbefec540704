use std::fmt;

use serde::Serialize;

/// Snapshot of a store's contents, as shown by `cachet status`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub stored_values: usize,
    pub computed_signatures: usize,
    pub queued: usize,
    pub claimed: usize,
    pub registered_workers: usize,
    pub live_workers: usize,
    pub crashes: usize,
    pub functions: Vec<String>,
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "values:     {}", self.stored_values)?;
        writeln!(f, "computed:   {}", self.computed_signatures)?;
        writeln!(f, "queued:     {} ({} claimed)", self.queued, self.claimed)?;
        writeln!(
            f,
            "workers:    {} live of {} registered",
            self.live_workers, self.registered_workers
        )?;
        writeln!(f, "crashes:    {}", self.crashes)?;
        write!(f, "functions:  {}", self.functions.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_every_count() {
        let summary = StatusSummary {
            stored_values: 12,
            computed_signatures: 4,
            queued: 3,
            claimed: 1,
            registered_workers: 2,
            live_workers: 1,
            crashes: 0,
            functions: vec!["fibonacci@1".into(), "factorial@1".into()],
        };
        let text = summary.to_string();
        assert!(text.contains("queued:     3 (1 claimed)"));
        assert!(text.contains("1 live of 2 registered"));
        assert!(text.ends_with("fibonacci@1, factorial@1"));
    }

    #[test]
    fn serializes_as_flat_json() {
        let json = serde_json::to_value(StatusSummary::default()).unwrap();
        assert_eq!(json["queued"], 0);
        assert!(json["functions"].as_array().unwrap().is_empty());
    }
}
