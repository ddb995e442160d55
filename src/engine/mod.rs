pub mod chained;
pub mod hierarchical;
pub mod invoker;
pub mod negotiation;
pub mod parallel;
pub mod sequential;

pub use chained::{ask, ChainedRun, ChainedWorkflow, Metric};
pub use hierarchical::{
    HierarchicalOrchestrator, HierarchicalRun, HierarchyLimits, LineParser, TaskNode,
    TaskParser, WholeTextParser,
};
pub use invoker::{Completion, ResilientInvoker};
pub use negotiation::{NegotiationOrchestrator, NegotiationRun, Proposal};
pub use parallel::{BranchOutcome, ParallelOrchestrator, ParallelRun, PipelineOutput};
pub use sequential::{SequentialOrchestrator, SequentialRun, SequentialStep, StepOutput};

use futures::future::join_all;
use tokio::task::{JoinError, JoinHandle};

/// Substitute `{name}` placeholders in one pass.
///
/// Substituted values are never scanned again, so an input that itself contains
/// `{previous}` is kept literally. Unknown placeholders are left as they are.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        let substitution = tail.find('}').and_then(|end| {
            let name = &tail[1..end];
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (end, *value))
        });

        match substitution {
            Some((end, value)) => {
                out.push_str(value);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Wait for every spawned branch. A panicked branch yields its panic message.
pub(crate) async fn settle_all<T>(handles: Vec<JoinHandle<T>>) -> Vec<Result<T, String>> {
    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.map_err(panic_message))
        .collect()
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let out = render(
            "User goal: {input}\nPrevious: {previous}",
            &[("input", "42"), ("previous", "none")],
        );
        assert_eq!(out, "User goal: 42\nPrevious: none");
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let out = render(
            "{input} / {previous}",
            &[("input", "{previous}"), ("previous", "p")],
        );
        assert_eq!(out, "{previous} / p");
    }

    #[test]
    fn test_render_keeps_unknown_and_unbalanced_braces() {
        assert_eq!(render("{a {input}", &[("input", "x")]), "{a x");
        assert_eq!(render("{unknown}", &[("input", "x")]), "{unknown}");
        assert_eq!(render("open {", &[]), "open {");
    }

    #[tokio::test]
    async fn test_settle_all_reports_panics_in_order() {
        let handles = vec![
            tokio::spawn(async { 1 }),
            tokio::spawn(async {
                if true {
                    panic!("boom");
                }
                2
            }),
            tokio::spawn(async { 3 }),
        ];

        let settled = settle_all(handles).await;
        assert_eq!(settled[0], Ok(1));
        assert_eq!(settled[1], Err("boom".to_string()));
        assert_eq!(settled[2], Ok(3));
    }
}
