//! Final operator report: one block per started stack.

use mcpl_core::types::Instance;

/// Threshold the hosted-model importer enforces on operation count.
const OPERATION_LIMIT: usize = 30;
const NEAR_LIMIT_FLOOR: usize = 28;

/// Everything the report needs about one stack.
pub struct StackSummary<'a> {
    pub instance: &'a Instance,
    pub server_count: usize,
    pub merge_error: Option<&'a str>,
}

pub fn operation_warning(total: usize) -> Option<&'static str> {
    if total > OPERATION_LIMIT {
        Some("⚠ OVER 30-limit")
    } else if (NEAR_LIMIT_FLOOR..=OPERATION_LIMIT).contains(&total) {
        Some("⚠ near 30")
    } else {
        None
    }
}

pub fn render_report(stacks: &[StackSummary<'_>], verbose: bool) -> String {
    let mut out = String::new();
    for summary in stacks {
        let instance = summary.instance;
        let diagnostics = &instance.diagnostics;
        out.push_str(&format!("== {} ==\n", instance.name));
        match &instance.public_url {
            Some(url) => out.push_str(&format!(
                "  URL:        {url}  (local {})\n",
                instance.local_url()
            )),
            None => out.push_str(&format!("  URL:        {}\n", instance.local_url())),
        }
        out.push_str(&format!(
            "  OpenAPI:    {}/openapi.json\n",
            instance.effective_url()
        ));
        out.push_str(&format!("  API key:    {}\n", instance.api_key));

        if let Some(error) = summary.merge_error {
            out.push_str(&format!("  merge FAILED: {error}\n"));
            continue;
        }

        let warning = operation_warning(diagnostics.total_operations)
            .map(|w| format!("  {w}"))
            .unwrap_or_default();
        out.push_str(&format!(
            "  Servers:    {}  Operations: {}{warning}\n",
            summary.server_count, diagnostics.total_operations
        ));

        for (server, count) in &diagnostics.operations_per_server {
            let long = diagnostics
                .long_descriptions
                .get(server)
                .map(Vec::len)
                .unwrap_or(0);
            if long > 0 {
                out.push_str(&format!(
                    "    {server}: {count} ops, {long} long description(s)\n"
                ));
            } else {
                out.push_str(&format!("    {server}: {count} ops\n"));
            }
            if verbose && let Some(lines) = diagnostics.long_descriptions.get(server) {
                for line in lines {
                    out.push_str(&format!("      {line}\n"));
                }
            }
        }
    }
    out
}

pub fn print_report(stacks: &[StackSummary<'_>], verbose: bool) {
    print!("{}", render_report(stacks, verbose));
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpl_core::types::{InstanceDiagnostics, TunnelMode};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn instance_with_ops(total: usize) -> Instance {
        Instance {
            name: "alpha".into(),
            config_path: PathBuf::from("alpha.json"),
            front_port: 8000,
            gateway_port: 8800,
            api_key: "secret".into(),
            tunnel_mode: TunnelMode::Quick,
            public_url: Some("https://x.trycloudflare.com".into()),
            gateway_pid: None,
            tunnel_pid: None,
            diagnostics: InstanceDiagnostics {
                tool_count: 0,
                total_operations: total,
                operations_per_server: BTreeMap::from([("fs".to_string(), total)]),
                long_descriptions: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn warning_thresholds() {
        assert_eq!(operation_warning(27), None);
        assert_eq!(operation_warning(28), Some("⚠ near 30"));
        assert_eq!(operation_warning(30), Some("⚠ near 30"));
        assert_eq!(operation_warning(31), Some("⚠ OVER 30-limit"));
    }

    #[test]
    fn report_includes_urls_key_and_counts() {
        let instance = instance_with_ops(12);
        let summaries = [StackSummary {
            instance: &instance,
            server_count: 3,
            merge_error: None,
        }];
        let report = render_report(&summaries, false);
        assert!(report.contains("== alpha =="));
        assert!(report.contains("https://x.trycloudflare.com/openapi.json"));
        assert!(report.contains("API key:    secret"));
        assert!(report.contains("Servers:    3  Operations: 12"));
        assert!(!report.contains("⚠"));
    }

    #[test]
    fn over_limit_is_flagged() {
        let instance = instance_with_ops(31);
        let summaries = [StackSummary {
            instance: &instance,
            server_count: 1,
            merge_error: None,
        }];
        let report = render_report(&summaries, false);
        assert!(report.contains("⚠ OVER 30-limit"));
    }

    #[test]
    fn verbose_enumerates_long_description_warnings() {
        let mut instance = instance_with_ops(5);
        instance.diagnostics.long_descriptions.insert(
            "fs".to_string(),
            vec!["POST /fs/read (tool=read): description length 312 > 300".to_string()],
        );
        let summaries = [StackSummary {
            instance: &instance,
            server_count: 1,
            merge_error: None,
        }];

        let quiet = render_report(&summaries, false);
        assert!(quiet.contains("1 long description(s)"));
        assert!(!quiet.contains("length 312"));

        let loud = render_report(&summaries, true);
        assert!(loud.contains("length 312 > 300"));
    }

    #[test]
    fn merge_failure_replaces_counts() {
        let instance = instance_with_ops(5);
        let summaries = [StackSummary {
            instance: &instance,
            server_count: 1,
            merge_error: Some("fetching http://127.0.0.1:8800/fs/openapi.json returned 500: boom"),
        }];
        let report = render_report(&summaries, false);
        assert!(report.contains("merge FAILED"));
        assert!(!report.contains("Operations:"));
    }
}
