use netplug_core::plugin_system::{AbiGeneration, LoadReport, TransportFamily};

/// One line per supported generation, newest first.
pub fn render_generations() -> String {
    let mut out = String::new();
    for generation in AbiGeneration::DESCENDING {
        let network = generation.symbol_name(TransportFamily::Network).to_string_lossy();
        let collective = generation.symbol_name(TransportFamily::Collective).to_string_lossy();
        let binding = if generation.is_current() { "native" } else { "adapter" };
        out.push_str(&format!("{:<4} {:<20} {:<24} {}\n", generation.to_string(), network, collective, binding));
    }
    out
}

/// The load report as text, or as pretty JSON for scripts.
pub fn render_report(report: &LoadReport, json: bool) -> Result<String, serde_json::Error> {
    if json {
        serde_json::to_string_pretty(report).map(|mut s| {
            s.push('\n');
            s
        })
    } else {
        Ok(report.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generations_newest_first() {
        let text = render_generations();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), AbiGeneration::COUNT);
        assert!(lines[0].starts_with("v11"));
        assert!(lines[0].ends_with("native"));
        assert!(lines[3].contains("networkPlugin_v8"));
        assert!(lines[3].ends_with("adapter"));
    }
}
