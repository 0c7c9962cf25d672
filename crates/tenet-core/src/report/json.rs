use super::{CorpusSummary, ValidationReport};
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE: &str = "summary.json";

pub fn report_file_name(scenario_id: &str) -> String {
    format!("{}_validation.json", scenario_id)
}

pub fn write_report(report: &ValidationReport, out: &Path) -> anyhow::Result<()> {
    write_pretty(report, out)
}

pub fn write_summary(summary: &CorpusSummary, dir: &Path) -> anyhow::Result<PathBuf> {
    let out = dir.join(SUMMARY_FILE);
    write_pretty(summary, &out)?;
    Ok(out)
}

fn write_pretty<T: Serialize>(value: &T, out: &Path) -> anyhow::Result<()> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(out, text).with_context(|| format!("failed to write {}", out.display()))?;
    tracing::debug!(path = %out.display(), "wrote report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::{row, scenario_run};
    use crate::report::RunInfo;

    #[test]
    fn writes_report_and_summary_into_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("out/nested");
        let run = scenario_run("S021", vec![row("TC1", "REJECT", Some("REJECT"))]);
        let info = RunInfo::new("replay", "m");

        let report_path = out_dir.join(report_file_name("S021"));
        write_report(&ValidationReport::new(&run, &info), &report_path).unwrap();
        let summary_path = write_summary(&CorpusSummary::new(&[run], &info), &out_dir).unwrap();

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(report["scenario_id"], "S021");
        assert_eq!(report_path.file_name().unwrap(), "S021_validation.json");

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
        assert_eq!(summary["accuracy"]["total"], 1);
        assert_eq!(summary["run_id"], report["run_id"]);
    }
}
